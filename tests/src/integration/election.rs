//! # Leader Election Across Tabs
//!
//! - Concurrently started tabs settle on exactly one leader.
//! - A leader that disappears is replaced once its record goes stale.
//! - A record exactly at the staleness threshold is still honoured.

#[cfg(test)]
mod tests {
    use crate::harness::{eventually, settle, TabHarness};
    use futures::future::join_all;
    use shared_store::keys::LEADER_KEY;
    use shared_store::SharedStore;
    use shared_types::{LeadershipRecord, TabId};
    use std::time::Duration;
    use tc_03_leader_election::ElectionRole;

    fn record(harness: &TabHarness) -> LeadershipRecord {
        let raw = harness.store.get(LEADER_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    // =========================================================================
    // UNIQUENESS
    // =========================================================================

    #[tokio::test]
    async fn test_sequential_start_first_tab_leads() {
        let harness = TabHarness::with_channel(3);
        harness.start_all().await;

        assert_eq!(harness.leaders(), vec![TabId::from("tab-0")]);
        for i in 1..3 {
            assert_eq!(harness.tab(i).role(), ElectionRole::Follower);
            assert_eq!(harness.tab(i).leader_id(), Some(TabId::from("tab-0")));
        }
        assert_eq!(record(&harness).tab_id.as_str(), "tab-0");

        harness.stop_all().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_start_elects_exactly_one_leader() {
        let harness = TabHarness::with_channel(5);
        join_all(harness.tabs.iter().map(|t| t.coordinator.start())).await;
        settle().await;

        let leaders = harness.leaders();
        assert_eq!(leaders.len(), 1, "leaders: {leaders:?}");
        let leader = leaders[0].clone();
        assert_eq!(record(&harness).tab_id, leader);

        // A follower that lost to a token holder learns the real leader
        // from the record on its next check.
        for tab in &harness.tabs {
            tab.coordinator.elector().check().await;
        }
        let agreed = eventually(Duration::from_secs(1), || {
            harness
                .tabs
                .iter()
                .all(|t| t.coordinator.leader_id().as_ref() == Some(&leader))
        })
        .await;
        assert!(agreed, "followers disagree on the leader");

        harness.stop_all().await;
    }

    // =========================================================================
    // SELF-HEALING
    // =========================================================================

    #[tokio::test]
    async fn test_stale_leader_is_replaced() {
        let harness = TabHarness::with_channel(3);
        harness.start_all().await;
        assert!(harness.tab(0).is_leader());

        // Leader tab closes without handing over.
        harness.tab(0).stop().await;
        harness.advance(Duration::from_millis(15_001));

        assert_eq!(harness.tab(1).elector().check().await, ElectionRole::Leader);
        assert_eq!(record(&harness).tab_id.as_str(), "tab-1");

        // The new leader's ping reaches the remaining follower.
        let followed = eventually(Duration::from_secs(1), || {
            harness.tab(2).leader_id() == Some(TabId::from("tab-1"))
        })
        .await;
        assert!(followed);
        assert_eq!(harness.tab(2).elector().check().await, ElectionRole::Follower);
        assert_eq!(harness.leaders(), vec![TabId::from("tab-1")]);

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_record_at_threshold_is_not_taken_over() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;
        harness.tab(0).stop().await;

        harness.advance(Duration::from_millis(15_000));
        assert_eq!(harness.tab(1).elector().check().await, ElectionRole::Follower);
        assert_eq!(record(&harness).tab_id.as_str(), "tab-0");

        harness.advance(Duration::from_millis(1));
        assert_eq!(harness.tab(1).elector().check().await, ElectionRole::Leader);

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_live_leader_keeps_record_fresh() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;

        // Renewals every interval keep followers from taking over.
        for _ in 0..6 {
            harness.advance(Duration::from_secs(5));
            assert_eq!(harness.tab(0).elector().check().await, ElectionRole::Leader);
            assert_eq!(harness.tab(1).elector().check().await, ElectionRole::Follower);
        }
        assert_eq!(record(&harness).timestamp, harness.now_ms());
        assert_eq!(harness.leaders(), vec![TabId::from("tab-0")]);

        harness.stop_all().await;
    }
}
