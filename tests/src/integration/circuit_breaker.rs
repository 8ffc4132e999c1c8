//! # Shared Store Circuit Breaker
//!
//! A failing store opens the breaker after three failures; while open the
//! store is not touched at all; after the cooldown a single successful
//! probe closes it again.

#[cfg(test)]
mod tests {
    use crate::harness::TabHarness;
    use shared_store::keys::LEADER_KEY;
    use shared_store::{FaultMode, SharedStore};
    use shared_types::LeadershipRecord;
    use std::time::Duration;
    use tc_01_circuit_breaker::CircuitStatus;
    use tc_03_leader_election::ElectionRole;

    #[tokio::test]
    async fn test_breaker_opens_fails_fast_and_recovers() {
        let harness = TabHarness::with_channel(1);
        harness.start_all().await;
        let tab = harness.tab(0);
        assert!(tab.is_leader());
        assert_eq!(tab.store_status(), CircuitStatus::Closed);

        harness.store.set_fault(FaultMode::Unavailable);
        for _ in 0..3 {
            // Leadership survives in memory while the store is down.
            assert_eq!(tab.elector().check().await, ElectionRole::Leader);
        }
        assert_eq!(tab.store_status(), CircuitStatus::Open);
        assert!(tab.elector().is_degraded());

        // Open: operations are rejected before they reach the store.
        let touched = harness.store.operations();
        for _ in 0..5 {
            tab.elector().check().await;
        }
        assert_eq!(harness.store.operations(), touched);

        // Still cooling down.
        harness.store.set_fault(FaultMode::Healthy);
        harness.advance(Duration::from_secs(29));
        tab.elector().check().await;
        assert_eq!(tab.store_status(), CircuitStatus::Open);

        harness.advance(Duration::from_secs(1));
        assert_eq!(tab.elector().check().await, ElectionRole::Leader);
        assert_eq!(tab.store_status(), CircuitStatus::Closed);
        assert!(!tab.elector().is_degraded());

        let raw = harness.store.get(LEADER_KEY).unwrap().unwrap();
        let record: LeadershipRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.tab_id, *tab.tab_id());
        assert_eq!(record.timestamp, harness.now_ms());

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_failed_probe_reopens() {
        let harness = TabHarness::with_channel(1);
        harness.start_all().await;
        let tab = harness.tab(0);

        harness.store.set_fault(FaultMode::Unavailable);
        for _ in 0..3 {
            tab.elector().check().await;
        }
        assert_eq!(tab.store_status(), CircuitStatus::Open);

        harness.advance(Duration::from_secs(30));
        tab.elector().check().await;
        assert_eq!(tab.store_status(), CircuitStatus::Open);

        // The failed probe restarted the cooldown.
        harness.store.set_fault(FaultMode::Healthy);
        harness.advance(Duration::from_secs(10));
        tab.elector().check().await;
        assert_eq!(tab.store_status(), CircuitStatus::Open);

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_quota_exceeded_trips_breaker_on_writes() {
        let harness = TabHarness::with_channel(1);
        harness.start_all().await;
        let tab = harness.tab(0);

        // Reads succeed, renewals fail.
        harness.store.set_fault(FaultMode::QuotaExceeded);
        for _ in 0..3 {
            harness.advance(Duration::from_secs(5));
            tab.elector().check().await;
        }
        assert_eq!(tab.store_status(), CircuitStatus::Open);
        assert!(tab.is_leader());

        harness.stop_all().await;
    }
}
