//! # Token Refresh Across Tabs
//!
//! However many tabs ask for a refresh at once, the browser makes one
//! network call; every caller sees its outcome; followers pick up the new
//! expiry from the leader's broadcast.

#[cfg(test)]
mod tests {
    use crate::harness::{eventually, HarnessOptions, TabHarness};
    use futures::future::join_all;
    use shared_types::MessageType;
    use std::time::Duration;
    use tc_04_token_refresh::CredentialStore;

    // =========================================================================
    // SINGLE FLIGHT
    // =========================================================================

    #[tokio::test]
    async fn test_concurrent_refreshes_make_one_network_call() {
        let harness = TabHarness::with_channel(3);
        harness.start_all().await;
        harness.api.set_refresh_delay(Duration::from_millis(200));
        let granted = harness.now_ms() + 7_200_000;
        harness.api.set_granted_expiry(granted);

        let calls = (0..3).flat_map(|i| (0..4).map(move |_| i));
        let results = join_all(calls.map(|i| harness.tab(i).refresh())).await;

        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|ok| *ok));
        assert_eq!(harness.api.refresh_calls(), 1);
        assert_eq!(harness.tab(0).refresh_coordinator().network_calls(), 1);
        for i in 0..3 {
            assert_eq!(harness.credentials(i).expires_at(), Some(granted));
            assert!(!harness.tab(i).refresh_coordinator().is_in_flight());
        }

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_follower_refresh_is_answered_by_leader() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;

        assert!(harness.tab(1).refresh().await);
        assert_eq!(harness.api.refresh_calls(), 1);
        assert_eq!(harness.tab(1).refresh_coordinator().network_calls(), 0);

        // A second request finds the refresh already done and is answered
        // with a rebroadcast.
        assert!(harness.tab(1).refresh().await);
        assert_eq!(harness.api.refresh_calls(), 1);
        let rebroadcasts = harness
            .tab(1)
            .bus()
            .journal()
            .replay(Some(MessageType::TokensRefreshed))
            .len();
        assert_eq!(rebroadcasts, 2);

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_expires_every_tab() {
        let harness = TabHarness::with_channel(3);
        harness.start_all().await;
        harness.api.set_refresh_fails(true);

        assert!(!harness.tab(0).refresh().await);
        let cleared = eventually(Duration::from_secs(1), || {
            (0..3).all(|i| harness.credentials(i).expires_at().is_none())
        })
        .await;
        assert!(cleared);
        for i in 1..3 {
            let expired = harness
                .tab(i)
                .bus()
                .journal()
                .latest(MessageType::SessionExpired)
                .unwrap();
            assert_eq!(expired.payload["reason"], "refresh_failed");
        }

        harness.stop_all().await;
    }

    // =========================================================================
    // PROACTIVE REFRESH
    // =========================================================================

    #[tokio::test]
    async fn test_leader_refreshes_one_minute_before_expiry() {
        let harness = TabHarness::new(HarnessOptions {
            tabs: 2,
            session_ttl: Duration::from_secs(90),
            ..HarnessOptions::default()
        });
        harness.start_all().await;
        let granted = harness.now_ms() + 3_600_000;
        harness.api.set_granted_expiry(granted);

        // 90s left: not yet due.
        assert_eq!(harness.tab(0).refresh_coordinator().refresh_if_due().await, None);

        // 60s left: due on the leader only.
        harness.advance(Duration::from_secs(30));
        assert_eq!(harness.tab(1).refresh_coordinator().refresh_if_due().await, None);
        assert_eq!(
            harness.tab(0).refresh_coordinator().refresh_if_due().await,
            Some(true)
        );
        assert_eq!(harness.api.refresh_calls(), 1);

        let updated = eventually(Duration::from_secs(1), || {
            harness.credentials(1).expires_at() == Some(granted)
        })
        .await;
        assert!(updated, "follower did not apply the leader's broadcast");
        assert_eq!(harness.tab(1).refresh_coordinator().network_calls(), 0);

        // The new expiry is far away again.
        assert_eq!(harness.tab(0).refresh_coordinator().refresh_if_due().await, None);

        harness.stop_all().await;
    }
}
