//! # Transport Failover
//!
//! Losing the channel demotes tabs to store polling without losing
//! messages; restoring it promotes them back on the next liveness probe.

#[cfg(test)]
mod tests {
    use crate::harness::{settle, TabHarness};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use shared_bus::{PublishOutcome, TransportKind};
    use shared_store::FaultMode;
    use shared_types::MessageType;
    use std::time::Duration;

    // =========================================================================
    // DEMOTION AND PROMOTION
    // =========================================================================

    #[tokio::test]
    async fn test_channel_loss_falls_back_to_store() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;
        let hub = harness.hub.clone().unwrap();
        assert_eq!(harness.tab(0).active_transport(), Some(TransportKind::Channel));
        assert_eq!(harness.tab(1).active_transport(), Some(TransportKind::Channel));

        let mut inbox = harness.tab(1).listen(MessageType::UserActivity);
        hub.close();

        // The receiver notices on its liveness probe; the sender on its
        // next publish.
        assert_eq!(
            harness.tab(1).bus().probe_transports().await,
            Some(TransportKind::Storage)
        );
        let outcome = harness
            .tab(0)
            .bus()
            .publish(MessageType::UserActivity, json!({ "seq": 1 }))
            .await;
        assert_eq!(outcome, PublishOutcome::FellBack(TransportKind::Storage));

        let received = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .expect("message should arrive over the store")
            .unwrap();
        assert_eq!(received.payload["seq"], 1);
        assert_eq!(received.source_tab_id, *harness.tab(0).tab_id());

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_restored_channel_is_promoted() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;
        let hub = harness.hub.clone().unwrap();

        hub.close();
        for i in 0..2 {
            harness.tab(i).bus().probe_transports().await;
            assert!(harness.tab(i).bus().is_store_only());
        }

        hub.reopen();
        for i in 0..2 {
            assert_eq!(
                harness.tab(i).bus().probe_transports().await,
                Some(TransportKind::Channel)
            );
        }
        assert_eq!(harness.tab(0).bus().stats().promotions, 1);

        let mut inbox = harness.tab(1).listen(MessageType::UserActivity);
        let outcome = harness
            .tab(0)
            .bus()
            .publish(MessageType::UserActivity, json!({ "seq": 2 }))
            .await;
        assert_eq!(outcome, PublishOutcome::Delivered(TransportKind::Channel));
        let received = tokio::time::timeout(Duration::from_secs(1), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.payload["seq"], 2);

        harness.stop_all().await;
    }

    // =========================================================================
    // RANDOM FAULTS
    // =========================================================================

    /// Whatever the channel and store do, a tab always has a transport
    /// while the store connector exists, and local subscribers always see
    /// their own publishes.
    #[tokio::test]
    async fn test_random_faults_never_leave_tab_without_transport() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;
        let hub = harness.hub.clone().unwrap();
        let mut rng = StdRng::seed_from_u64(0x7ab5);
        let mut local = harness.tab(0).listen(MessageType::UserActivity);

        for step in 0..40u32 {
            match rng.gen_range(0..6) {
                0 => hub.close(),
                1 => hub.reopen(),
                2 => harness.store.set_fault(FaultMode::Unavailable),
                3 => harness.store.set_fault(FaultMode::Healthy),
                4 => harness.advance(Duration::from_secs(rng.gen_range(1..40))),
                _ => {
                    let tab = rng.gen_range(0..2);
                    harness.tab(tab).bus().probe_transports().await;
                }
            }

            let outcome = harness
                .tab(0)
                .bus()
                .publish(MessageType::UserActivity, json!({ "step": step }))
                .await;
            let echoed = local.try_recv().expect("local echo is synchronous");
            assert_eq!(echoed.payload["step"], step);

            if outcome == PublishOutcome::LocalOnly {
                // Only the store itself can refuse; the bus still holds it.
                assert_eq!(harness.tab(0).active_transport(), Some(TransportKind::Storage));
            }
            for i in 0..2 {
                assert!(
                    harness.tab(i).active_transport().is_some(),
                    "tab {i} lost every transport at step {step}"
                );
            }
        }

        harness.stop_all().await;
    }
}
