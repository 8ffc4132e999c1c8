//! # Inbound Message Validation
//!
//! A tab whose clock lags (a suspended tab waking up, say) must not be able
//! to steal leadership or replay old tokens with its stale messages.

#[cfg(test)]
mod tests {
    use crate::harness::{eventually, TabHarness};
    use serde_json::json;
    use shared_bus::{ChannelConnector, MessageBus, PublishOutcome, TransportKind};
    use shared_types::{CoordinationMessage, ManualClock, MessageError, MessageType, TabId};
    use std::sync::Arc;
    use std::time::Duration;
    use tc_04_token_refresh::CredentialStore;

    fn foreign(harness: &TabHarness, t: MessageType, timestamp: u64) -> CoordinationMessage {
        CoordinationMessage::new(t, json!({}), TabId::from("tab-x"), timestamp)
    }

    #[tokio::test]
    async fn test_validation_rules() {
        let harness = TabHarness::with_channel(1);
        harness.start_all().await;
        let bus = harness.tab(0).bus();
        let now = harness.now_ms();

        let stale = foreign(&harness, MessageType::UserActivity, now - 30_001);
        assert!(matches!(bus.accept(stale), Err(MessageError::Stale { .. })));

        let edge = foreign(&harness, MessageType::UserActivity, now - 30_000);
        assert!(bus.accept(edge).is_ok());

        let future = foreign(&harness, MessageType::UserActivity, now + 5_001);
        assert!(matches!(bus.accept(future), Err(MessageError::FromFuture { .. })));

        let fresh = foreign(&harness, MessageType::AuthStateChanged, now);
        assert!(bus.accept(fresh.clone()).is_ok());
        assert_eq!(bus.accept(fresh), Err(MessageError::Duplicate));

        let own = CoordinationMessage::new(
            MessageType::UserActivity,
            json!({}),
            harness.tab(0).tab_id().clone(),
            now,
        );
        assert_eq!(bus.accept(own), Err(MessageError::FromSelf));

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_lagging_tab_cannot_steal_leadership() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;
        let hub = harness.hub.clone().unwrap();

        let lagging_clock = Arc::new(ManualClock::new(harness.now_ms() - 40_000));
        let lagging = MessageBus::builder(TabId::from("tab-lagging"), lagging_clock.clone())
            .connector(Arc::new(ChannelConnector::new(hub)))
            .build();
        lagging.start().await;

        let rejected_before = harness.tab(1).bus().stats().rejected;
        let outcome = lagging.publish(MessageType::LeaderPing, json!({})).await;
        assert_eq!(outcome, PublishOutcome::Delivered(TransportKind::Channel));
        lagging
            .publish(MessageType::TokensRefreshed, json!({ "expiresAt": 1 }))
            .await;

        let dropped = eventually(Duration::from_secs(1), || {
            harness.tab(1).bus().stats().rejected >= rejected_before + 2
        })
        .await;
        assert!(dropped);
        assert!(harness.tab(0).is_leader());
        assert_eq!(harness.tab(1).leader_id(), Some(TabId::from("tab-0")));
        assert_ne!(harness.credentials(1).expires_at(), Some(1));

        // Once its clock catches up the same tab is heard again.
        lagging_clock.set(harness.now_ms());
        lagging
            .publish(MessageType::UserActivity, json!({ "back": true }))
            .await;
        let heard = eventually(Duration::from_secs(1), || {
            harness
                .tab(1)
                .journal()
                .iter()
                .any(|e| e.event_type == MessageType::UserActivity && e.source == "tab-lagging")
        })
        .await;
        assert!(heard);

        lagging.stop().await;
        harness.stop_all().await;
    }
}
