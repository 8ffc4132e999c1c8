//! # Store-Only Operation
//!
//! Without a push transport tabs coordinate purely through shared store
//! polling, and the leader polls the server for auth events in their
//! place. Five consecutive poll failures followed by a failed refresh stop
//! the leader for good.

#[cfg(test)]
mod tests {
    use crate::harness::{eventually, ApiReply, TabHarness};
    use coordinator_runtime::LifecycleState;
    use serde_json::json;
    use shared_bus::TransportKind;
    use shared_types::{MessageType, ServerEvent, TabId};
    use std::time::Duration;
    use tc_05_fallback_poller::PollOutcome;

    fn journal_has(harness: &TabHarness, tab: usize, t: MessageType) -> bool {
        harness.tab(tab).journal().iter().any(|e| e.event_type == t)
    }

    // =========================================================================
    // COORDINATION OVER THE STORE
    // =========================================================================

    #[tokio::test]
    async fn test_election_and_messaging_over_store() {
        let harness = TabHarness::store_only(3);
        harness.start_all().await;

        assert_eq!(harness.leaders(), vec![TabId::from("tab-0")]);
        for i in 0..3 {
            assert_eq!(harness.tab(i).active_transport(), Some(TransportKind::Storage));
        }

        harness
            .tab(2)
            .bus()
            .publish(MessageType::UserActivity, json!({ "from": 2 }))
            .await;
        let delivered = eventually(Duration::from_secs(1), || {
            journal_has(&harness, 0, MessageType::UserActivity)
                && journal_has(&harness, 1, MessageType::UserActivity)
        })
        .await;
        assert!(delivered);

        harness.stop_all().await;
    }

    // =========================================================================
    // FALLBACK POLLING
    // =========================================================================

    #[tokio::test]
    async fn test_only_leader_polls() {
        let harness = TabHarness::store_only(2);
        harness.start_all().await;

        assert_eq!(harness.tab(1).poller().poll_once().await, PollOutcome::NotLeader);
        assert_eq!(harness.tab(0).poller().poll_once().await, PollOutcome::Delivered(0));
        assert_eq!(harness.api.event_calls(), 1);

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_server_events_reach_followers() {
        let harness = TabHarness::store_only(2);
        harness.start_all().await;
        let now = harness.now_ms();
        harness.api.push_event(ServerEvent {
            event_type: "auth:state-changed".into(),
            payload: json!({ "state": "mfa-verified" }),
            timestamp: now + 2,
        });
        harness.api.push_event(ServerEvent {
            event_type: "unknown:event".into(),
            payload: json!({}),
            timestamp: now + 1,
        });

        assert_eq!(harness.tab(0).poller().poll_once().await, PollOutcome::Delivered(1));
        let delivered = eventually(Duration::from_secs(1), || {
            journal_has(&harness, 1, MessageType::AuthStateChanged)
        })
        .await;
        assert!(delivered);

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_exhaustion_with_failed_refresh_halts_leader() {
        let harness = TabHarness::store_only(2);
        harness.start_all().await;
        harness.api.set_events_reply(ApiReply::ServerError);
        harness.api.set_refresh_fails(true);
        let leader = harness.tab(0);

        for attempt in 1..5 {
            assert_eq!(
                leader.poller().poll_once().await,
                PollOutcome::Failed { attempts: attempt }
            );
        }
        assert_eq!(leader.poller().poll_once().await, PollOutcome::Exhausted);
        assert_eq!(leader.poller().poll_once().await, PollOutcome::Stopped);

        let halted = eventually(Duration::from_secs(2), || {
            leader.state() == LifecycleState::Halted
        })
        .await;
        assert!(halted);

        let follower_informed = eventually(Duration::from_secs(1), || {
            journal_has(&harness, 1, MessageType::FallbackFailed)
                && journal_has(&harness, 1, MessageType::SessionExpired)
        })
        .await;
        assert!(follower_informed);
        assert_eq!(harness.tab(1).state(), LifecycleState::Running);

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_exhaustion_with_successful_refresh_rearms_poller() {
        let harness = TabHarness::store_only(1);
        harness.start_all().await;
        harness.api.set_events_reply(ApiReply::ServerError);
        let leader = harness.tab(0);

        for _ in 0..5 {
            leader.poller().poll_once().await;
        }
        let rearmed = eventually(Duration::from_secs(2), || {
            !leader.poller().is_exhausted() && leader.poller().attempts() == 0
        })
        .await;
        assert!(rearmed);
        assert_eq!(leader.state(), LifecycleState::Running);
        assert_eq!(harness.api.refresh_calls(), 1);

        harness.api.set_events_reply(ApiReply::Ok);
        assert_eq!(leader.poller().poll_once().await, PollOutcome::Delivered(0));

        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_unauthorized_poll_refreshes_immediately() {
        let harness = TabHarness::store_only(1);
        harness.start_all().await;
        harness.api.set_events_reply(ApiReply::Unauthorized);

        assert_eq!(
            harness.tab(0).poller().poll_once().await,
            PollOutcome::Unauthorized {
                refreshed: true,
                attempts: 1
            }
        );
        assert_eq!(harness.api.refresh_calls(), 1);
        assert_eq!(harness.tab(0).poller().attempts(), 0);

        harness.stop_all().await;
    }
}
