//! # Session Lifecycle Across Tabs

#[cfg(test)]
mod tests {
    use crate::harness::{eventually, TabHarness};
    use coordinator_runtime::LifecycleState;
    use parking_lot::Mutex;
    use shared_store::keys::SESSION_SNAPSHOT_KEY;
    use shared_store::SharedStore;
    use shared_types::{MessageType, SessionSnapshot};
    use std::sync::Arc;
    use std::time::Duration;
    use tc_04_token_refresh::CredentialStore;

    fn snapshot(harness: &TabHarness) -> SessionSnapshot {
        let raw = harness.store.get(SESSION_SNAPSHOT_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn test_start_shares_validated_session() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;

        let snapshot = snapshot(&harness);
        assert!(snapshot.authenticated);
        assert_eq!(snapshot.user_id.as_deref(), Some("user-1"));
        for i in 0..2 {
            assert_eq!(harness.credentials(i).expires_at(), snapshot.expires_at);
            assert_eq!(harness.tab(i).state(), LifecycleState::Running);
        }

        harness.stop_all().await;
        assert_eq!(harness.tab(0).state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_logout_reaches_every_tab() {
        let harness = TabHarness::with_channel(3);
        harness.start_all().await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let subscriptions: Vec<_> = (1..3)
            .map(|i| {
                let seen = Arc::clone(&seen);
                let tab = harness.tab(i).tab_id().clone();
                harness.tab(i).subscribe(MessageType::Logout, move |message| {
                    seen.lock().push((tab.clone(), message.source_tab_id.clone()));
                })
            })
            .collect();

        harness.tab(0).logout().await;

        let delivered = eventually(Duration::from_secs(1), || seen.lock().len() == 2).await;
        assert!(delivered);
        assert!(seen
            .lock()
            .iter()
            .all(|(_, source)| source == harness.tab(0).tab_id()));
        let cleared = eventually(Duration::from_secs(1), || {
            (0..3).all(|i| harness.credentials(i).expires_at().is_none())
        })
        .await;
        assert!(cleared);
        assert!(!snapshot(&harness).authenticated);

        drop(subscriptions);
        harness.stop_all().await;
    }

    #[tokio::test]
    async fn test_late_subscriber_replays_journal() {
        let harness = TabHarness::with_channel(2);
        harness.start_all().await;
        harness.tab(0).logout().await;
        let arrived = eventually(Duration::from_secs(1), || {
            harness
                .tab(1)
                .journal()
                .iter()
                .any(|e| e.event_type == MessageType::Logout)
        })
        .await;
        assert!(arrived);

        let replayed = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&replayed);
        let _sub = harness
            .tab(1)
            .subscribe_with_replay(MessageType::Logout, move |_| *counter.lock() += 1);
        assert_eq!(*replayed.lock(), 1);

        harness.stop_all().await;
    }
}
