//! In-process wait/notify engine.
//!
//! `WaitNotifyEngine` keeps registrations, early responses and consumed keys
//! behind one `tokio::sync::Mutex`. Callbacks always run after the lock is
//! released, so a callback may re-enter the engine (register a new wait or
//! deliver another response) without deadlocking.
//!
//! Consumed keys and unclaimed early responses are kept for a retention
//! window and pruned on every registration and delivery.

use std::collections::HashMap;
use std::time::Duration;

use conductor_types::notify::{ResponseData, ResponseMap};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use super::{BoxNotifyCallback, Waiter, WaiterError};

/// How long a fired or cancelled key keeps dropping redeliveries.
pub const DEFAULT_KEY_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct Delivery {
    data: ResponseData,
    is_error: bool,
    received_at: Instant,
}

#[derive(Debug)]
struct Registration {
    keys: Vec<String>,
    received: HashMap<String, Delivery>,
    callback: BoxNotifyCallback,
}

impl Registration {
    fn is_complete(&self) -> bool {
        self.keys.iter().all(|k| self.received.contains_key(k))
    }
}

#[derive(Debug, Default)]
struct WaitState {
    registrations: HashMap<String, Registration>,
    /// Correlation key -> wait id.
    key_index: HashMap<String, String>,
    /// Responses delivered before any registration claimed their key.
    early: HashMap<String, Delivery>,
    /// Keys whose registration fired or was cancelled, with the time it
    /// happened. Further deliveries are dropped.
    consumed: HashMap<String, Instant>,
}

impl WaitState {
    fn prune(&mut self, retention: Duration) {
        let Some(cutoff) = Instant::now().checked_sub(retention) else {
            return;
        };
        self.consumed.retain(|_, at| *at > cutoff);
        self.early.retain(|_, d| d.received_at > cutoff);
    }

    /// Drop the registration `wait_id` and mark its keys consumed.
    fn remove_registration(&mut self, wait_id: &str) -> Option<Registration> {
        let registration = self.registrations.remove(wait_id)?;
        let now = Instant::now();
        for key in &registration.keys {
            self.key_index.remove(key);
            self.consumed.insert(key.clone(), now);
        }
        Some(registration)
    }
}

/// A registration whose keys are all satisfied, ready to be fired.
struct Ready {
    wait_id: String,
    callback: BoxNotifyCallback,
    responses: ResponseMap,
    has_error: bool,
}

impl Ready {
    fn take(wait_id: String, registration: Registration) -> Self {
        let has_error = registration.received.values().any(|d| d.is_error);
        let responses = registration
            .received
            .into_iter()
            .map(|(k, d)| (k, d.data))
            .collect();
        Self {
            wait_id,
            callback: registration.callback,
            responses,
            has_error,
        }
    }

    async fn fire(self) {
        tracing::debug!(
            wait_id = %self.wait_id,
            keys = self.responses.len(),
            has_error = self.has_error,
            "firing wait registration"
        );
        if self.has_error {
            self.callback.notify_error(self.responses).await;
        } else {
            self.callback.notify(self.responses).await;
        }
    }
}

/// In-process `Waiter` with exactly-once firing over at-least-once delivery.
#[derive(Debug)]
pub struct WaitNotifyEngine {
    state: Mutex<WaitState>,
    retention: Duration,
}

impl Default for WaitNotifyEngine {
    fn default() -> Self {
        Self::with_retention(DEFAULT_KEY_RETENTION)
    }
}

impl WaitNotifyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that forgets consumed keys and unclaimed early responses
    /// after `retention`.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            state: Mutex::new(WaitState::default()),
            retention,
        }
    }

    /// Consumed keys plus unclaimed early responses still held.
    pub async fn retained_keys(&self) -> usize {
        let state = self.state.lock().await;
        state.consumed.len() + state.early.len()
    }

    /// Keys registered but still without a response, sorted.
    pub async fn pending_keys(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut keys: Vec<String> = state
            .registrations
            .values()
            .flat_map(|r| r.keys.iter().filter(|k| !r.received.contains_key(*k)))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Number of registrations that have not fired yet.
    pub async fn registration_count(&self) -> usize {
        self.state.lock().await.registrations.len()
    }

    async fn deliver(&self, key: &str, data: ResponseData, is_error: bool) {
        let ready = {
            let mut state = self.state.lock().await;
            state.prune(self.retention);

            if state.consumed.contains_key(key) {
                tracing::debug!(key, "dropping response for already fired wait");
                return;
            }

            let delivery = Delivery {
                data,
                is_error,
                received_at: Instant::now(),
            };
            let Some(wait_id) = state.key_index.get(key).cloned() else {
                if state.early.contains_key(key) {
                    tracing::debug!(key, "dropping redelivered early response");
                } else {
                    tracing::debug!(key, "retaining response with no registration yet");
                    state.early.insert(key.to_string(), delivery);
                }
                return;
            };

            let complete = match state.registrations.get_mut(&wait_id) {
                Some(registration) => {
                    if registration.received.contains_key(key) {
                        tracing::debug!(key, wait_id = %wait_id, "dropping redelivered response");
                        return;
                    }
                    registration.received.insert(key.to_string(), delivery);
                    registration.is_complete()
                }
                None => false,
            };

            if !complete {
                return;
            }
            Self::complete(&mut state, wait_id)
        };

        if let Some(ready) = ready {
            ready.fire().await;
        }
    }

    /// Remove a complete registration from the index and mark its keys consumed.
    fn complete(state: &mut WaitState, wait_id: String) -> Option<Ready> {
        let registration = state.remove_registration(&wait_id)?;
        Some(Ready::take(wait_id, registration))
    }
}

impl Waiter for WaitNotifyEngine {
    async fn register_callback(
        &self,
        keys: Vec<String>,
        callback: BoxNotifyCallback,
    ) -> Result<String, WaiterError> {
        let mut unique = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        if unique.is_empty() {
            return Err(WaiterError::NoKeys);
        }

        let wait_id = Uuid::now_v7().to_string();
        let ready = {
            let mut state = self.state.lock().await;
            state.prune(self.retention);

            for key in &unique {
                if state.key_index.contains_key(key) || state.consumed.contains_key(key) {
                    return Err(WaiterError::DuplicateKey(key.clone()));
                }
            }

            let mut received = HashMap::new();
            for key in &unique {
                if let Some(delivery) = state.early.remove(key) {
                    received.insert(key.clone(), delivery);
                }
            }

            for key in &unique {
                state.key_index.insert(key.clone(), wait_id.clone());
            }
            let registration = Registration {
                keys: unique,
                received,
                callback,
            };
            let complete = registration.is_complete();
            state.registrations.insert(wait_id.clone(), registration);

            if complete {
                Self::complete(&mut state, wait_id.clone())
            } else {
                None
            }
        };

        tracing::debug!(wait_id = %wait_id, fired = ready.is_some(), "registered wait");
        if let Some(ready) = ready {
            ready.fire().await;
        }
        Ok(wait_id)
    }

    async fn done_with(&self, correlation_id: &str, data: ResponseData) -> Result<(), WaiterError> {
        self.deliver(correlation_id, data, false).await;
        Ok(())
    }

    async fn done_with_error(
        &self,
        correlation_id: &str,
        data: ResponseData,
    ) -> Result<(), WaiterError> {
        self.deliver(correlation_id, data, true).await;
        Ok(())
    }

    async fn cancel_keys(&self, keys: &[String]) -> usize {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut cancelled = 0;
        for key in keys {
            state.early.remove(key);
            if let Some(wait_id) = state.key_index.get(key).cloned() {
                if state.remove_registration(&wait_id).is_some() {
                    tracing::debug!(wait_id = %wait_id, key = %key, "wait registration cancelled");
                    cancelled += 1;
                }
            }
            state.consumed.insert(key.clone(), now);
        }
        cancelled
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::waiter::NotifyCallback;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(bool, ResponseMap)>>>,
    }

    impl NotifyCallback for Recorder {
        async fn notify(&self, responses: ResponseMap) {
            self.calls.lock().await.push((false, responses));
        }

        async fn notify_error(&self, responses: ResponseMap) {
            self.calls.lock().await.push((true, responses));
        }
    }

    fn keys(ks: &[&str]) -> Vec<String> {
        ks.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn fires_once_after_all_keys_arrive() {
        let waiter = WaitNotifyEngine::new();
        let recorder = Recorder::default();
        waiter
            .register_callback(keys(&["a", "b"]), BoxNotifyCallback::new(recorder.clone()))
            .await
            .unwrap();

        waiter.done_with("a", serde_json::json!(1)).await.unwrap();
        assert!(recorder.calls.lock().await.is_empty());
        assert_eq!(waiter.pending_keys().await, vec!["b".to_string()]);

        waiter.done_with("b", serde_json::json!(2)).await.unwrap();
        let calls = recorder.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].0);
        assert_eq!(calls[0].1["a"], serde_json::json!(1));
        assert_eq!(calls[0].1["b"], serde_json::json!(2));
        drop(calls);

        assert_eq!(waiter.registration_count().await, 0);
    }

    #[tokio::test]
    async fn redelivery_is_dropped() {
        let waiter = WaitNotifyEngine::new();
        let recorder = Recorder::default();
        waiter
            .register_callback(keys(&["a", "b"]), BoxNotifyCallback::new(recorder.clone()))
            .await
            .unwrap();

        waiter.done_with("a", serde_json::json!("first")).await.unwrap();
        waiter.done_with("a", serde_json::json!("second")).await.unwrap();
        waiter.done_with("b", serde_json::json!("b")).await.unwrap();
        waiter.done_with("b", serde_json::json!("again")).await.unwrap();

        let calls = recorder.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["a"], serde_json::json!("first"));
    }

    #[tokio::test]
    async fn early_responses_are_applied_on_register() {
        let waiter = WaitNotifyEngine::new();
        waiter.done_with("a", serde_json::json!("early")).await.unwrap();

        let recorder = Recorder::default();
        waiter
            .register_callback(keys(&["a"]), BoxNotifyCallback::new(recorder.clone()))
            .await
            .unwrap();

        let calls = recorder.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["a"], serde_json::json!("early"));
    }

    #[tokio::test]
    async fn any_error_routes_to_notify_error() {
        let waiter = WaitNotifyEngine::new();
        let recorder = Recorder::default();
        waiter
            .register_callback(keys(&["a", "b"]), BoxNotifyCallback::new(recorder.clone()))
            .await
            .unwrap();

        waiter.done_with("a", serde_json::json!("ok")).await.unwrap();
        waiter
            .done_with_error("b", serde_json::json!({ "error_message": "x" }))
            .await
            .unwrap();

        let calls = recorder.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0);
        assert_eq!(calls[0].1.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_and_empty_registrations_are_rejected() {
        let waiter = WaitNotifyEngine::new();
        waiter
            .register_callback(keys(&["a"]), BoxNotifyCallback::new(Recorder::default()))
            .await
            .unwrap();

        let dup = waiter
            .register_callback(keys(&["a"]), BoxNotifyCallback::new(Recorder::default()))
            .await;
        assert!(matches!(dup, Err(WaiterError::DuplicateKey(_))));

        let empty = waiter
            .register_callback(Vec::new(), BoxNotifyCallback::new(Recorder::default()))
            .await;
        assert!(matches!(empty, Err(WaiterError::NoKeys)));
    }

    #[tokio::test]
    async fn repeated_keys_in_one_registration_count_once() {
        let waiter = WaitNotifyEngine::new();
        let recorder = Recorder::default();
        waiter
            .register_callback(keys(&["a", "a"]), BoxNotifyCallback::new(recorder.clone()))
            .await
            .unwrap();
        waiter.done_with("a", serde_json::json!(null)).await.unwrap();
        assert_eq!(recorder.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_registration_never_fires() {
        let waiter = WaitNotifyEngine::new();
        let recorder = Recorder::default();
        waiter
            .register_callback(keys(&["a", "b"]), BoxNotifyCallback::new(recorder.clone()))
            .await
            .unwrap();

        assert_eq!(waiter.cancel_keys(&keys(&["b"])).await, 1);
        assert_eq!(waiter.registration_count().await, 0);
        assert!(waiter.pending_keys().await.is_empty());

        waiter.done_with("a", serde_json::json!(1)).await.unwrap();
        waiter.done_with("b", serde_json::json!(2)).await.unwrap();
        assert!(recorder.calls.lock().await.is_empty());
        assert_eq!(waiter.cancel_keys(&keys(&["a"])).await, 0);
    }

    #[tokio::test]
    async fn cancelling_unregistered_key_discards_its_early_response() {
        let waiter = WaitNotifyEngine::new();
        waiter.done_with("late", serde_json::json!("x")).await.unwrap();
        assert_eq!(waiter.cancel_keys(&keys(&["late"])).await, 0);

        let dup = waiter
            .register_callback(keys(&["late"]), BoxNotifyCallback::new(Recorder::default()))
            .await;
        assert!(matches!(dup, Err(WaiterError::DuplicateKey(_))));
    }

    #[tokio::test]
    async fn consumed_keys_and_early_responses_expire() {
        let waiter = WaitNotifyEngine::with_retention(Duration::from_millis(20));
        waiter
            .register_callback(keys(&["a"]), BoxNotifyCallback::new(Recorder::default()))
            .await
            .unwrap();
        waiter.done_with("a", serde_json::json!(1)).await.unwrap();
        waiter.done_with("orphan", serde_json::json!(2)).await.unwrap();
        assert_eq!(waiter.retained_keys().await, 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        waiter.done_with("other", serde_json::json!(3)).await.unwrap();
        // Only the response just delivered is left.
        assert_eq!(waiter.retained_keys().await, 1);
    }
}
