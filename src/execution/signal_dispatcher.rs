use serde_json::Value;

use crate::execution::order_controller::{LifecycleOutcome, OrderController};
use crate::models::{Signal, SignalEvent};

/// Feeds new signals to the controller, dropping repeats
pub struct SignalDispatcher {
    controller: OrderController,
    last_text: Option<String>,
}

impl SignalDispatcher {
    pub fn new(controller: OrderController) -> Self {
        Self {
            controller,
            last_text: None,
        }
    }

    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }

    /// Entry point for subscription events; only `put`/`patch` are processed
    pub async fn handle_event(&mut self, event: &SignalEvent) -> Option<LifecycleOutcome> {
        tracing::debug!(event = %event.event, path = %event.path, "Signal update event");
        if !event.is_actionable() {
            return None;
        }
        self.process(&event.data).await
    }

    /// Dispatch a raw signal payload
    ///
    /// Returns `None` when the payload is malformed or repeats the text of
    /// the last accepted signal.
    pub async fn process(&mut self, payload: &Value) -> Option<LifecycleOutcome> {
        let signal = match Signal::from_payload(payload) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!("Dropping signal payload: {}", e);
                return None;
            }
        };

        if self.last_text.as_deref() == Some(signal.text.as_str()) {
            tracing::debug!("Duplicate signal: {}", signal.text);
            return None;
        }

        // Recorded before dispatch so a repeat during processing is dropped
        self.last_text = Some(signal.text.clone());
        tracing::info!(text = %signal.text, price = ?signal.price, "New signal");

        let outcome = self.controller.handle(&signal).await;
        tracing::info!(action = ?outcome.action, "Signal handled: {}", outcome.reason);
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradingSettings;
    use crate::execution::order_controller::LifecycleAction;
    use crate::execution::{PriceFeed, TradeManager};
    use crate::testing::{FakeGateway, MemorySink};
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher(gateway: Arc<FakeGateway>) -> SignalDispatcher {
        let trades = TradeManager::new(gateway.clone(), Arc::new(MemorySink::default()), "MAIN");
        let settings = TradingSettings {
            settle_delay_secs: 0,
            ..TradingSettings::default()
        };
        SignalDispatcher::new(OrderController::new(gateway, trades, PriceFeed::new(), settings))
    }

    #[tokio::test]
    async fn test_duplicate_text_is_dispatched_once() {
        let gateway = Arc::new(FakeGateway::new());
        let mut dispatcher = dispatcher(gateway.clone());
        let payload = json!({ "last_signal": { "text": "buy", "price": 50000 } });

        assert!(dispatcher.process(&payload).await.is_some());
        assert!(dispatcher.process(&payload).await.is_none());
        assert_eq!(gateway.created_orders().len(), 1);

        // Same text with a different price is still a repeat
        let repriced = json!({ "last_signal": { "text": "buy", "price": 51000 } });
        assert!(dispatcher.process(&repriced).await.is_none());
    }

    #[tokio::test]
    async fn test_new_text_after_repeat_is_dispatched() {
        let gateway = Arc::new(FakeGateway::new());
        let mut dispatcher = dispatcher(gateway.clone());

        dispatcher.process(&json!({ "text": "buy", "price": 50000 })).await;
        let outcome = dispatcher
            .process(&json!({ "text": "tp reached" }))
            .await
            .unwrap();

        assert_eq!(outcome.action, LifecycleAction::Closed { count: 0 });
        assert_eq!(dispatcher.last_text(), Some("tp reached"));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let gateway = Arc::new(FakeGateway::new());
        let mut dispatcher = dispatcher(gateway.clone());

        assert!(dispatcher.process(&json!({ "price": 1 })).await.is_none());
        assert!(dispatcher.process(&Value::Null).await.is_none());
        assert_eq!(dispatcher.last_text(), None);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_text_is_remembered() {
        let gateway = Arc::new(FakeGateway::new());
        let mut dispatcher = dispatcher(gateway.clone());

        let outcome = dispatcher.process(&json!({ "text": "wait" })).await.unwrap();
        assert_eq!(outcome.action, LifecycleAction::Skip);
        assert_eq!(dispatcher.last_text(), Some("wait"));
    }

    #[tokio::test]
    async fn test_only_put_and_patch_events_are_processed() {
        let gateway = Arc::new(FakeGateway::new());
        let mut dispatcher = dispatcher(gateway.clone());
        let data = json!({ "text": "short", "price": 50000 });

        let keep_alive = SignalEvent {
            event: "keep-alive".to_string(),
            path: "/".to_string(),
            data: data.clone(),
        };
        assert!(dispatcher.handle_event(&keep_alive).await.is_none());

        let patch = SignalEvent {
            event: "patch".to_string(),
            path: "/".to_string(),
            data,
        };
        assert!(dispatcher.handle_event(&patch).await.is_some());
    }
}
