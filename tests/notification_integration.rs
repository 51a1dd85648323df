//! Integration tests for notification delivery and Telegram commands
//!
//! Telegram is served by a mock server; notifier fan-out uses mockall.
//!
//! To run these tests:
//! ```
//! cargo test --test notification_integration
//! ```

mod common;

use async_trait::async_trait;
use mockall::mock;
use rust_decimal_macros::dec;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{paper, spot_config, start_time, Harness};
use threshold_trader::common::channels::{create_event_channel, spawn_dispatcher};
use threshold_trader::common::errors::Result;
use threshold_trader::config::types::TelegramConfig;
use threshold_trader::{
    CommandHandler, CommandListener, Engine, ManualClock, Notifier, NotificationEvent,
    PaperExchange, TelegramClient, TelegramNotifier, TraderError,
};

mock! {
    pub Sink {}

    #[async_trait]
    impl Notifier for Sink {
        async fn send(&self, event: &NotificationEvent) -> Result<()>;
        fn channel_name(&self) -> &'static str;
    }
}

const TOKEN: &str = "123:abc";
const CHAT_ID: &str = "42";

fn telegram_config(server: &MockServer) -> TelegramConfig {
    TelegramConfig {
        enabled: true,
        token: TOKEN.to_string(),
        chat_id: CHAT_ID.to_string(),
        api_url: server.uri(),
        poll_timeout_secs: 0,
    }
}

fn failure_event() -> NotificationEvent {
    NotificationEvent::OperationFailed {
        operation: "get_price".into(),
        symbol: Some("SOLUSDT".into()),
        error: "Network error: reset".into(),
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[tokio::test]
async fn test_failing_channel_does_not_block_others() {
    let mut broken = MockSink::new();
    broken
        .expect_send()
        .times(2)
        .returning(|_| Err(TraderError::Network("down".into())));
    broken.expect_channel_name().return_const("broken");

    let mut healthy = MockSink::new();
    healthy.expect_send().times(2).returning(|_| Ok(()));
    healthy.expect_channel_name().return_const("healthy");

    let (events, receiver) = create_event_channel();
    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(broken), Arc::new(healthy)];
    let handle = spawn_dispatcher(receiver, notifiers);

    events.publish(failure_event());
    events.publish(NotificationEvent::SymbolDisabled {
        symbol: "NOPEUSDT".into(),
        reason: "Invalid symbol".into(),
    });
    drop(events);

    // Mock expectations are verified when the dispatcher drops them
    assert!(handle.await.is_ok());
}

#[tokio::test]
async fn test_startup_failure_reaches_notifiers() {
    let mut sink = MockSink::new();
    sink.expect_send()
        .withf(|e| matches!(e, NotificationEvent::SymbolDisabled { symbol, .. } if symbol == "SOLUSDT"))
        .times(1)
        .returning(|_| Ok(()));
    sink.expect_send()
        .withf(|e| {
            matches!(
                e,
                NotificationEvent::OperationFailed { operation, error, .. }
                    if operation == "startup" && error.contains("no tradable symbols")
            )
        })
        .times(1)
        .returning(|_| Ok(()));
    sink.expect_channel_name().return_const("sink");

    let (events, receiver) = create_event_channel();
    let handle = spawn_dispatcher(receiver, vec![Arc::new(sink)]);

    // No quote for SOLUSDT: the only symbol fails validation
    let exchange = Arc::new(PaperExchange::new("USDT", dec!(1000), dec!(0)));
    let clock = Arc::new(ManualClock::new(start_time()));
    let mut engine = Engine::new(spot_config(""), exchange, clock, events).with_store(None);
    let err = engine.startup().await.unwrap_err();
    assert!(matches!(err, TraderError::ConfigInvalid(_)));

    // Dropping the engine closes the channel; the dispatcher drains what was queued
    drop(engine);
    assert!(handle.await.is_ok());
}

// ============================================================================
// Telegram
// ============================================================================

#[tokio::test]
async fn test_notifier_posts_rendered_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TOKEN)))
        .and(body_string_contains("\"chat_id\":\"42\""))
        .and(body_string_contains("SOLUSDT"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true,"result":{}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let notifier = TelegramNotifier::new(TelegramClient::new(&telegram_config(&server)).unwrap());
    notifier.send(&failure_event()).await.unwrap();
    assert_eq!(notifier.channel_name(), "telegram");
}

#[tokio::test]
async fn test_telegram_rate_limit_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TOKEN)))
        .respond_with(ResponseTemplate::new(429).set_body_string(
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 3"}"#,
        ))
        .mount(&server)
        .await;

    let client = TelegramClient::new(&telegram_config(&server)).unwrap();
    let err = client.send_message("hello").await.unwrap_err();
    assert!(matches!(err, TraderError::RateLimit { .. }));
}

#[tokio::test]
async fn test_listener_answers_only_configured_chat() {
    let server = MockServer::start().await;
    let updates = r#"{
        "ok": true,
        "result": [
            {"update_id": 10, "message": {"message_id": 1, "chat": {"id": 7}, "text": "/balance"}},
            {"update_id": 11, "message": {"message_id": 2, "chat": {"id": 42}, "text": "hello"}},
            {"update_id": 12, "message": {"message_id": 3, "chat": {"id": 42}, "text": "/trades"}}
        ]
    }"#;
    Mock::given(method("GET"))
        .and(path(format!("/bot{}/getUpdates", TOKEN)))
        .respond_with(ResponseTemplate::new(200).set_body_string(updates))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/bot{}/sendMessage", TOKEN)))
        .and(body_string_contains("Total number of trades: 1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true,"result":{}}"#))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::start(spot_config(""), paper(dec!(1000))).await;
    harness.tick_at(dec!(100)).await;
    harness.tick_at(dec!(98.9)).await;

    let handler = CommandHandler::new(
        harness.engine.portfolio(),
        harness.engine.orders(),
        harness.engine.monitors(),
        harness.clock.clone(),
    );
    let client = TelegramClient::new(&telegram_config(&server)).unwrap();
    let mut listener = CommandListener::new(client, handler);

    let replies = listener.poll_once().await.unwrap();
    assert_eq!(replies, 1);
}
