//! Reporting: outbound events, the log sink and chat command replies

mod commands;
mod events;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::common::errors::Result;
use crate::common::traits::Notifier;

pub use commands::{Command, CommandHandler};
pub use events::NotificationEvent;

/// Writes every event to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: &NotificationEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        if event.is_alert() {
            warn!(event = event.name(), %payload, "Notification");
        } else {
            info!(event = event.name(), %payload, "Notification");
        }
        Ok(())
    }

    fn channel_name(&self) -> &'static str {
        "log"
    }
}
