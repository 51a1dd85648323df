//! Channel type definitions for inter-task communication

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::Notifier;
use crate::reporting::NotificationEvent;

/// Default channel buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Push side of the notification channel
///
/// Publishing never waits: when the buffer is full or the dispatcher is gone
/// the event is dropped with a warning.
#[derive(Debug, Clone)]
pub struct EventSender {
    inner: mpsc::Sender<NotificationEvent>,
}

impl EventSender {
    pub fn publish(&self, event: NotificationEvent) {
        if let Err(e) = self.inner.try_send(event) {
            warn!("Dropping notification: {}", e);
        }
    }
}

/// Create a new notification channel with the default buffer size
pub fn create_event_channel() -> (EventSender, mpsc::Receiver<NotificationEvent>) {
    create_event_channel_with_size(DEFAULT_CHANNEL_SIZE)
}

/// Create a new notification channel with a custom buffer size
pub fn create_event_channel_with_size(
    size: usize,
) -> (EventSender, mpsc::Receiver<NotificationEvent>) {
    let (tx, rx) = mpsc::channel(size);
    (EventSender { inner: tx }, rx)
}

/// Drain events into the given notifiers until every sender is dropped
pub fn spawn_dispatcher(
    mut receiver: mpsc::Receiver<NotificationEvent>,
    notifiers: Vec<Arc<dyn Notifier>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            for notifier in &notifiers {
                match notifier.send(&event).await {
                    Ok(()) => debug!(channel = notifier.channel_name(), "Notification delivered"),
                    Err(e) => warn!(
                        channel = notifier.channel_name(),
                        "Notification delivery failed: {}", e
                    ),
                }
            }
        }
        debug!("Notification dispatcher stopped");
    })
}
