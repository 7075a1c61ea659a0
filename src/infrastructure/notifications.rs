use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::infrastructure::traits::NotificationDispatcher;
use crate::models::{NotificationEvent, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub target_user: UserId,
    pub event: NotificationEvent,
}

/// Enqueues deliveries on an unbounded channel drained by a delivery worker.
#[derive(Debug, Clone)]
pub struct ChannelNotificationDispatcher {
    sender: mpsc::UnboundedSender<Delivery>,
}

impl ChannelNotificationDispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl NotificationDispatcher for ChannelNotificationDispatcher {
    fn dispatch(&self, target_user: &str, event: NotificationEvent) {
        let delivery = Delivery {
            target_user: target_user.to_string(),
            event,
        };
        if self.sender.send(delivery).is_err() {
            warn!("Notification queue closed, dropping delivery for {}", target_user);
        }
    }
}

/// Drain deliveries into the log until every dispatcher is dropped
pub async fn run_delivery_logger(mut receiver: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = receiver.recv().await {
        info!(target_user = %delivery.target_user, event = ?delivery.event, "notification delivered");
    }
}
