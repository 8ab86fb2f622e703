//! Push gateway seam.
//!
//! The dispatcher talks to the push service through [`PushGateway`] so the
//! hosted implementation, the development logger and the test recorder are
//! interchangeable.

use async_trait::async_trait;
use tracing::info;

use missive_shared::{ConversationId, MessageId, Result};

/// One push notification, ready for delivery.
///
/// `conversation_id` and `message_id` travel as the data payload so a tap
/// on the notification can open the right chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
}

/// Outcome of a multicast push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MulticastSummary {
    pub success: usize,
    pub failure: usize,
}

/// Transport to the push service.
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Delivers to a single device token.
    async fn send(&self, token: &str, notification: &PushNotification) -> Result<()>;

    /// Delivers to a batch of device tokens in one call.
    async fn send_multicast(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> Result<MulticastSummary>;
}

/// Development gateway: writes every push to the log and delivers nothing.
#[derive(Debug, Clone, Default)]
pub struct LogPush;

#[async_trait]
impl PushGateway for LogPush {
    async fn send(&self, token: &str, notification: &PushNotification) -> Result<()> {
        info!(
            token = %token,
            title = %notification.title,
            conversation = %notification.conversation_id,
            message = %notification.message_id,
            "push (log only)"
        );
        Ok(())
    }

    async fn send_multicast(
        &self,
        tokens: &[String],
        notification: &PushNotification,
    ) -> Result<MulticastSummary> {
        info!(
            recipients = tokens.len(),
            title = %notification.title,
            conversation = %notification.conversation_id,
            message = %notification.message_id,
            "multicast push (log only)"
        );
        Ok(MulticastSummary {
            success: tokens.len(),
            failure: 0,
        })
    }
}
