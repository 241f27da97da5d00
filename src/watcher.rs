//! Status broadcast watching and side effects.
//!
//! This module provides the [`StatusWatcher`], invoked once per message of
//! every live delivery batch. Messages whose origin is a status broadcast
//! feed are marked read and reacted to according to the configured
//! [`WatchPolicy`]; every message is logged either way.
//!
//! Side effects are isolated per message: a failed acknowledgement or
//! reaction is logged and the rest of the batch is processed normally.

use log::{debug, error, info, warn};

use crate::{
    config::Config,
    transport::{DeliveryKind, IncomingMessage, Transport},
};

/// Side-effect policy for status broadcasts, read once at startup.
#[derive(Debug, Clone)]
pub struct WatchPolicy {
    /// Watch status broadcasts at all.
    pub auto_watch: bool,
    /// Acknowledge each status broadcast as read.
    pub auto_mark_read: bool,
    /// React to each status broadcast.
    pub auto_react: bool,
    /// Emoji used when reacting.
    pub react_emoji: String,
}

impl From<&Config> for WatchPolicy {
    fn from(config: &Config) -> WatchPolicy {
        WatchPolicy {
            auto_watch: config.auto_status,
            auto_mark_read: config.auto_read_status,
            auto_react: config.auto_like_status,
            react_emoji: config.auto_like_emoji.clone(),
        }
    }
}

/// Inspects incoming messages and performs the configured side effects on
/// status broadcasts.
pub struct StatusWatcher {
    /// The configured side-effect policy.
    policy: WatchPolicy,
}

impl StatusWatcher {
    /// Create a watcher applying the given policy.
    pub fn new(policy: WatchPolicy) -> StatusWatcher {
        StatusWatcher { policy }
    }

    /// Process one delivery batch.
    ///
    /// Batches tagged as historical backfill are ignored entirely; only
    /// live deliveries trigger side effects. Messages are processed in
    /// delivery order.
    pub async fn process_batch<T: Transport>(
        &self,
        transport: &T,
        messages: &[IncomingMessage],
        delivery: DeliveryKind,
    ) {
        if delivery != DeliveryKind::Live {
            debug!("ignoring {} backfilled message(s)", messages.len());
            return;
        }

        for message in messages {
            self.process_message(transport, message).await;
        }
    }

    /// Log one message and apply status side effects when it qualifies.
    async fn process_message<T: Transport>(&self, transport: &T, message: &IncomingMessage) {
        let direction = if message.key.from_me {
            "outgoing"
        } else {
            "incoming"
        };
        info!(
            "{} message from {}: {}",
            direction,
            message.key.origin,
            message.summary()
        );

        if !self.policy.auto_watch || !message.key.is_status_broadcast() {
            return;
        }

        info!(
            "status update from {}: {}",
            message.sender(),
            message.summary()
        );

        if self.policy.auto_mark_read {
            match transport.mark_read(&message.key).await {
                Ok(()) => info!("status marked as read"),
                Err(error) => error!("failed to mark status as read: {error}"),
            }
        }

        if self.policy.auto_react {
            self.react(transport, message).await;
        }
    }

    /// React to a status broadcast, scoping the reaction to the message's
    /// participant and the bot's own identity.
    async fn react<T: Transport>(&self, transport: &T, message: &IncomingMessage) {
        let Some(participant) = message.key.participant.clone() else {
            debug!("status update has no participant, skipping reaction");
            return;
        };
        let Some(own_id) = transport.self_id() else {
            warn!("own identity not known yet, skipping reaction");
            return;
        };

        let audience = [participant, own_id];
        match transport
            .send_reaction(&message.key, &self.policy.react_emoji, &audience)
            .await
        {
            Ok(()) => info!("reacted to status with {}", self.policy.react_emoji),
            Err(error) => error!("failed to react to status: {error}"),
        }
    }
}
