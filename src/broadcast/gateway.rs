//! Broadcast gateway: fan-out of committed state changes.
//!
//! Each channel owns a bounded `tokio::sync::broadcast` sender created on
//! first subscription. Publishing never blocks and never fails from the
//! caller's point of view: a channel without subscribers drops the message,
//! and a lagging subscriber loses the oldest messages (clients repair by
//! refetching on reconnect).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use super::channel::Channel;

/// Default per-channel buffer
pub const DEFAULT_CAPACITY: usize = 256;

/// A message as delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Delivery<M> {
    pub channel: Channel,
    pub message: M,
    pub sent_at: DateTime<Utc>,
}

/// Named-channel fan-out to live subscribers
pub struct BroadcastGateway<M> {
    capacity: usize,
    channels: RwLock<HashMap<Channel, broadcast::Sender<Delivery<M>>>>,
}

impl<M: Clone + Send + 'static> BroadcastGateway<M> {
    /// Create a gateway buffering `capacity` messages per subscriber
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to future messages on `channel`
    pub fn subscribe(&self, channel: &Channel) -> broadcast::Receiver<Delivery<M>> {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        channels
            .entry(channel.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish a message to every current subscriber of `channel`.
    ///
    /// Returns the number of subscribers reached; zero when nobody listens.
    pub fn broadcast(&self, channel: &Channel, message: M) -> usize {
        let sender = {
            let channels = self
                .channels
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            channels.get(channel).cloned()
        };

        let Some(sender) = sender else {
            trace!(%channel, "No subscribers, dropping broadcast");
            return 0;
        };

        let delivery = Delivery {
            channel: channel.clone(),
            message,
            sent_at: Utc::now(),
        };

        match sender.send(delivery) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(%channel, "All subscribers gone, dropping broadcast");
                self.prune();
                0
            }
        }
    }

    /// Number of live subscribers on `channel`
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(channel)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of channels that currently hold a sender
    pub fn channel_count(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Drop senders whose subscribers have all gone away
    pub fn prune(&self) -> usize {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = channels.len();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        before - channels.len()
    }
}

impl<M: Clone + Send + 'static> Default for BroadcastGateway<M> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
