//! Single-channel fan-out.
//!
//! A stream holds the channel's most recent packet and one bounded FIFO per
//! subscriber.  Writers and readers run on different threads; each
//! subscriber advances through its own queue at its own pace, so every
//! enqueued packet is a copy, not a share.

use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::relay::SubscriberId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};

/// Options for a single stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Per-subscriber queue capacity.  Gives a slow reader a little slack
    /// before the writer starts dropping its oldest packets.  Default: 8.
    pub max_queue_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { max_queue_size: 8 }
    }
}

struct StreamState {
    most_recent: Option<Packet>,
    subscribers: HashMap<SubscriberId, VecDeque<Packet>>,
}

/// Fan-out point for one channel.
///
/// The state mutex is held across the entire fan-out write, so the order in
/// which [`Stream::set_next_packet`] completes is the order every
/// subscriber observes.
pub struct Stream {
    identifier: String,
    max_queue_size: usize,
    state: Mutex<StreamState>,
}

impl Stream {
    /// Creates the stream from the first packet seen on the channel.  The
    /// packet seeds the most-recent slot; there are no subscribers yet.
    pub fn new(packet: Packet, options: &StreamOptions) -> Self {
        Self {
            identifier: packet.name(),
            max_queue_size: options.max_queue_size,
            state: Mutex::new(StreamState {
                most_recent: Some(packet),
                subscribers: HashMap::new(),
            }),
        }
    }

    /// Canonical channel name this stream carries.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Publishes the next packet: replaces the most-recent slot and appends
    /// a copy to every subscriber queue, dropping each full queue's oldest
    /// packet first.  Stalled subscribers silently lose oldest data.
    pub fn set_next_packet(&self, packet: Packet) -> Result<()> {
        let name = packet.name();
        if name != self.identifier {
            return Err(Error::StreamIdentifierMismatch {
                expected: self.identifier.clone(),
                actual: name,
            });
        }
        let mut state = self.state.lock();
        for queue in state.subscribers.values_mut() {
            if queue.len() >= self.max_queue_size {
                queue.pop_front();
            }
            queue.push_back(packet.clone());
        }
        state.most_recent = Some(packet);
        Ok(())
    }

    /// Registers a subscriber.  Returns false without error when the id is
    /// already subscribed.  With `enqueue_latest`, the most recent packet
    /// (if any) seeds the new queue.
    pub fn subscribe(&self, id: SubscriberId, enqueue_latest: bool) -> bool {
        let mut state = self.state.lock();
        if state.subscribers.contains_key(&id) {
            return false;
        }
        let mut queue = VecDeque::new();
        if enqueue_latest {
            if let Some(packet) = &state.most_recent {
                queue.push_back(packet.clone());
            }
        }
        state.subscribers.insert(id, queue);
        log::debug!("{} subscribed to {}", id, self.identifier);
        true
    }

    /// Pops the subscriber's next packet.  Never blocks; returns `None`
    /// when the queue is empty or the id is not subscribed.
    pub fn get_next_packet(&self, id: SubscriberId) -> Option<Packet> {
        let mut state = self.state.lock();
        state.subscribers.get_mut(&id)?.pop_front()
    }

    /// Removes the subscriber and its queue; returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut state = self.state.lock();
        let removed = state.subscribers.remove(&id).is_some();
        if removed {
            log::debug!("{} unsubscribed from {}", id, self.identifier);
        } else {
            log::debug!("{} never subscribed to {}", id, self.identifier);
        }
        removed
    }

    pub fn number_of_subscribers(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// The current subscriber ids.
    pub fn subscribers(&self) -> BTreeSet<SubscriberId> {
        self.state.lock().subscribers.keys().copied().collect()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.state.lock().subscribers.contains_key(&id)
    }
}
