//! Multi-stream subscription registry.
//!
//! Routes each sanitized packet to its stream, creating the stream on first
//! sight of a channel.  Subscriptions may reference streams that do not
//! exist yet; they are held pending and promoted the moment the first
//! packet of that channel arrives.  A subscribe-to-all order covers every
//! current and future stream.

use crate::error::{Error, Result};
use crate::packet::Packet;
use crate::relay::stream::{Stream, StreamOptions};
use crate::relay::SubscriberId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

struct ManagerState {
    /// Channel name -> stream.
    streams: HashMap<String, Arc<Stream>>,
    /// Streams each subscriber is currently attached to.
    active: HashMap<SubscriberId, BTreeSet<String>>,
    /// Requested stream names that have not been seen yet.
    pending_named: HashMap<SubscriberId, BTreeSet<String>>,
    /// Standing follow-everything orders.
    pending_all: BTreeSet<SubscriberId>,
    /// Lazily recomputed; `None` after any membership change.
    subscriber_count: Option<usize>,
}

/// Registry of streams and subscriptions.
pub struct SubscriptionManager {
    stream_options: StreamOptions,
    state: Mutex<ManagerState>,
}

impl SubscriptionManager {
    pub fn new(stream_options: StreamOptions) -> Self {
        Self {
            stream_options,
            state: Mutex::new(ManagerState {
                streams: HashMap::new(),
                active: HashMap::new(),
                pending_named: HashMap::new(),
                pending_all: BTreeSet::new(),
                subscriber_count: None,
            }),
        }
    }

    /// Publishes a sanitized packet.
    ///
    /// An invalid packet here is a caller bug (the sanitizer sits in
    /// front of this method) and is raised, not swallowed.  When the packet
    /// opens a new stream, pending subscriptions for the channel are
    /// promoted and the promoted subscribers receive this first packet.
    pub fn enqueue_packet(&self, packet: Packet) -> Result<()> {
        let id = &packet.stream_id;
        if id.network.is_empty() && id.station.is_empty() && id.channel.is_empty() {
            return Err(Error::InvalidPacket(
                "Stream identifier not set".to_string(),
            ));
        }
        packet.validate()?;

        let name = packet.name();
        let mut state = self.state.lock();
        if let Some(stream) = state.streams.get(&name) {
            return stream.set_next_packet(packet);
        }

        // First packet on this channel: open the stream and promote
        // whoever was waiting for it.
        let stream = Arc::new(Stream::new(packet, &self.stream_options));
        state.streams.insert(name.clone(), Arc::clone(&stream));
        log::debug!("Created stream {}", name);

        let all_followers: Vec<SubscriberId> = state.pending_all.iter().copied().collect();
        for id in all_followers {
            if stream.subscribe(id, true) {
                state.active.entry(id).or_default().insert(name.clone());
            } else {
                log::warn!("Failed to subscribe {} to {}", id, name);
            }
        }

        let waiting: Vec<SubscriberId> = state
            .pending_named
            .iter()
            .filter(|(_, names)| names.contains(&name))
            .map(|(id, _)| *id)
            .collect();
        for id in waiting {
            if stream.subscribe(id, true) {
                state.active.entry(id).or_default().insert(name.clone());
            } else {
                log::warn!("Failed to subscribe {} to {}", id, name);
            }
            if let Some(names) = state.pending_named.get_mut(&id) {
                names.remove(&name);
                if names.is_empty() {
                    state.pending_named.remove(&id);
                    log::debug!("All pending subscriptions filled for {}", id);
                }
            }
        }

        state.subscriber_count = None;
        Ok(())
    }

    /// Subscribes `id` to the named streams.  Existing streams are joined
    /// late (no past data); names not seen yet go pending and are promoted
    /// with the stream's first packet.  An empty request is invalid.
    pub fn subscribe(&self, id: SubscriberId, stream_names: &[String]) -> Result<()> {
        if stream_names.is_empty() {
            return Err(Error::InvalidArgument(
                "At least one stream name is required".to_string(),
            ));
        }
        let mut state = self.state.lock();
        for raw in stream_names {
            let name = raw.trim().to_uppercase();
            if name.is_empty() {
                return Err(Error::InvalidArgument("Empty stream name".to_string()));
            }
            match state.streams.get(&name).cloned() {
                Some(stream) => {
                    if stream.subscribe(id, false) {
                        state.active.entry(id).or_default().insert(name);
                    } else {
                        log::debug!("{} already subscribed to {}", id, name);
                    }
                }
                None => {
                    state.pending_named.entry(id).or_default().insert(name);
                }
            }
        }
        state.subscriber_count = None;
        Ok(())
    }

    /// Attaches `id` to every existing stream and registers it for every
    /// stream created later.  A repeat call is a no-op.
    pub fn subscribe_to_all(&self, id: SubscriberId) {
        let mut state = self.state.lock();
        if state.pending_all.contains(&id) {
            return;
        }
        let streams: Vec<(String, Arc<Stream>)> = state
            .streams
            .iter()
            .map(|(name, stream)| (name.clone(), Arc::clone(stream)))
            .collect();
        for (name, stream) in streams {
            if stream.subscribe(id, false) {
                state.active.entry(id).or_default().insert(name);
            } else {
                log::debug!("{} already subscribed to {}", id, name);
            }
        }
        state.pending_all.insert(id);
        state.subscriber_count = None;
    }

    /// Drains one packet from each of the subscriber's streams.  Never
    /// blocks; an idle stream simply contributes nothing to the batch.
    pub fn get_packets(&self, id: SubscriberId) -> Vec<Packet> {
        let state = self.state.lock();
        let Some(names) = state.active.get(&id) else {
            return Vec::new();
        };
        let mut batch = Vec::new();
        for name in names {
            match state.streams.get(name) {
                Some(stream) => {
                    if let Some(packet) = stream.get_next_packet(id) {
                        batch.push(packet);
                    }
                }
                None => log::warn!("Subscribed stream {} does not exist", name),
            }
        }
        batch
    }

    /// Removes every trace of the subscriber: pending entries, the standing
    /// follow-all order, and each stream's queue.  Idempotent.
    pub fn unsubscribe_from_all(&self, id: SubscriberId) {
        let mut state = self.state.lock();
        let mut was_subscribed = state.pending_named.remove(&id).is_some();
        was_subscribed |= state.pending_all.remove(&id);
        for stream in state.streams.values() {
            if stream.unsubscribe(id) {
                was_subscribed = true;
            }
        }
        state.active.remove(&id);
        state.subscriber_count = None;
        if was_subscribed {
            log::debug!("{} was unsubscribed from all", id);
        } else {
            log::warn!("{} may not have been subscribed to anything", id);
        }
    }

    /// The number of distinct subscribers.
    ///
    /// Lazily cached; the cache is dropped on any membership change.  When
    /// no stream has a subscriber yet, the pending entries are counted
    /// instead.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state.lock();
        if let Some(count) = state.subscriber_count {
            return count;
        }
        let mut all: BTreeSet<SubscriberId> = BTreeSet::new();
        for stream in state.streams.values() {
            all.extend(stream.subscribers());
        }
        let count = if all.is_empty() {
            state.pending_named.len() + state.pending_all.len()
        } else {
            all.len()
        };
        state.subscriber_count = Some(count);
        count
    }

    /// The number of streams seen so far.
    pub fn stream_count(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// True when `id` is attached to the named stream.
    pub fn is_subscribed(&self, id: SubscriberId, stream_name: &str) -> bool {
        let state = self.state.lock();
        state
            .streams
            .get(stream_name)
            .map(|stream| stream.is_subscribed(id))
            .unwrap_or(false)
    }
}
