//! Stream fan-out and subscription management.
//!
//! Each channel that survives the sanitizer gets a [`Stream`] that fans
//! packets out to per-subscriber bounded queues.  The
//! [`SubscriptionManager`] owns the streams, routes sanitized packets to
//! them, and tracks subscriptions to streams that do not exist yet.

pub mod manager;
pub mod stream;

pub use manager::SubscriptionManager;
pub use stream::{Stream, StreamOptions};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, process-unique subscriber token.
///
/// Downstream consumers are identified only by this handle; nothing in the
/// relay reaches back into a subscriber.  Tokens are never reused within a
/// process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Allocates a fresh process-unique token.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_ids_are_unique() {
        let a = SubscriberId::next();
        let b = SubscriberId::next();
        assert_ne!(a, b);
    }
}
