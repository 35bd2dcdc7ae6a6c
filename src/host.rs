//! Host Integration
//!
//! Facts the bridge needs from the game server: which channels want a given
//! message, and how many players are online.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::network::protocol::ChannelCategory;
use crate::store::ConnectionStore;

/// Decides which channels receive a message category.
pub trait ChannelPolicy: Send + Sync {
    /// Channel ids for `category`, in subscription order. Empty means drop.
    fn filter_channels(&self, category: ChannelCategory) -> Vec<String>;
}

/// Live player count of the host.
pub trait PlayerRoster: Send + Sync {
    /// Players currently online.
    fn online_count(&self) -> usize;
}

/// Channel policy driven by the subscriptions in the connection record.
pub struct StoreChannelPolicy {
    store: Arc<dyn ConnectionStore>,
}

impl StoreChannelPolicy {
    /// Policy reading subscriptions from `store`.
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self { store }
    }
}

impl ChannelPolicy for StoreChannelPolicy {
    fn filter_channels(&self, category: ChannelCategory) -> Vec<String> {
        let Some(record) = self.store.read() else {
            return Vec::new();
        };

        let key = category.key();
        record
            .channels
            .into_iter()
            .filter(|channel| channel.types.iter().any(|t| t == key))
            .map(|channel| channel.id)
            .collect()
    }
}

/// Player counter the host updates on join and quit.
#[derive(Debug, Default)]
pub struct OnlinePlayers {
    count: AtomicUsize,
}

impl OnlinePlayers {
    /// Counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the count.
    pub fn set(&self, count: usize) {
        self.count.store(count, Ordering::Relaxed);
    }

    /// A player joined.
    pub fn joined(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// A player left.
    pub fn left(&self) {
        let _ = self
            .count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }
}

impl PlayerRoster for OnlinePlayers {
    fn online_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}
