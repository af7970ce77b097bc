//! Packet pool for allocation-free packet reuse.
//!
//! The pool is an explicit value shared through `Arc<Pool>`; every connection
//! is handed the pool it should draw decoded packets from.
//!
//! # Usage
//!
//! ```
//! use framewire::packet::Pool;
//!
//! let pool = Pool::new();
//! let mut packet = pool.get();
//! packet.metadata.id = 7;
//! pool.put(packet);
//!
//! let packet = pool.get();
//! assert_eq!(packet.metadata.id, 0);
//! ```

use std::sync::{Mutex, PoisonError};

use super::Packet;

/// Default number of idle packets retained by a pool.
pub const DEFAULT_MAX_IDLE: usize = 1024;

/// Concurrency-safe packet pool.
///
/// `get` never blocks beyond the internal lock: when no recycled packet is
/// available a fresh one is allocated.
#[derive(Debug)]
pub struct Pool {
    idle: Mutex<Vec<Packet>>,
    max_idle: usize,
}

impl Pool {
    /// Create a pool retaining up to [`DEFAULT_MAX_IDLE`] packets.
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Create a pool retaining up to `max_idle` packets.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
        }
    }

    /// Take a packet with zeroed metadata and empty content.
    pub fn get(&self) -> Packet {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default()
    }

    /// Return a packet to the pool. `None` is ignored.
    ///
    /// The packet is reset before it is stored; content capacity survives.
    pub fn put(&self, packet: impl Into<Option<Packet>>) {
        let Some(mut packet) = packet.into() else {
            return;
        };
        packet.reset();

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(packet);
        }
    }

    /// Number of packets currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Maximum number of idle packets retained.
    #[inline]
    pub fn max_idle(&self) -> usize {
        self.max_idle
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}
