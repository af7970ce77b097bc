//! Incoming packet queue.
//!
//! Bounded ring buffer between a connection's read task (producer) and
//! `read_packet` callers (consumers).
//!
//! ```text
//! Read task ─► push ─► [ ring buffer ] ─► pop ─► read_packet callers
//!               ▲ waits while full          ▲ waits while empty
//! ```
//!
//! A full ring suspends the producer, which stops the read task from pulling
//! more bytes off the stream: a fast peer cannot grow memory without bound on
//! a slow consumer. Closing the queue wakes everyone; packets already queued
//! remain poppable until drained.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::packet::Packet;

/// Default incoming queue capacity.
pub const DEFAULT_INCOMING_CAPACITY: usize = 1024;

/// Fixed-size ring of packet slots. Capacity is a power of two.
struct Ring {
    slots: Box<[Option<Packet>]>,
    head: usize,
    len: usize,
    mask: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
            mask: capacity - 1,
        }
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    fn push_back(&mut self, packet: Packet) {
        debug_assert!(!self.is_full());
        let tail = (self.head + self.len) & self.mask;
        self.slots[tail] = Some(packet);
        self.len += 1;
    }

    fn pop_front(&mut self) -> Option<Packet> {
        if self.len == 0 {
            return None;
        }
        let packet = self.slots[self.head].take();
        self.head = (self.head + 1) & self.mask;
        self.len -= 1;
        packet
    }
}

/// Thread-safe blocking ring buffer of packets.
pub struct IncomingQueue {
    ring: Mutex<Ring>,
    closed: AtomicBool,
    /// Signalled when a packet is pushed or the queue closes.
    readable: Notify,
    /// Signalled when a slot frees up or the queue closes.
    writable: Notify,
}

impl IncomingQueue {
    /// Create a queue holding at least `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::new(capacity)),
            closed: AtomicBool::new(false),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a packet, waiting while the queue is full.
    ///
    /// Returns the packet back if the queue is (or becomes) closed.
    pub async fn push(&self, packet: Packet) -> Result<(), Packet> {
        let mut packet = packet;
        loop {
            let mut notified = pin!(self.writable.notified());
            notified.as_mut().enable();

            match self.try_push(packet) {
                Ok(()) => return Ok(()),
                Err(returned) if self.is_closed() => return Err(returned),
                Err(returned) => packet = returned,
            }

            notified.await;
        }
    }

    /// Push without waiting. Fails with the packet if full or closed.
    pub fn try_push(&self, packet: Packet) -> Result<(), Packet> {
        {
            let mut ring = self.lock();
            if self.is_closed() || ring.is_full() {
                return Err(packet);
            }
            ring.push_back(packet);
        }
        self.readable.notify_one();
        Ok(())
    }

    /// Pop the oldest packet, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<Packet> {
        loop {
            let mut notified = pin!(self.readable.notified());
            notified.as_mut().enable();

            if let Some(packet) = self.try_pop() {
                return Some(packet);
            }
            if self.is_closed() {
                // A push may have landed between try_pop and the closed check.
                return self.try_pop();
            }

            notified.await;
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<Packet> {
        let packet = self.lock().pop_front();
        if packet.is_some() {
            self.writable.notify_one();
        }
        packet
    }

    /// Close the queue and wake every waiter. Idempotent.
    pub fn close(&self) {
        {
            let _ring = self.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count (a power of two).
    pub fn capacity(&self) -> usize {
        self.lock().slots.len()
    }
}

impl Default for IncomingQueue {
    fn default() -> Self {
        Self::new(DEFAULT_INCOMING_CAPACITY)
    }
}
