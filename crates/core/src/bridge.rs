//! Host serial bridge.
//!
//! Bytes arrive from the physical UART in interrupt context and must reach
//! the emulated SCI, which accepts only one byte at a time. The path is:
//!
//! ```text
//! UART ISR ──push──▶ ring buffer ──service_rx──▶ overflow queue ──▶ Sci::host_push
//! ```
//!
//! The ring buffer is a lock-free single-producer single-consumer `ringbuf`
//! heap ring: the ISR owns the [`RingProducer`], the emulation core owns
//! the [`RingConsumer`] inside [`SerialBridge`]. Bytes the SCI rejects wait in
//! the overflow queue, which is always drained first so arrival order is
//! preserved. Both buffers hold `capacity - 1` bytes.
//!
//! Outbound bytes go straight from TDR to the transmitter whenever it
//! reports ready.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::check_capacity;
use crate::diagnostics::should_log;
use crate::error::Result;
use crate::peripherals::Sci;

/// Counters shared by both ends of the receive ring.
#[derive(Default)]
struct RingStats {
    dropped: AtomicU64,
    high_water: AtomicUsize,
}

/// Interrupt-side handle of the receive ring.
pub struct RingProducer {
    prod: HeapProd<u8>,
    stats: Arc<RingStats>,
}

/// Loop-side handle of the receive ring.
pub struct RingConsumer {
    cons: HeapCons<u8>,
    stats: Arc<RingStats>,
}

/// Build a receive ring with `capacity` slots (a power of two, at least 2).
/// One slot is kept free, so at most `capacity - 1` bytes are buffered.
pub fn ring_buffer(capacity: usize) -> Result<(RingProducer, RingConsumer)> {
    check_capacity("ring", capacity)?;
    let (prod, cons) = HeapRb::<u8>::new(capacity - 1).split();
    let stats = Arc::new(RingStats::default());
    Ok((RingProducer { prod, stats: Arc::clone(&stats) }, RingConsumer { cons, stats }))
}

impl RingProducer {
    /// Append a byte. Returns false (and counts the drop) when full.
    ///
    /// Never blocks or allocates; safe to call from interrupt context.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.prod.try_push(byte).is_err() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.stats.high_water.fetch_max(self.prod.occupied_len(), Ordering::Relaxed);
        true
    }

    pub fn len(&self) -> usize {
        self.prod.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.prod.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}

impl RingConsumer {
    pub fn pop(&mut self) -> Option<u8> {
        self.cons.try_pop()
    }

    /// Discard everything currently buffered.
    pub fn clear(&mut self) {
        self.cons.clear();
    }

    pub fn len(&self) -> usize {
        self.cons.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.cons.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cons.capacity().get()
    }

    /// Bytes the producer had to drop because the ring was full.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Highest fill level observed.
    pub fn high_water(&self) -> usize {
        self.stats.high_water.load(Ordering::Relaxed)
    }
}

/// Bounded FIFO for bytes the SCI could not accept yet.
pub struct OverflowQueue {
    rb: HeapRb<u8>,
    high_water: usize,
    dropped: u64,
}

impl OverflowQueue {
    pub fn new(capacity: usize) -> Result<Self> {
        check_capacity("overflow queue", capacity)?;
        Ok(OverflowQueue { rb: HeapRb::new(capacity - 1), high_water: 0, dropped: 0 })
    }

    pub fn len(&self) -> usize {
        self.rb.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.rb.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rb.is_full()
    }

    /// Append a byte; a full queue counts the drop and returns false.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.rb.try_push(byte).is_err() {
            self.dropped += 1;
            return false;
        }
        self.high_water = self.high_water.max(self.rb.occupied_len());
        true
    }

    pub fn peek(&self) -> Option<u8> {
        self.rb.iter().next().copied()
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.rb.try_pop()
    }

    pub fn clear(&mut self) {
        self.rb.clear();
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Physical transmit path toward the host computer.
pub trait UartTx {
    /// Non-blocking: true when the transmitter can take another byte.
    fn is_ready(&self) -> bool;
    fn write_byte(&mut self, byte: u8);
}

/// Moves bytes between the host UART buffers and the emulated SCI.
pub struct SerialBridge {
    rx: RingConsumer,
    overflow: OverflowQueue,
}

impl SerialBridge {
    pub fn new(rx: RingConsumer, overflow_capacity: usize) -> Result<Self> {
        Ok(SerialBridge { rx, overflow: OverflowQueue::new(overflow_capacity)? })
    }

    pub fn ring(&self) -> &RingConsumer {
        &self.rx
    }

    pub fn overflow(&self) -> &OverflowQueue {
        &self.overflow
    }

    /// Deliver received bytes to the SCI in arrival order.
    ///
    /// Returns the number of bytes the SCI accepted.
    pub fn service_rx(&mut self, sci: &mut Sci) -> usize {
        let mut delivered = 0;

        while let Some(byte) = self.overflow.peek() {
            if sci.host_push(byte).is_err() {
                break;
            }
            self.overflow.pop();
            delivered += 1;
        }
        if !self.overflow.is_empty() {
            return delivered;
        }

        while let Some(byte) = self.rx.pop() {
            // Once something is queued, later bytes must queue behind it
            if self.overflow.is_empty() && sci.host_push(byte).is_ok() {
                delivered += 1;
                continue;
            }
            if !self.overflow.push(byte) {
                sci.signal_overrun();
                let drops = self.overflow.dropped();
                if should_log(drops) {
                    tracing::warn!(drops, byte = format_args!("{:02X}", byte), "serial overflow queue full, byte dropped");
                }
            }
        }
        delivered
    }

    /// Forward transmitted bytes while the UART can take them.
    ///
    /// Returns the number of bytes written.
    pub fn service_tx<U: UartTx + ?Sized>(&mut self, sci: &mut Sci, uart: &mut U) -> usize {
        let mut sent = 0;
        while uart.is_ready() {
            let Some(byte) = sci.host_pull() else { break };
            uart.write_byte(byte);
            sent += 1;
        }
        sent
    }

    /// Drop everything buffered on the receive side.
    pub fn reset(&mut self) {
        self.rx.clear();
        self.overflow.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::sci::{RDR, TDR, TRCSR_ORFE};

    /// Transmitter that accepts a fixed number of bytes.
    struct Sink {
        room: usize,
        bytes: Vec<u8>,
    }

    impl UartTx for Sink {
        fn is_ready(&self) -> bool {
            self.bytes.len() < self.room
        }
        fn write_byte(&mut self, byte: u8) {
            self.bytes.push(byte);
        }
    }

    #[test]
    fn test_ring_full_at_capacity_minus_one() {
        let (mut tx, mut rx) = ring_buffer(8).unwrap();
        assert!(rx.is_empty());
        assert_eq!(rx.capacity(), 7);
        for i in 0..7 {
            assert!(tx.push(i));
        }
        assert_eq!(rx.len(), 7);
        assert!(!tx.push(99));
        assert_eq!(tx.dropped(), 1);
        // Drop leaves contents alone
        let drained: Vec<u8> = std::iter::from_fn(|| rx.pop()).collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(rx.high_water(), 7);
        assert_eq!(rx.len(), 0);
    }

    #[test]
    fn test_ring_wraps() {
        let (mut tx, mut rx) = ring_buffer(4).unwrap();
        for round in 0..10u8 {
            assert!(tx.push(round));
            assert!(tx.push(round.wrapping_add(100)));
            assert_eq!(rx.pop(), Some(round));
            assert_eq!(rx.pop(), Some(round.wrapping_add(100)));
            assert_eq!(rx.pop(), None);
        }
    }

    #[test]
    fn test_ring_capacity_validated() {
        assert!(ring_buffer(0).is_err());
        assert!(ring_buffer(1).is_err());
        assert!(ring_buffer(100).is_err());
        assert!(ring_buffer(2).is_ok());
    }

    #[test]
    fn test_ring_across_threads() {
        let (mut tx, mut rx) = ring_buffer(16).unwrap();
        let producer = std::thread::spawn(move || {
            let mut i = 0u32;
            while i < 10_000 {
                if tx.push(i as u8) {
                    i += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });
        let mut expected = 0u32;
        while expected < 10_000 {
            match rx.pop() {
                Some(b) => {
                    assert_eq!(b, expected as u8);
                    expected += 1;
                }
                None => std::thread::yield_now(),
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn test_overflow_queue_bounds() {
        let mut q = OverflowQueue::new(4).unwrap();
        assert_eq!(q.pop(), None);
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(q.push(3));
        assert!(q.is_full());
        assert!(!q.push(4));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.peek(), Some(1));
        assert_eq!(q.pop(), Some(1));
        assert!(q.push(5));
        assert_eq!((q.pop(), q.pop(), q.pop()), (Some(2), Some(3), Some(5)));
        assert!(q.is_empty());
        assert_eq!(q.high_water(), 3);
    }

    #[test]
    fn test_service_rx_preserves_order() {
        let (mut tx, rx) = ring_buffer(16).unwrap();
        let mut bridge = SerialBridge::new(rx, 16).unwrap();
        let mut sci = Sci::new();
        for b in [10, 20, 30] {
            tx.push(b);
        }
        assert_eq!(bridge.service_rx(&mut sci), 1);
        assert_eq!(bridge.overflow().len(), 2);

        let mut received = vec![sci.read(RDR).unwrap()];
        tx.push(40);
        for _ in 0..4 {
            bridge.service_rx(&mut sci);
            if sci.rx_full() {
                received.push(sci.read(RDR).unwrap());
            }
        }
        assert_eq!(received, vec![10, 20, 30, 40]);
        assert_eq!(sci.trcsr() & TRCSR_ORFE, 0);
    }

    #[test]
    fn test_overrun_when_queue_exhausted() {
        let (mut tx, rx) = ring_buffer(16).unwrap();
        let mut bridge = SerialBridge::new(rx, 2).unwrap();
        let mut sci = Sci::new();
        for b in [1, 2, 3] {
            tx.push(b);
        }
        // 1 -> RDR, 2 -> queue, 3 dropped
        bridge.service_rx(&mut sci);
        assert_ne!(sci.trcsr() & TRCSR_ORFE, 0);
        assert_eq!(bridge.overflow().dropped(), 1);
        assert_eq!(sci.dbg_overruns, 1);
        assert_eq!(sci.read(RDR), Some(1));
        assert_eq!(sci.trcsr() & TRCSR_ORFE, 0);
        bridge.service_rx(&mut sci);
        assert_eq!(sci.read(RDR), Some(2));
    }

    #[test]
    fn test_service_tx_respects_ready() {
        let (_tx, rx) = ring_buffer(4).unwrap();
        let mut bridge = SerialBridge::new(rx, 4).unwrap();
        let mut sci = Sci::new();
        let mut sink = Sink { room: 0, bytes: Vec::new() };
        sci.write(TDR, 0x41);
        assert_eq!(bridge.service_tx(&mut sci, &mut sink), 0);
        assert!(sci.tx_pending());
        sink.room = 4;
        assert_eq!(bridge.service_tx(&mut sci, &mut sink), 1);
        assert_eq!(bridge.service_tx(&mut sci, &mut sink), 0);
        assert_eq!(sink.bytes, vec![0x41]);
    }

    #[test]
    fn test_reset_discards_buffers() {
        let (mut tx, rx) = ring_buffer(8).unwrap();
        let mut bridge = SerialBridge::new(rx, 8).unwrap();
        let mut sci = Sci::new();
        for b in 0..5 {
            tx.push(b);
        }
        bridge.service_rx(&mut sci);
        tx.push(9);
        bridge.reset();
        assert!(bridge.ring().is_empty());
        assert!(bridge.overflow().is_empty());
        sci.read(RDR);
        assert_eq!(bridge.service_rx(&mut sci), 0);
        // The producer keeps working after a reset
        tx.push(7);
        bridge.service_rx(&mut sci);
        assert_eq!(sci.read(RDR), Some(7));
    }
}
