//! The Batch Buffer (spec.md §3, §4.4).
//!
//! Accumulates packets awaiting decryption under a single parity before a
//! flush hands them to the active cipher backend. Capacity tracks whatever
//! batch width the current backend reports (1 for the one-shot backends,
//! [`crate::cipher::csa_bs::BATCH_SIZE`] for the bit-sliced one) so the
//! scheduler (spec.md §4.4) never has to special-case backend identity.

use crate::cipher::csa_bs::BATCH_SIZE;
use crate::header::ScramblingControl;
use crate::key::Parity;
use crate::packet::PacketBuf;
use smallvec::SmallVec;

/// One packet's payload slice awaiting decryption, referencing its buffer
/// by shared pointer rather than raw offset so the Hold Queue and the
/// Batch Buffer can point at the same storage simultaneously without
/// cloning packet bytes up front (spec.md §5 copy-on-write).
pub(crate) struct BatchItem {
    buf: PacketBuf,
    payload_start: usize,
}

impl BatchItem {
    fn new(buf: PacketBuf, payload_start: usize) -> Self {
        Self { buf, payload_start }
    }
}

/// Fixed-capacity queue of packets pending decryption under one parity.
///
/// Inline storage is sized to [`BATCH_SIZE`], the largest width any backend
/// reports, so neither the one-shot backends (capacity 1) nor the
/// bit-sliced one (capacity `BATCH_SIZE`) ever spill to the heap.
pub(crate) struct BatchBuffer {
    items: SmallVec<[BatchItem; BATCH_SIZE]>,
    capacity: usize,
    parity: Option<Parity>,
}

impl BatchBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: SmallVec::new(),
            capacity,
            parity: None,
        }
    }

    /// Resize the batch's target capacity, e.g. after a backend switch
    /// changes the reported batch width. Only safe to call while empty.
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        debug_assert!(self.items.is_empty());
        self.capacity = capacity.max(1);
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub(crate) fn parity(&self) -> Option<Parity> {
        self.parity
    }

    /// Queue one packet's payload. The caller must have already checked
    /// the parity matches (or the buffer was empty) via [`Self::parity`].
    pub(crate) fn push(&mut self, buf: PacketBuf, payload_start: usize, parity: Parity) {
        if self.items.is_empty() {
            self.parity = Some(parity);
        }
        debug_assert_eq!(self.parity, Some(parity));
        self.items.push(BatchItem::new(buf, payload_start));
    }

    /// Drain every queued item and run `f` over each payload slice in turn,
    /// in FIFO order. Scalar one-shot backends call this once per item;
    /// the bit-sliced backend instead uses [`Self::drain_for_bitsliced`].
    pub(crate) fn drain_scalar(&mut self, mut f: impl FnMut(&mut [u8])) {
        for item in self.items.drain(..) {
            let mut data = item.buf.borrow_mut();
            f(&mut data[item.payload_start..]);
        }
        self.parity = None;
    }

    /// Drain every queued item, exposing all payload slices simultaneously
    /// so a batched backend can process them in one call. Every item's
    /// buffer is distinct (no packet is ever queued twice), so taking a
    /// `RefMut` per item and slicing each into a disjoint `&mut [u8]` is
    /// sound without `unsafe`.
    pub(crate) fn drain_for_bitsliced(&mut self, f: impl FnOnce(&mut Vec<&mut [u8]>)) {
        let mut borrows: Vec<_> = self.items.iter().map(|item| item.buf.borrow_mut()).collect();
        let mut slices: Vec<&mut [u8]> = borrows
            .iter_mut()
            .zip(self.items.iter())
            .map(|(guard, item)| {
                let slice: &mut [u8] = &mut *guard;
                &mut slice[item.payload_start..]
            })
            .collect();
        f(&mut slices);
        drop(slices);
        drop(borrows);
        self.items.clear();
        self.parity = None;
    }
}

/// Whether a decoded scrambling-control value represents an even or odd
/// control word, or no scrambling at all.
pub(crate) fn parity_of(control: ScramblingControl) -> Option<Parity> {
    match control {
        ScramblingControl::Even => Some(Parity::Even),
        ScramblingControl::Odd => Some(Parity::Odd),
        ScramblingControl::NotScrambled | ScramblingControl::Reserved => None,
    }
}
