use super::card::Card;
use crate::util::constants::*;
use crate::util::Address;
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};

/// Per-card refinement counters used to detect hot cards.
///
/// Counter updates are a plain load followed by a plain store. Concurrent refinements of the
/// same card may lose increments; that only delays the point at which the card is seen as hot.
pub struct G1CardCounts {
    heap_start: Address,
    counts: Box<[AtomicU8]>,
    hot_card_limit: u8,
}

impl G1CardCounts {
    pub fn new(heap_start: Address, heap_end: Address, hot_card_limit: u8) -> Self {
        let cards = (heap_end - heap_start) >> LOG_BYTES_IN_CARD;
        Self {
            heap_start,
            counts: (0..cards).map(|_| AtomicU8::new(0)).collect(),
            hot_card_limit,
        }
    }

    #[inline]
    fn index_of(&self, card: Card) -> usize {
        (card.start() - self.heap_start) >> LOG_BYTES_IN_CARD
    }

    /// Count one more refinement of `card`. Returns the count before this refinement.
    pub fn add_card_count(&self, card: Card) -> u8 {
        let entry = &self.counts[self.index_of(card)];
        let count = entry.load(Ordering::Relaxed);
        entry.store(count.saturating_add(1), Ordering::Relaxed);
        count
    }

    #[inline]
    pub fn is_hot(&self, count: u8) -> bool {
        count >= self.hot_card_limit
    }

    pub fn hot_card_limit(&self) -> u8 {
        self.hot_card_limit
    }

    pub fn count(&self, card: Card) -> u8 {
        self.counts[self.index_of(card)].load(Ordering::Relaxed)
    }

    /// Zero the counters of every card in `range`, e.g. when its region is freed.
    pub fn clear_range(&self, range: Range<Address>) {
        let start = Card::align(range.start.max(self.heap_start));
        if range.end <= start {
            return;
        }
        let first = (start - self.heap_start) >> LOG_BYTES_IN_CARD;
        let last = ((range.end.align_up(BYTES_IN_CARD) - self.heap_start) >> LOG_BYTES_IN_CARD)
            .min(self.counts.len());
        if first >= last {
            return;
        }
        for count in &self.counts[first..last] {
            count.store(0, Ordering::Relaxed);
        }
    }

    pub fn clear_all(&self) {
        for count in self.counts.iter() {
            count.store(0, Ordering::Relaxed);
        }
    }
}
