use super::card::*;
use crate::util::constants::*;
use crate::util::Address;
use std::ops::Range;
use std::sync::atomic::{fence, AtomicU8, Ordering};

/// One byte per card of the covered heap.
///
/// Bytes are read and written with relaxed atomics. The only ordering the refinement protocol
/// needs is the store-load fence of the write barrier, which is issued explicitly.
pub struct CardTable {
    heap_start: Address,
    heap_end: Address,
    table: Box<[AtomicU8]>,
}

impl CardTable {
    pub fn new(heap_start: Address, heap_end: Address) -> Self {
        debug_assert!(heap_start.is_aligned_to(BYTES_IN_CARD));
        debug_assert!(heap_end.is_aligned_to(BYTES_IN_CARD));
        let cards = (heap_end - heap_start) >> LOG_BYTES_IN_CARD;
        Self {
            heap_start,
            heap_end,
            table: (0..cards)
                .map(|_| AtomicU8::new(CardState::Clean.as_byte()))
                .collect(),
        }
    }

    pub fn heap_start(&self) -> Address {
        self.heap_start
    }

    pub fn heap_end(&self) -> Address {
        self.heap_end
    }

    pub fn num_cards(&self) -> usize {
        self.table.len()
    }

    #[inline(always)]
    pub fn covers(&self, addr: Address) -> bool {
        addr >= self.heap_start && addr < self.heap_end
    }

    #[inline(always)]
    pub fn index_of(&self, card: Card) -> usize {
        debug_assert!(self.covers(card.start()), "{:?} outside the card table", card);
        (card.start() - self.heap_start) >> LOG_BYTES_IN_CARD
    }

    #[inline(always)]
    pub fn card_at(&self, index: usize) -> Card {
        debug_assert!(index < self.table.len());
        Card::from_aligned_address(self.heap_start + (index << LOG_BYTES_IN_CARD))
    }

    #[inline(always)]
    fn entry(&self, card: Card) -> &AtomicU8 {
        &self.table[self.index_of(card)]
    }

    #[inline(always)]
    pub fn get_byte(&self, card: Card) -> u8 {
        self.entry(card).load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn get_state(&self, card: Card) -> CardState {
        let byte = self.get_byte(card);
        match CardState::from_byte(byte) {
            Some(state) => state,
            None => panic!("{:?} has an unexpected card value {:#x}", card, byte),
        }
    }

    #[inline(always)]
    pub fn set_state(&self, card: Card, state: CardState) {
        self.entry(card).store(state.as_byte(), Ordering::Relaxed);
    }

    /// Atomically replace `old` with `new`. Returns false if the card no longer holds `old`.
    #[inline(always)]
    pub fn compare_exchange(&self, card: Card, old: CardState, new: CardState) -> bool {
        self.entry(card)
            .compare_exchange(
                old.as_byte(),
                new.as_byte(),
                Ordering::SeqCst,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline(always)]
    pub fn is_card_dirty(&self, card: Card) -> bool {
        self.get_byte(card) == CardState::Dirty.as_byte()
    }

    #[inline(always)]
    pub fn is_card_young(&self, card: Card) -> bool {
        self.get_byte(card) == CardState::Young.as_byte()
    }

    /// The card-table part of the post write barrier. Returns the card the caller must enqueue,
    /// or `None` if the write needs no further action.
    #[inline(always)]
    pub fn log_write(&self, field: Address) -> Option<Card> {
        let card = Card::of(field);
        let entry = self.entry(card);
        if entry.load(Ordering::Relaxed) == CardState::Young.as_byte() {
            return None;
        }
        // The reference store must be visible before we read the card. Otherwise a refinement
        // thread may clean the card after scanning the old field value, and we would see the
        // card dirty and skip logging the new one.
        fence(Ordering::SeqCst);
        if entry.load(Ordering::Relaxed) == CardState::Dirty.as_byte() {
            return None;
        }
        entry.store(CardState::Dirty.as_byte(), Ordering::Relaxed);
        Some(card)
    }

    /// Mark every card of a young region.
    pub fn mark_young(&self, range: Range<Address>) {
        for index in self.card_indices(range) {
            self.table[index].store(CardState::Young.as_byte(), Ordering::Relaxed);
        }
    }

    /// Reset every card in the range to clean.
    pub fn clear(&self, range: Range<Address>) {
        for index in self.card_indices(range) {
            self.table[index].store(CardState::Clean.as_byte(), Ordering::Relaxed);
        }
    }

    /// Dirty every card in the range. With `whole_heap` the cards are only dirtied; otherwise
    /// leading young cards are skipped and every card that becomes dirty is passed to `enqueue`.
    pub fn invalidate<F: FnMut(Card)>(&self, range: Range<Address>, whole_heap: bool, mut enqueue: F) {
        let mut indices = self.card_indices(range);
        if whole_heap {
            for index in indices {
                self.table[index].store(CardState::Dirty.as_byte(), Ordering::Relaxed);
            }
            return;
        }
        let young = CardState::Young.as_byte();
        while indices.start < indices.end
            && self.table[indices.start].load(Ordering::Relaxed) == young
        {
            indices.start += 1;
        }
        if indices.is_empty() {
            return;
        }
        fence(Ordering::SeqCst);
        for index in indices {
            let value = self.table[index].load(Ordering::Relaxed);
            if value == young || value == CardState::Dirty.as_byte() {
                continue;
            }
            self.table[index].store(CardState::Dirty.as_byte(), Ordering::Relaxed);
            enqueue(self.card_at(index));
        }
    }

    /// Install the deferred bit on a clean or claimed card.
    ///
    /// Returns false if the card is already deferred or young. Otherwise returns true, whether
    /// or not a transition was made: a dirty card is left alone, and a lost race is not retried.
    pub fn mark_card_deferred(&self, card: Card) -> bool {
        let entry = self.entry(card);
        let value = entry.load(Ordering::Relaxed);
        let deferred = CardState::Deferred.as_byte();
        if value & (CLEAN_CARD_MASK | deferred) == deferred {
            return false;
        }
        if value == CardState::Young.as_byte() {
            return false;
        }
        let new_value = if value == CardState::Clean.as_byte() {
            deferred
        } else if value & CardState::Claimed.as_byte() != 0 {
            value | deferred
        } else {
            value
        };
        if new_value != value {
            let _ = entry.compare_exchange(value, new_value, Ordering::SeqCst, Ordering::Relaxed);
        }
        true
    }

    /// Number of dirty cards. Walks the whole table.
    pub fn dirty_card_count(&self) -> usize {
        self.count_cards(CardState::Dirty)
    }

    pub fn count_cards(&self, state: CardState) -> usize {
        self.table
            .iter()
            .filter(|b| b.load(Ordering::Relaxed) == state.as_byte())
            .count()
    }

    /// Panics if any card in the range is not in `state`.
    pub fn assert_cards_in_state(&self, range: Range<Address>, state: CardState) {
        for index in self.card_indices(range) {
            let card = self.card_at(index);
            assert_eq!(self.get_state(card), state, "{:?}", card);
        }
    }

    fn card_indices(&self, range: Range<Address>) -> Range<usize> {
        if range.start >= range.end {
            return 0..0;
        }
        let covered = Address::range_intersection(&range, &(self.heap_start..self.heap_end));
        if covered.start >= covered.end {
            return 0..0;
        }
        let first = (Card::align(covered.start) - self.heap_start) >> LOG_BYTES_IN_CARD;
        let last = (covered.end.align_up(BYTES_IN_CARD) - self.heap_start) >> LOG_BYTES_IN_CARD;
        first..last
    }
}
