//! A VM binding for tests.
//!
//! The mock heap has no real memory. Each card holds [`SLOTS_PER_CARD`] reference fields at its
//! start, whose values live in a side array, so tests can store references with
//! [`MockVM::store`] and refinement scans them through [`VMBinding::scan_card`].

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::policy::region::Card;
use crate::util::constants::*;
use crate::util::{Address, ObjectReference};
use crate::vm::{SlotVisitor, VMBinding};

pub const SLOTS_PER_CARD: usize = 4;

/// Start of every mock heap. Aligned to any region size a test uses.
pub const TEST_HEAP_START: Address = Address::from_usize(0x4000_0000);

pub struct MockVM {
    heap_start: Address,
    slots: Box<[AtomicUsize]>,
    adaptive: bool,
    samples: Mutex<Vec<usize>>,
    scanned_cards: AtomicUsize,
}

impl MockVM {
    pub fn new(heap: Range<Address>) -> Self {
        let num_cards = (heap.end - heap.start) >> LOG_BYTES_IN_CARD;
        Self {
            heap_start: heap.start,
            slots: (0..num_cards * SLOTS_PER_CARD)
                .map(|_| AtomicUsize::new(0))
                .collect(),
            adaptive: true,
            samples: Mutex::new(vec![]),
            scanned_cards: AtomicUsize::new(0),
        }
    }

    /// A binding with a fixed young generation. The sampler reports nothing.
    pub fn non_adaptive(mut self) -> Self {
        self.adaptive = false;
        self
    }

    /// The `i`-th reference field of `card`.
    pub fn slot(card: Card, i: usize) -> Address {
        assert!(i < SLOTS_PER_CARD);
        card.start() + i * BYTES_IN_ADDRESS
    }

    fn slot_index(&self, slot: Address) -> usize {
        let offset = slot - self.heap_start;
        let within = (offset & CARD_MASK) / BYTES_IN_ADDRESS;
        assert!(within < SLOTS_PER_CARD, "{} is not a mock slot", slot);
        (offset >> LOG_BYTES_IN_CARD) * SLOTS_PER_CARD + within
    }

    /// Write `value` into the field at `slot`. No barrier runs.
    pub fn store(&self, slot: Address, value: ObjectReference) {
        self.slots[self.slot_index(slot)].store(value.to_address().as_usize(), Ordering::SeqCst);
    }

    pub fn load(&self, slot: Address) -> ObjectReference {
        ObjectReference::from_address(Address::from_usize(
            self.slots[self.slot_index(slot)].load(Ordering::SeqCst),
        ))
    }

    /// Every young RSet length reported so far.
    pub fn samples(&self) -> Vec<usize> {
        self.samples.lock().unwrap().clone()
    }

    /// Number of cards scanned so far.
    pub fn scanned_cards(&self) -> usize {
        self.scanned_cards.load(Ordering::SeqCst)
    }
}

impl VMBinding for MockVM {
    fn scan_card(&self, start: Address, end: Address, visitor: &mut dyn SlotVisitor) {
        let mut card = start;
        while card < end {
            for i in 0..SLOTS_PER_CARD {
                let slot = MockVM::slot(Card::of(card), i);
                visitor.visit_slot(slot, self.load(slot));
            }
            self.scanned_cards.fetch_add(1, Ordering::SeqCst);
            card += BYTES_IN_CARD;
        }
    }

    fn adaptive_young_list_length(&self) -> bool {
        self.adaptive
    }

    fn revise_young_list_target_length_if_necessary(&self, rs_lengths: usize) {
        self.samples.lock().unwrap().push(rs_lengths);
    }
}
