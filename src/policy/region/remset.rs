use super::card::Card;
use super::region::RegionGeometry;
use crate::util::constants::*;
use crate::util::Address;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// The remembered set of one region: the cards of other regions that may hold references into
/// it. Cards are kept in one bitmap per source region, installed lazily.
pub struct RemSet {
    geometry: RegionGeometry,
    rs_size: AtomicUsize,
    prts: Box<[AtomicPtr<PerRegionTable>]>,
}

impl RemSet {
    pub fn new(geometry: RegionGeometry) -> Self {
        Self {
            geometry,
            rs_size: AtomicUsize::new(0),
            prts: (0..geometry.num_regions())
                .map(|_| AtomicPtr::new(std::ptr::null_mut()))
                .collect(),
        }
    }

    fn get_per_region_table(&self, from_region: usize) -> &PerRegionTable {
        let entry = &self.prts[from_region];
        let ptr = entry.load(Ordering::Acquire);
        if !ptr.is_null() {
            return unsafe { &*ptr };
        }
        let new_table = Box::into_raw(Box::new(PerRegionTable::new(
            self.geometry.cards_in_region(),
        )));
        match entry.compare_exchange(
            std::ptr::null_mut(),
            new_table,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => unsafe { &*new_table },
            Err(installed) => {
                // Another thread won. Drop our table.
                drop(unsafe { Box::from_raw(new_table) });
                unsafe { &*installed }
            }
        }
    }

    fn get_per_region_table_opt(&self, from_region: usize) -> Option<&PerRegionTable> {
        let ptr = self.prts[from_region].load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    /// Record that the field at `from` may hold a reference into this region.
    /// Returns true if the card of `from` was not recorded before.
    pub fn add_pointer(&self, from: Address) -> bool {
        self.add_card(Card::of(from))
    }

    pub fn add_card(&self, card: Card) -> bool {
        let (region, offset) = self.geometry.card_position(card);
        let prt = self.get_per_region_table(region);
        if prt.add_card(offset) {
            self.rs_size.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn remove_card(&self, card: Card) -> bool {
        let (region, offset) = self.geometry.card_position(card);
        match self.get_per_region_table_opt(region) {
            Some(prt) if prt.remove_card(offset) => {
                self.rs_size.fetch_sub(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub fn contains_card(&self, card: Card) -> bool {
        let (region, offset) = self.geometry.card_position(card);
        self.get_per_region_table_opt(region)
            .is_some_and(|prt| prt.contains_card(offset))
    }

    /// Number of cards recorded.
    pub fn occupied(&self) -> usize {
        self.rs_size.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.occupied() == 0
    }

    /// Forget every card. The per-region tables stay allocated. Called at a pause, when
    /// nothing else updates the set.
    pub fn clear(&self) {
        for entry in self.prts.iter() {
            let ptr = entry.load(Ordering::Acquire);
            if !ptr.is_null() {
                unsafe { &*ptr }.clear();
            }
        }
        self.rs_size.store(0, Ordering::Relaxed);
    }

    /// Visit every recorded card, grouped by source region.
    pub fn iterate<F: FnMut(Card)>(&self, mut f: F) {
        for (region, entry) in self.prts.iter().enumerate() {
            let ptr = entry.load(Ordering::Acquire);
            if ptr.is_null() {
                continue;
            }
            let region_start = self.geometry.region_start(region);
            unsafe { &*ptr }.iterate(|offset| {
                f(Card::from_aligned_address(
                    region_start + (offset << LOG_BYTES_IN_CARD),
                ))
            });
        }
    }
}

impl Drop for RemSet {
    fn drop(&mut self) {
        for entry in self.prts.iter_mut() {
            let ptr = std::mem::replace(entry.get_mut(), std::ptr::null_mut());
            if !ptr.is_null() {
                drop(unsafe { Box::from_raw(ptr) });
            }
        }
    }
}

impl std::fmt::Debug for RemSet {
    fn fmt(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(formatter, "<remset: {} cards>", self.occupied())
    }
}

/// A bitmap over the cards of one source region.
struct PerRegionTable {
    data: Box<[AtomicUsize]>,
}

impl PerRegionTable {
    fn new(cards_in_region: usize) -> Self {
        Self {
            data: (0..cards_in_region.div_ceil(BITS_IN_WORD))
                .map(|_| AtomicUsize::new(0))
                .collect(),
        }
    }

    fn get_entry(&self, index: usize) -> (&AtomicUsize, usize) {
        (&self.data[index >> LOG_BITS_IN_WORD], index & (BITS_IN_WORD - 1))
    }

    fn add_card(&self, index: usize) -> bool {
        let (entry, offset) = self.get_entry(index);
        let old = entry.fetch_or(1 << offset, Ordering::Relaxed);
        old & (1 << offset) == 0
    }

    fn contains_card(&self, index: usize) -> bool {
        let (entry, offset) = self.get_entry(index);
        (entry.load(Ordering::Relaxed) & (1 << offset)) != 0
    }

    fn remove_card(&self, index: usize) -> bool {
        let (entry, offset) = self.get_entry(index);
        let old = entry.fetch_and(!(1 << offset), Ordering::Relaxed);
        old & (1 << offset) != 0
    }

    fn clear(&self) {
        for word in self.data.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    fn iterate<F: FnMut(usize)>(&self, mut f: F) {
        for (i, word) in self.data.iter().enumerate() {
            let mut val = word.load(Ordering::Relaxed);
            while val != 0 {
                let j = val.trailing_zeros() as usize;
                f((i << LOG_BITS_IN_WORD) + j);
                val &= val - 1;
            }
        }
    }
}
