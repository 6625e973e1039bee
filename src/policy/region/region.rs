use super::card::Card;
use super::remset::RemSet;
use crate::util::constants::*;
use crate::util::options::ConfigError;
use crate::util::Address;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// How the covered heap is divided into regions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionGeometry {
    heap_start: Address,
    num_regions: usize,
    log_bytes_in_region: usize,
}

impl RegionGeometry {
    pub fn new(heap_start: Address, num_regions: usize, bytes_in_region: usize) -> Self {
        debug_assert!(bytes_in_region.is_power_of_two());
        debug_assert!(heap_start.is_aligned_to(bytes_in_region));
        Self {
            heap_start,
            num_regions,
            log_bytes_in_region: bytes_in_region.trailing_zeros() as usize,
        }
    }

    pub fn heap_start(&self) -> Address {
        self.heap_start
    }

    pub fn heap_end(&self) -> Address {
        self.heap_start + (self.num_regions << self.log_bytes_in_region)
    }

    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    pub fn bytes_in_region(&self) -> usize {
        1 << self.log_bytes_in_region
    }

    pub fn cards_in_region(&self) -> usize {
        1 << (self.log_bytes_in_region - LOG_BYTES_IN_CARD)
    }

    /// Index of the region containing `addr`, if it is in the heap.
    #[inline(always)]
    pub fn region_index(&self, addr: Address) -> Option<usize> {
        if addr < self.heap_start {
            return None;
        }
        let index = (addr - self.heap_start) >> self.log_bytes_in_region;
        (index < self.num_regions).then_some(index)
    }

    pub fn region_start(&self, index: usize) -> Address {
        self.heap_start + (index << self.log_bytes_in_region)
    }

    /// The region of a card and the card's index within it.
    #[inline(always)]
    pub fn card_position(&self, card: Card) -> (usize, usize) {
        let offset = card.start() - self.heap_start;
        let region = offset >> self.log_bytes_in_region;
        debug_assert!(region < self.num_regions, "{:?} outside the heap", card);
        let index = (offset & (self.bytes_in_region() - 1)) >> LOG_BYTES_IN_CARD;
        (region, index)
    }

    /// Do `a` and `b` lie in different regions? Addresses outside the heap compare by the same
    /// rule, which is what the barrier filter wants.
    #[inline(always)]
    pub fn crosses_region(&self, a: Address, b: Address) -> bool {
        ((a ^ b) >> self.log_bytes_in_region) != 0
    }
}

/// A heap region as far as refinement is concerned: whether it is young, whether it is in the
/// collection set, and its remembered set.
#[derive(Debug)]
pub struct HeapRegion {
    index: usize,
    start: Address,
    end: Address,
    young: AtomicBool,
    in_collection_set: AtomicBool,
    rem_set: RemSet,
}

impl HeapRegion {
    fn new(index: usize, geometry: RegionGeometry) -> Self {
        let start = geometry.region_start(index);
        Self {
            index,
            start,
            end: start + geometry.bytes_in_region(),
            young: AtomicBool::new(false),
            in_collection_set: AtomicBool::new(false),
            rem_set: RemSet::new(geometry),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    pub fn range(&self) -> Range<Address> {
        self.start..self.end
    }

    #[inline(always)]
    pub fn is_young(&self) -> bool {
        self.young.load(Ordering::Acquire)
    }

    pub(crate) fn set_young(&self, young: bool) {
        self.young.store(young, Ordering::Release);
    }

    #[inline(always)]
    pub fn in_collection_set(&self) -> bool {
        self.in_collection_set.load(Ordering::Acquire)
    }

    pub(crate) fn set_in_collection_set(&self, in_cset: bool) {
        self.in_collection_set.store(in_cset, Ordering::Release);
    }

    pub fn rem_set(&self) -> &RemSet {
        &self.rem_set
    }
}

/// All regions of the covered heap.
pub struct RegionTable {
    geometry: RegionGeometry,
    regions: Box<[HeapRegion]>,
}

impl RegionTable {
    pub fn new(
        heap_start: Address,
        heap_end: Address,
        bytes_in_region: usize,
    ) -> Result<Self, ConfigError> {
        if !heap_start.is_aligned_to(bytes_in_region)
            || !heap_end.is_aligned_to(bytes_in_region)
            || heap_end <= heap_start
        {
            return Err(ConfigError::UnalignedHeap {
                start: heap_start,
                end: heap_end,
                region_size: bytes_in_region,
            });
        }
        let num_regions = (heap_end - heap_start) / bytes_in_region;
        let geometry = RegionGeometry::new(heap_start, num_regions, bytes_in_region);
        let regions = (0..num_regions)
            .map(|i| HeapRegion::new(i, geometry))
            .collect();
        Ok(Self { geometry, regions })
    }

    pub fn geometry(&self) -> RegionGeometry {
        self.geometry
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn get(&self, index: usize) -> &HeapRegion {
        &self.regions[index]
    }

    /// The region containing `addr`, or `None` if `addr` is outside the heap.
    #[inline(always)]
    pub fn region_for(&self, addr: Address) -> Option<&HeapRegion> {
        self.geometry
            .region_index(addr)
            .map(|index| &self.regions[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &HeapRegion> {
        self.regions.iter()
    }

    pub fn young_regions(&self) -> impl Iterator<Item = &HeapRegion> {
        self.regions.iter().filter(|r| r.is_young())
    }

    pub fn collection_set(&self) -> impl Iterator<Item = &HeapRegion> {
        self.regions.iter().filter(|r| r.in_collection_set())
    }
}
