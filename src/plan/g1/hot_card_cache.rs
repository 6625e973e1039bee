use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam::utils::CachePadded;

use super::dirty_card_queue::{DirtyCardQueue, DirtyCardQueueSet, NonMutatorHooks};
use crate::policy::region::{Card, G1CardCounts};
use crate::util::Address;
use std::ops::Range;

/// A small, lossy ring of cards that have been refined often.
///
/// Concurrent refinement asks the cache before refining a card. A card that is not yet hot is
/// handed straight back. A hot card takes a slot in the ring and the card it evicts, if any,
/// is refined instead, so a card dirtied over and over is refined once per pass through the
/// ring rather than once per write. Whatever is left in the ring is refined by the next pause.
///
/// Slots hold the card's start address, or 0 when empty.
pub struct G1HotCardCache {
    use_cache: AtomicBool,
    default_use_cache: bool,
    card_counts: G1CardCounts,
    hot_cache: Box<[AtomicUsize]>,
    /// Bumped by every insertion of a hot card.
    hot_cache_idx: CachePadded<AtomicUsize>,
    hot_cache_par_chunk_size: usize,
    hot_cache_par_claimed_idx: CachePadded<AtomicUsize>,
}

impl G1HotCardCache {
    /// `hot_cache_size` must be zero (no cache) or a power of two.
    pub fn new(card_counts: G1CardCounts, hot_cache_size: usize, par_chunk_size: usize) -> Self {
        debug_assert!(hot_cache_size == 0 || hot_cache_size.is_power_of_two());
        debug_assert!(par_chunk_size > 0);
        let default_use_cache = hot_cache_size > 0;
        Self {
            use_cache: AtomicBool::new(default_use_cache),
            default_use_cache,
            card_counts,
            hot_cache: (0..hot_cache_size).map(|_| AtomicUsize::new(0)).collect(),
            hot_cache_idx: CachePadded::new(AtomicUsize::new(0)),
            hot_cache_par_chunk_size: par_chunk_size,
            hot_cache_par_claimed_idx: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub fn default_use_cache(&self) -> bool {
        self.default_use_cache
    }

    pub fn use_cache(&self) -> bool {
        self.use_cache.load(Ordering::Relaxed)
    }

    /// Turn the cache on or off. It can only be turned on if it has slots.
    pub fn set_use_cache(&self, enabled: bool) {
        self.use_cache
            .store(enabled && self.default_use_cache, Ordering::Relaxed);
    }

    pub fn hot_cache_size(&self) -> usize {
        self.hot_cache.len()
    }

    pub fn card_counts(&self) -> &G1CardCounts {
        &self.card_counts
    }

    /// Offer `card` for refinement. Returns the card the caller should refine now: `card`
    /// itself if it is not hot (or its slot was taken by a racing insertion), the card it
    /// evicted, or `None` if it took an empty slot.
    pub fn insert(&self, card: Card) -> Option<Card> {
        if self.hot_cache.is_empty() {
            return Some(card);
        }
        let count = self.card_counts.add_card_count(card);
        if !self.card_counts.is_hot(count) {
            return Some(card);
        }
        let index = self.hot_cache_idx.fetch_add(1, Ordering::Relaxed);
        let slot = &self.hot_cache[index & (self.hot_cache.len() - 1)];
        let current = slot.load(Ordering::Relaxed);
        match slot.compare_exchange(current, card.as_usize(), Ordering::AcqRel, Ordering::Relaxed) {
            // We own the evicted entry.
            Ok(previous) => (previous != 0)
                .then(|| Card::from_aligned_address(Address::from_usize(previous))),
            // Someone else changed the slot first. Refine our own card.
            Err(_) => Some(card),
        }
    }

    /// Refine the cached cards. Several pause workers may drain in parallel; each claims chunks
    /// of `ClaimChunkSize` slots. A chunk ends at its first empty slot, since slots are filled in
    /// order. `refine` returns true for a card holding references into the collection set; such
    /// cards are logged on `into_cset_dcq`.
    ///
    /// The cache must be disabled while draining. The drained entries are left in place until
    /// [`G1HotCardCache::reset_hot_cache`].
    pub fn drain<F: FnMut(Card, usize) -> bool>(
        &self,
        worker_id: usize,
        mut refine: F,
        into_cset_dcq: &mut DirtyCardQueue,
        into_cset_qset: &DirtyCardQueueSet,
    ) {
        if !self.default_use_cache {
            return;
        }
        debug_assert!(!self.use_cache(), "the hot card cache should be disabled");
        let size = self.hot_cache.len();
        while self.hot_cache_par_claimed_idx.load(Ordering::Relaxed) < size {
            let start_idx = self
                .hot_cache_par_claimed_idx
                .fetch_add(self.hot_cache_par_chunk_size, Ordering::Relaxed);
            if start_idx >= size {
                break;
            }
            let end_idx = (start_idx + self.hot_cache_par_chunk_size).min(size);
            for slot in &self.hot_cache[start_idx..end_idx] {
                let value = slot.load(Ordering::Acquire);
                if value == 0 {
                    break;
                }
                let card = Card::from_aligned_address(Address::from_usize(value));
                if refine(card, worker_id) {
                    into_cset_dcq.enqueue(card, into_cset_qset, &NonMutatorHooks);
                }
            }
        }
    }

    /// Empty the ring.
    pub fn reset_hot_cache(&self) {
        self.hot_cache_idx.store(0, Ordering::Relaxed);
        for slot in self.hot_cache.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Whether a drain has claimed every slot since the claim index was last reset.
    pub fn is_drained(&self) -> bool {
        self.hot_cache_par_claimed_idx.load(Ordering::Relaxed) >= self.hot_cache.len()
    }

    pub fn reset_hot_cache_claimed_index(&self) {
        self.hot_cache_par_claimed_idx.store(0, Ordering::Relaxed);
    }

    /// Forget how often the cards in `range` were refined, e.g. when their region is freed.
    pub fn reset_card_counts_in(&self, range: Range<Address>) {
        self.card_counts.clear_range(range);
    }

    pub fn reset_card_counts(&self) {
        self.card_counts.clear_all();
    }

    /// The cards currently cached.
    pub fn cached_cards(&self) -> Vec<Card> {
        self.hot_cache
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .filter(|value| *value != 0)
            .map(|value| Card::from_aligned_address(Address::from_usize(value)))
            .collect()
    }
}
