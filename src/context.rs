use std::ops::Range;
use std::sync::Arc;

use crate::plan::g1::{
    refine_card, ConcurrentG1Refine, DirtyCardQueue, DirtyCardQueueSet, DirtyCardQueueSetConfig,
    G1HotCardCache, G1QueueHooks, G1RefineCardClosure, G1RemSet, RefineRecordRefsIntoCSetClosure,
};
use crate::plan::{Mutator, MutatorContext};
use crate::policy::region::{Card, CardState, CardTable, G1CardCounts, HeapRegion, RegionTable};
use crate::scheduler::SuspendibleThreadSet;
use crate::util::options::{ConfigError, Options};
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// Collects options before a [`G1RefinementContext`] is created.
pub struct G1RefineBuilder {
    pub options: Options,
}

impl G1RefineBuilder {
    /// Options start from their defaults, overridden by `G1REFINE_` environment variables.
    pub fn new() -> Self {
        G1RefineBuilder {
            options: Options::default(),
        }
    }

    /// Set an option by its snake-case name or its flag name. Returns false and keeps the
    /// old value if the name is unknown or the value invalid.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_str(name, val)
    }

    /// Apply a whitespace-separated list of flags such as
    /// `-XX:G1ConcRefinementThreads=4 -XX:+G1TraceConcRefinement`.
    pub fn set_options_bulk_by_str(&mut self, flags: &str) -> Result<(), ConfigError> {
        self.options.process_bulk(flags)
    }

    pub fn build<VM: VMBinding>(
        &self,
        binding: VM,
        heap: Range<Address>,
    ) -> Result<G1RefinementContext<VM>, ConfigError> {
        G1RefinementContext::new(binding, self.options.clone(), heap)
    }
}

impl Default for G1RefineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// All state of the refinement subsystem for one heap.
///
/// A binding creates one context at startup (see [`crate::memory_manager::g1refine_init`]),
/// keeps it in an `Arc`, and hands that to every mutator it binds. Refinement threads hold a
/// clone of the `Arc` until [`G1RefinementContext::shutdown`].
pub struct G1RefinementContext<VM: VMBinding> {
    binding: VM,
    options: Options,
    card_table: CardTable,
    regions: RegionTable,
    hot_card_cache: G1HotCardCache,
    /// Cards logged by mutators and the shared queue.
    dcqs: DirtyCardQueueSet,
    /// Cards found to hold references into the collection set while a pause updates
    /// remembered sets.
    into_cset_dcqs: DirtyCardQueueSet,
    cg1r: ConcurrentG1Refine,
    sts: SuspendibleThreadSet,
    rem_set: G1RemSet,
}

impl<VM: VMBinding> G1RefinementContext<VM> {
    /// Set up refinement for the heap `heap`, which must be aligned to the region size.
    /// No thread is started; see [`G1RefinementContext::start_concurrent_refinement`].
    pub fn new(binding: VM, options: Options, heap: Range<Address>) -> Result<Self, ConfigError> {
        let regions = RegionTable::new(heap.start, heap.end, options.g1_heap_region_size)?;
        let card_table = CardTable::new(heap.start, heap.end);
        let card_counts =
            G1CardCounts::new(heap.start, heap.end, options.g1_conc_rs_hot_card_limit);
        let hot_card_cache = G1HotCardCache::new(
            card_counts,
            options.hot_card_cache_size(),
            options.claim_chunk_size,
        );

        let num_par_ids = num_cpus::get();
        let cg1r = ConcurrentG1Refine::new(&options, num_par_ids)?;
        let dcqs = DirtyCardQueueSet::new(DirtyCardQueueSetConfig {
            buffer_size: options.g1_update_buffer_size,
            process_completed_threshold: usize::MAX,
            max_completed_queue: usize::MAX,
            notify_when_complete: true,
            num_par_ids,
            filter_buffers: options.g1_filter_dirty_card_buffers,
            enqueue_threshold_percent: options.g1_dirty_card_buffer_enqueue_threshold_percent,
        });
        cg1r.update_dcqs_thresholds(&dcqs);
        let into_cset_dcqs = DirtyCardQueueSet::new(DirtyCardQueueSetConfig {
            buffer_size: options.g1_update_buffer_size,
            process_completed_threshold: usize::MAX,
            max_completed_queue: usize::MAX,
            notify_when_complete: false,
            num_par_ids: 0,
            filter_buffers: false,
            enqueue_threshold_percent: options.g1_dirty_card_buffer_enqueue_threshold_percent,
        });

        info!(
            "Refinement covers {} in {} regions of {} bytes, {} workers, hot card cache of {} \
             entries",
            heap.start,
            regions.num_regions(),
            options.g1_heap_region_size,
            cg1r.worker_thread_num(),
            hot_card_cache.hot_cache_size()
        );

        Ok(Self {
            binding,
            options,
            card_table,
            regions,
            hot_card_cache,
            dcqs,
            into_cset_dcqs,
            cg1r,
            sts: SuspendibleThreadSet::new(),
            rem_set: G1RemSet::new(),
        })
    }

    pub fn binding(&self) -> &VM {
        &self.binding
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn regions(&self) -> &RegionTable {
        &self.regions
    }

    pub fn hot_card_cache(&self) -> &G1HotCardCache {
        &self.hot_card_cache
    }

    pub fn dirty_card_queue_set(&self) -> &DirtyCardQueueSet {
        &self.dcqs
    }

    pub fn into_cset_dirty_card_queue_set(&self) -> &DirtyCardQueueSet {
        &self.into_cset_dcqs
    }

    pub fn concurrent_refine(&self) -> &ConcurrentG1Refine {
        &self.cg1r
    }

    pub fn suspendible_thread_set(&self) -> &SuspendibleThreadSet {
        &self.sts
    }

    pub fn rem_set(&self) -> &G1RemSet {
        &self.rem_set
    }

    /// Spawn the refinement workers and the young RSet sampling thread.
    pub fn start_concurrent_refinement(self: &Arc<Self>) -> std::io::Result<()> {
        self.cg1r.start_threads(self)
    }

    // Regions

    /// A region starts holding young objects. Its cards are never logged from now on.
    pub fn set_region_young(&self, index: usize) {
        let region = self.regions.get(index);
        region.set_young(true);
        self.card_table.mark_young(region.range());
    }

    /// A young region was promoted. Its cards start out clean.
    pub fn set_region_old(&self, index: usize) {
        let region = self.regions.get(index);
        region.set_young(false);
        self.card_table.clear(region.range());
    }

    /// A region was evacuated or reclaimed: forget everything known about it.
    pub fn free_region(&self, index: usize) {
        let region = self.regions.get(index);
        region.set_young(false);
        region.set_in_collection_set(false);
        self.card_table.clear(region.range());
        self.hot_card_cache.reset_card_counts_in(region.range());
        region.rem_set().clear();
    }

    pub fn add_to_collection_set(&self, index: usize) {
        self.regions.get(index).set_in_collection_set(true);
    }

    pub fn clear_collection_set(&self) {
        self.regions
            .collection_set()
            .for_each(|r| r.set_in_collection_set(false));
    }

    pub fn young_regions(&self) -> impl Iterator<Item = &HeapRegion> {
        self.regions.young_regions()
    }

    // Logging

    /// Whether a store of `new_value` into `field` can create a reference another region's
    /// remembered set must know about. Null stores, stores within one region and stores to
    /// fields outside the heap cannot.
    #[inline(always)]
    pub fn requires_logging(&self, field: Address, new_value: ObjectReference) -> bool {
        !new_value.is_null()
            && self.card_table.covers(field)
            && self
                .regions
                .geometry()
                .crosses_region(field, new_value.to_address())
    }

    /// The post-write barrier for threads without a mutator, e.g. VM-internal threads. Cards
    /// go through the shared queue.
    pub fn write_ref_field_shared(&self, field: Address, new_value: ObjectReference) {
        if !self.requires_logging(field, new_value) {
            return;
        }
        if let Some(card) = self.card_table.log_write(field) {
            self.dcqs
                .enqueue_shared(card, &G1QueueHooks::non_mutator(self));
        }
    }

    /// Dirty and log the cards of `range` after a bulk update that bypassed the barrier, such
    /// as an array copy. `whole_heap` dirties every card without logging any; the cards are
    /// then found by a pause scanning the table.
    pub fn invalidate(&self, range: Range<Address>, whole_heap: bool) {
        let hooks = G1QueueHooks::non_mutator(self);
        self.card_table.invalidate(range, whole_heap, |card| {
            self.dcqs.enqueue_shared(card, &hooks);
        });
    }

    /// Refine one card outside a pause. See [`crate::plan::g1::refine_card`].
    pub fn refine_card(&self, card: Card, worker_id: usize) -> bool {
        refine_card(self, card, worker_id, true)
    }

    // Pause hooks

    /// Stop concurrent refinement for a pause. Returns once every refinement thread is parked.
    /// Mutators must already be stopped.
    ///
    /// A pause runs `gc_pause_begin`, then [`Self::concatenate_logs`] and
    /// [`Self::update_remembered_sets`] on its workers, then [`Self::gc_pause_end`]. If the
    /// remembered sets are not updated, the pause end logs the cached hot cards again.
    pub fn gc_pause_begin(&self) {
        self.sts.synchronize();
        self.hot_card_cache.set_use_cache(false);
        debug!(
            "Pause begins with {} completed buffers",
            self.dcqs.completed_buffers_num()
        );
    }

    /// Move the logged cards of the given mutators and of the shared queue onto the completed
    /// list.
    pub fn concatenate_logs<'a, I>(&self, mutators: I)
    where
        I: IntoIterator<Item = &'a mut Mutator<VM>>,
    {
        for mutator in mutators {
            mutator.flush();
        }
        self.dcqs.flush_shared_dirty_card_queue();
    }

    /// Bring the remembered sets up to date in a pause: refine the cached hot cards, then every
    /// completed buffer. Cards with references into the collection set are logged on the
    /// into-cset queue set. May run on several pause workers at once. Returns the number of
    /// completed buffers this worker processed.
    pub fn update_remembered_sets(&self, worker_id: usize) -> usize {
        debug_assert!(self.sts.is_synchronized(), "not in a pause");
        #[cfg(feature = "extreme_assertions")]
        self.dcqs.verify_completed_buffers();
        let mut into_cset_dcq = DirtyCardQueue::new();
        self.hot_card_cache.drain(
            worker_id,
            |card, worker| refine_card(self, card, worker, false),
            &mut into_cset_dcq,
            &self.into_cset_dcqs,
        );

        let closure = RefineRecordRefsIntoCSetClosure::new(self, into_cset_dcq);
        let mut processed = 0;
        while self
            .dcqs
            .apply_closure_to_completed_buffer(&closure, worker_id, 0)
        {
            processed += 1;
        }
        closure.into_queue().flush(&self.into_cset_dcqs);
        debug!(
            "Worker {} refined {} buffers, {} into-cset buffers",
            worker_id,
            processed,
            self.into_cset_dcqs.completed_buffers_num()
        );
        processed
    }

    /// Resume concurrent refinement after a pause.
    ///
    /// If evacuation failed, the cards holding references into the collection set are dirtied
    /// again and handed back to refinement, since those references still point into regions
    /// that stay. Otherwise they are dropped.
    pub fn gc_pause_end(&self, evacuation_failed: bool) {
        if evacuation_failed {
            self.into_cset_dcqs.apply_closure_to_all_completed_buffers(|card| {
                if !self.card_table.is_card_young(card) {
                    self.card_table.set_state(card, CardState::Dirty);
                }
            });
            self.dcqs.merge_bufferlists(&self.into_cset_dcqs);
        } else {
            self.into_cset_dcqs.clear();
        }
        if !self.hot_card_cache.is_drained() {
            // Cached cards stay dirty, so the barrier would never log them again.
            let hooks = G1QueueHooks::non_mutator(self);
            for card in self.hot_card_cache.cached_cards() {
                self.dcqs.enqueue_shared(card, &hooks);
            }
            self.dcqs.flush_shared_dirty_card_queue();
        }
        self.hot_card_cache.reset_hot_cache();
        self.hot_card_cache.reset_hot_cache_claimed_index();
        self.hot_card_cache.set_use_cache(true);
        self.cg1r.update_padding(&self.dcqs);
        self.dcqs.notify_if_necessary();
        debug!(
            "Pause ends with {} completed buffers, padding {}",
            self.dcqs.completed_buffers_num(),
            self.dcqs.completed_queue_padding()
        );
        self.sts.desynchronize();
    }

    /// Adapt the refinement zones after a pause. See [`ConcurrentG1Refine::adjust`].
    pub fn adjust_concurrent_refinement(
        &self,
        update_rs_time_ms: f64,
        processed_buffers: usize,
        goal_ms: f64,
    ) {
        self.cg1r
            .adjust(update_rs_time_ms, processed_buffers, goal_ms, &self.dcqs);
    }

    /// Drop every logged card and cached hot card, e.g. before a full collection that rebuilds
    /// the remembered sets from scratch.
    pub fn abandon_logs<'a, I>(&self, mutators: I)
    where
        I: IntoIterator<Item = &'a mut Mutator<VM>>,
    {
        self.dcqs.clear();
        for mutator in mutators {
            mutator.abandon();
        }
        self.dcqs.reset_shared_dirty_card_queue();
        self.hot_card_cache.reset_hot_cache();
        self.hot_card_cache.reset_card_counts();
    }

    /// Stop all refinement threads, then refine every card still logged on the calling thread.
    /// Mutators should have been flushed or destroyed before.
    pub fn shutdown(&self) {
        self.cg1r.stop(&self.dcqs);
        self.dcqs.flush_shared_dirty_card_queue();
        self.hot_card_cache.set_use_cache(false);

        let worker_id = self.cg1r.worker_id_offset();
        let closure = G1RefineCardClosure::for_mutator(self);
        let mut processed = 0;
        while self
            .dcqs
            .apply_closure_to_completed_buffer(&closure, worker_id, 0)
        {
            processed += 1;
        }

        let mut unused = DirtyCardQueue::new();
        self.hot_card_cache.reset_hot_cache_claimed_index();
        self.hot_card_cache.drain(
            worker_id,
            |card, worker| refine_card(self, card, worker, true),
            &mut unused,
            &self.into_cset_dcqs,
        );
        self.hot_card_cache.reset_hot_cache();
        self.hot_card_cache.reset_hot_cache_claimed_index();
        info!(
            "Refinement shut down: {} buffers refined at exit, {} cards refined concurrently, \
             {:.3}s refinement CPU time",
            processed,
            self.rem_set.conc_refine_cards(),
            self.cg1r.total_vtime()
        );
    }
}
