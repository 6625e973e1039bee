//! Card refinement: turning a dirty card back into remembered-set entries.

use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::dirty_card_queue::{
    CardQueueHooks, CardTableEntryClosure, DirtyCardQueue, NonMutatorHooks,
};
use crate::context::G1RefinementContext;
use crate::policy::region::{Card, CardState, HeapRegion};
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// Refinement statistics.
#[derive(Default)]
pub struct G1RemSet {
    conc_refine_cards: AtomicUsize,
    pause_refine_cards: AtomicUsize,
}

impl G1RemSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cards scanned outside a pause, by refinement workers or by mutators.
    pub fn conc_refine_cards(&self) -> usize {
        self.conc_refine_cards.load(Ordering::Relaxed)
    }

    /// Cards scanned while updating remembered sets in a pause.
    pub fn pause_refine_cards(&self) -> usize {
        self.pause_refine_cards.load(Ordering::Relaxed)
    }

    fn record_refined(&self, concurrent: bool) {
        if concurrent {
            self.conc_refine_cards.fetch_add(1, Ordering::Relaxed);
        } else {
            self.pause_refine_cards.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// The region whose cards may be refined, or `None` if `card` is outside the heap or belongs to
/// a young or collection set region.
fn refinable_region<VM: VMBinding>(
    ctx: &G1RefinementContext<VM>,
    card: Card,
) -> Option<&HeapRegion> {
    let region = ctx.regions().region_for(card.start())?;
    if region.is_young() || region.in_collection_set() {
        None
    } else {
        Some(region)
    }
}

/// Scan one dirty card and record every reference it holds into another region.
///
/// Outside a pause (`concurrent`), references are added to the remembered set of the region
/// they point into, and hot cards go through the hot card cache first. During a pause,
/// references into the collection set are not recorded; the return value says whether the card
/// held any, so that the caller can log the card for the evacuation.
pub fn refine_card<VM: VMBinding>(
    ctx: &G1RefinementContext<VM>,
    card: Card,
    worker_id: usize,
    concurrent: bool,
) -> bool {
    let card_table = ctx.card_table();
    if !card_table.is_card_dirty(card) {
        return false;
    }
    let Some(mut region) = refinable_region(ctx, card) else {
        return false;
    };

    let mut card = card;
    let hot_card_cache = ctx.hot_card_cache();
    if concurrent && hot_card_cache.use_cache() {
        match hot_card_cache.insert(card) {
            None => return false,
            Some(to_refine) => {
                if to_refine != card {
                    // The evicted card may have been cached before its region became young
                    // or was freed. Its card byte tells us; the claim below fails for it.
                    match ctx.regions().region_for(to_refine.start()) {
                        Some(r) => region = r,
                        None => return false,
                    }
                    card = to_refine;
                }
            }
        }
    }

    if !card_table.compare_exchange(card, CardState::Dirty, CardState::Claimed) {
        return false;
    }

    let regions = ctx.regions();
    let from_index = region.index();
    let mut has_refs_into_cset = false;
    ctx.binding()
        .scan_card(card.start(), card.end(), &mut |field: Address, value: ObjectReference| {
            if value.is_null() {
                return;
            }
            let Some(to) = regions.region_for(value.to_address()) else {
                return;
            };
            if to.index() == from_index {
                return;
            }
            if !concurrent && to.in_collection_set() {
                has_refs_into_cset = true;
            } else {
                to.rem_set().add_pointer(field);
            }
        });
    ctx.rem_set().record_refined(concurrent);

    // Unclaim. A failed CAS means the card was deferred or dirtied again while we scanned.
    if !card_table.compare_exchange(card, CardState::Claimed, CardState::Clean) {
        card_table.compare_exchange(card, CardState::ClaimedDeferred, CardState::Deferred);
    }
    trace!(
        "Refined {:?} on worker {} (concurrent: {}, into cset: {})",
        card,
        worker_id,
        concurrent,
        has_refs_into_cset
    );
    has_refs_into_cset
}

/// Refines each card of a completed buffer outside a pause.
///
/// A refinement worker's closure stops at the first card after a pause asked the suspendible
/// thread set to yield; the rest of the buffer goes back on the completed list. A mutator
/// refining its own buffer never stops early.
pub struct G1RefineCardClosure<'a, VM: VMBinding> {
    ctx: &'a G1RefinementContext<VM>,
    yield_on_request: bool,
}

impl<'a, VM: VMBinding> G1RefineCardClosure<'a, VM> {
    pub fn for_worker(ctx: &'a G1RefinementContext<VM>) -> Self {
        Self {
            ctx,
            yield_on_request: true,
        }
    }

    pub fn for_mutator(ctx: &'a G1RefinementContext<VM>) -> Self {
        Self {
            ctx,
            yield_on_request: false,
        }
    }
}

impl<VM: VMBinding> CardTableEntryClosure for G1RefineCardClosure<'_, VM> {
    fn do_card_ptr(&self, card: Card, worker_id: usize) -> bool {
        let into_cset = refine_card(self.ctx, card, worker_id, true);
        debug_assert!(!into_cset, "concurrent refinement never looks at the collection set");
        !(self.yield_on_request && self.ctx.suspendible_thread_set().should_yield())
    }
}

/// Refines cards during a pause and logs the cards holding references into the collection set
/// on a private queue of the into-cset queue set.
pub struct RefineRecordRefsIntoCSetClosure<'a, VM: VMBinding> {
    ctx: &'a G1RefinementContext<VM>,
    into_cset_dcq: RefCell<DirtyCardQueue>,
}

impl<'a, VM: VMBinding> RefineRecordRefsIntoCSetClosure<'a, VM> {
    pub fn new(ctx: &'a G1RefinementContext<VM>, into_cset_dcq: DirtyCardQueue) -> Self {
        Self {
            ctx,
            into_cset_dcq: RefCell::new(into_cset_dcq),
        }
    }

    pub fn into_queue(self) -> DirtyCardQueue {
        self.into_cset_dcq.into_inner()
    }
}

impl<VM: VMBinding> CardTableEntryClosure for RefineRecordRefsIntoCSetClosure<'_, VM> {
    fn do_card_ptr(&self, card: Card, worker_id: usize) -> bool {
        if refine_card(self.ctx, card, worker_id, false) {
            self.into_cset_dcq.borrow_mut().enqueue(
                card,
                self.ctx.into_cset_dirty_card_queue_set(),
                &NonMutatorHooks,
            );
        }
        true
    }
}

/// Queue hooks backed by the card table: buffer filtering drops cards that are no longer
/// dirty, and a mutator thread that hits the red zone refines its own buffer.
pub struct G1QueueHooks<'a, VM: VMBinding> {
    ctx: &'a G1RefinementContext<VM>,
    mutator_closure: Option<G1RefineCardClosure<'a, VM>>,
}

impl<'a, VM: VMBinding> G1QueueHooks<'a, VM> {
    pub fn mutator(ctx: &'a G1RefinementContext<VM>) -> Self {
        Self {
            ctx,
            mutator_closure: Some(G1RefineCardClosure::for_mutator(ctx)),
        }
    }

    pub fn non_mutator(ctx: &'a G1RefinementContext<VM>) -> Self {
        Self {
            ctx,
            mutator_closure: None,
        }
    }
}

impl<VM: VMBinding> CardQueueHooks for G1QueueHooks<'_, VM> {
    fn retain_card(&self, card: Card) -> bool {
        self.ctx.card_table().is_card_dirty(card)
    }

    fn mutator_closure(&self) -> Option<&dyn CardTableEntryClosure> {
        self.mutator_closure
            .as_ref()
            .map(|closure| closure as &dyn CardTableEntryClosure)
    }
}
