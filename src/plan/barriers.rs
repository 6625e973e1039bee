use std::ops::Range;
use std::sync::Arc;

use crate::context::G1RefinementContext;
use crate::plan::g1::{DirtyCardQueue, G1QueueHooks};
use crate::policy::region::Card;
use crate::util::*;
use crate::vm::VMBinding;

/// What a mutator wrote.
pub enum WriteTarget {
    /// A reference store of `new_value` into the field at `slot`.
    Slot {
        slot: Address,
        new_value: ObjectReference,
    },
    /// A bulk update of a range of reference fields, e.g. an array copy.
    Range(Range<Address>),
}

pub trait Barrier: 'static + Send {
    /// Hand any buffered state to the global queues.
    fn flush(&mut self);
    /// Drop any buffered state.
    fn abandon(&mut self);
    fn post_write_barrier(&mut self, target: WriteTarget);
}

pub struct NoBarrier;

impl Barrier for NoBarrier {
    fn flush(&mut self) {}
    fn abandon(&mut self) {}
    fn post_write_barrier(&mut self, _target: WriteTarget) {}
}

/// The G1 post-write barrier: dirty the card of a cross-region store and log the card on the
/// mutator's own dirty card queue.
pub struct G1PostBarrier<VM: VMBinding> {
    ctx: Arc<G1RefinementContext<VM>>,
    dcq: DirtyCardQueue,
}

impl<VM: VMBinding> G1PostBarrier<VM> {
    pub fn new(ctx: Arc<G1RefinementContext<VM>>) -> Self {
        Self {
            ctx,
            dcq: DirtyCardQueue::new(),
        }
    }

    /// Number of cards logged but not yet handed off.
    pub fn queue_size(&self) -> usize {
        self.dcq.size()
    }

    /// The card-table part of the barrier, without the static filter.
    #[inline(always)]
    pub fn record_reference_write(&mut self, slot: Address) {
        if let Some(card) = self.ctx.card_table().log_write(slot) {
            self.enqueue(card);
        }
    }

    #[cold]
    fn enqueue(&mut self, card: Card) {
        let ctx = &*self.ctx;
        self.dcq.enqueue(
            card,
            ctx.dirty_card_queue_set(),
            &G1QueueHooks::mutator(ctx),
        );
    }

    fn invalidate(&mut self, range: Range<Address>) {
        let ctx = self.ctx.clone();
        ctx.card_table()
            .invalidate(range, false, |card| self.enqueue(card));
    }
}

impl<VM: VMBinding> Barrier for G1PostBarrier<VM> {
    fn flush(&mut self) {
        self.dcq.flush(self.ctx.dirty_card_queue_set());
    }

    fn abandon(&mut self) {
        self.dcq.reset();
    }

    #[inline(always)]
    fn post_write_barrier(&mut self, target: WriteTarget) {
        match target {
            WriteTarget::Slot { slot, new_value } => {
                if self.ctx.requires_logging(slot, new_value) {
                    self.record_reference_write(slot);
                }
            }
            WriteTarget::Range(range) => self.invalidate(range),
        }
    }
}

impl<VM: VMBinding> Drop for G1PostBarrier<VM> {
    fn drop(&mut self) {
        self.flush();
    }
}
