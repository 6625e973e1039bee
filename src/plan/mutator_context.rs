use std::ops::Range;
use std::sync::Arc;

use crate::context::G1RefinementContext;
use crate::plan::barriers::{Barrier, G1PostBarrier, WriteTarget};
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// Per-thread state of a mutator: its write barrier, which owns the thread's dirty card queue.
pub struct Mutator<VM: VMBinding> {
    pub barrier: Box<dyn Barrier>,
    ctx: Arc<G1RefinementContext<VM>>,
}

/// The operations a mutator supports besides its barrier.
pub trait MutatorContext<VM: VMBinding>: Send + 'static {
    fn flush(&mut self);
    /// Forget the cards logged since the last flush.
    fn abandon(&mut self);
    fn barrier(&mut self) -> &mut dyn Barrier;
    fn context(&self) -> &Arc<G1RefinementContext<VM>>;
}

impl<VM: VMBinding> Mutator<VM> {
    /// Reference store of `new_value` into the field at `slot`. Call after the store.
    #[inline(always)]
    pub fn object_reference_write_post(&mut self, slot: Address, new_value: ObjectReference) {
        self.barrier
            .post_write_barrier(WriteTarget::Slot { slot, new_value });
    }

    /// Bulk update of the reference fields in `range`. Call after the update.
    pub fn memory_region_write_post(&mut self, range: Range<Address>) {
        self.barrier.post_write_barrier(WriteTarget::Range(range));
    }
}

impl<VM: VMBinding> MutatorContext<VM> for Mutator<VM> {
    fn flush(&mut self) {
        self.barrier.flush();
    }

    fn abandon(&mut self) {
        self.barrier.abandon();
    }

    fn barrier(&mut self) -> &mut dyn Barrier {
        &mut *self.barrier
    }

    fn context(&self) -> &Arc<G1RefinementContext<VM>> {
        &self.ctx
    }
}

pub fn create_mutator<VM: VMBinding>(ctx: &Arc<G1RefinementContext<VM>>) -> Box<Mutator<VM>> {
    Box::new(Mutator {
        barrier: Box::new(G1PostBarrier::new(ctx.clone())),
        ctx: ctx.clone(),
    })
}
