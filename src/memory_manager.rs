//! VM-to-refinement interface: safe Rust APIs.
//!
//! This module provides the entry points a VM binding calls: creating the refinement context,
//! starting the refinement threads, binding mutators and running their write barriers.
//! Region state changes and the pause hooks are methods of [`G1RefinementContext`].
//!
//! For mutators, this API provides a `Box<Mutator>`, and requires a `&mut Mutator` for the
//! write barrier. A VM binding can keep the box in thread local storage, or turn it into a raw
//! pointer for its native code; either way, the binding guarantees that only the owning thread
//! uses it.

use std::ops::Range;
use std::sync::Arc;

use crate::context::{G1RefineBuilder, G1RefinementContext};
use crate::plan::{Mutator, MutatorContext};
use crate::util::options::ConfigError;
use crate::util::{Address, ObjectReference};
use crate::vm::VMBinding;

/// Create the refinement context for the heap `heap`.
///
/// We expect a binding to initialize refinement in the following steps:
///
/// 1. Create a [`G1RefineBuilder`] and set options on it with [`process`] or
///    [`process_bulk`].
/// 2. Call this function with the builder, the binding instance and the heap range. The heap
///    must be aligned to `G1HeapRegionSize`.
/// 3. Call [`initialize_collection`] once the VM can run the refinement threads.
///
/// Note that this method will attempt to initialize a logger. If the VM would like to use its
/// own logger, it should initialize the logger before calling this method.
///
/// Arguments:
/// * `builder`: The options for the new context.
/// * `binding`: The VM binding, used to scan cards and to report young RSet lengths.
/// * `heap`: The covered heap.
pub fn g1refine_init<VM: VMBinding>(
    builder: &G1RefineBuilder,
    binding: VM,
    heap: Range<Address>,
) -> Result<Arc<G1RefinementContext<VM>>, ConfigError> {
    match crate::util::logger::try_init() {
        Ok(_) => debug!("g1refine initialized the logger."),
        Err(_) => debug!(
            "g1refine failed to initialize the logger. Possibly a logger has been initialized by user."
        ),
    }
    let ctx = builder.build(binding, heap)?;
    #[cfg(feature = "extreme_assertions")]
    warn!("The feature 'extreme_assertions' is enabled. Refinement will run expensive run-time checks. Slow performance should be expected.");
    Ok(Arc::new(ctx))
}

/// Start the concurrent refinement threads. Until this is called, logged cards are only
/// refined by mutators past the red zone and by pauses.
///
/// Arguments:
/// * `ctx`: A reference to the refinement context.
pub fn initialize_collection<VM: VMBinding>(
    ctx: &Arc<G1RefinementContext<VM>>,
) -> std::io::Result<()> {
    ctx.start_concurrent_refinement()
}

/// Set an option on the builder. Returns true if the option is known and the value valid.
///
/// Arguments:
/// * `builder`: The builder to set the option on.
/// * `name`: The name of the option, in snake case or as the flag name.
/// * `value`: The value of the option (as a string).
pub fn process(builder: &mut G1RefineBuilder, name: &str, value: &str) -> bool {
    builder.set_option(name, value)
}

/// Set multiple options on the builder from a whitespace-separated list of flags.
///
/// Arguments:
/// * `builder`: The builder to set the options on.
/// * `options`: A string of flags, e.g. `-XX:G1UpdateBufferSize=64 -XX:-G1UseAdaptiveConcRefinement`.
pub fn process_bulk(builder: &mut G1RefineBuilder, options: &str) -> Result<(), ConfigError> {
    builder.set_options_bulk_by_str(options)
}

/// Request a mutator for a new thread. For performance reasons, a VM should store the returned
/// mutator in a thread local storage that can be accessed efficiently.
///
/// Arguments:
/// * `ctx`: A reference to the refinement context.
pub fn bind_mutator<VM: VMBinding>(ctx: &Arc<G1RefinementContext<VM>>) -> Box<Mutator<VM>> {
    crate::plan::mutator_context::create_mutator(ctx)
}

/// Reclaim a mutator that is no longer needed. Its logged cards are handed off first.
///
/// Arguments:
/// * `mutator`: A reference to the mutator to be destroyed.
pub fn destroy_mutator<VM: VMBinding>(mut mutator: Box<Mutator<VM>>) {
    mutator.flush();
    drop(mutator);
}

/// Flush the mutator's logged cards to the completed buffer list.
///
/// Arguments:
/// * `mutator`: A reference to the mutator.
pub fn flush_mutator<VM: VMBinding>(mutator: &mut Mutator<VM>) {
    mutator.flush()
}

/// The post write barrier. A binding calls this *after* it stores `target` into the field at
/// `slot`. For performance reasons, a VM should implement the barrier fast path (the region
/// filter and the young card check) on its side and only call this for the remaining writes.
///
/// Arguments:
/// * `mutator`: The mutator for the current thread.
/// * `slot`: The location of the modified field.
/// * `target`: The value stored.
#[inline(always)]
pub fn object_reference_write_post<VM: VMBinding>(
    mutator: &mut Mutator<VM>,
    slot: Address,
    target: ObjectReference,
) {
    mutator.object_reference_write_post(slot, target);
}

/// The post barrier for a bulk update of reference fields, such as an array copy. A binding
/// calls this *after* the update.
///
/// Arguments:
/// * `mutator`: The mutator for the current thread.
/// * `range`: The updated fields.
pub fn memory_region_write_post<VM: VMBinding>(mutator: &mut Mutator<VM>, range: Range<Address>) {
    mutator.memory_region_write_post(range);
}

/// The post write barrier for threads that have no mutator, e.g. VM-internal threads. The card
/// is logged on the queue shared by all such threads.
///
/// Arguments:
/// * `ctx`: A reference to the refinement context.
/// * `slot`: The location of the modified field.
/// * `target`: The value stored.
pub fn object_reference_write_shared<VM: VMBinding>(
    ctx: &G1RefinementContext<VM>,
    slot: Address,
    target: ObjectReference,
) {
    ctx.write_ref_field_shared(slot, target);
}

/// Stop the refinement threads and refine whatever is still logged. Mutators should have been
/// destroyed or flushed before.
///
/// Arguments:
/// * `ctx`: A reference to the refinement context.
pub fn shutdown<VM: VMBinding>(ctx: &G1RefinementContext<VM>) {
    ctx.shutdown();
}
