//! The mutator side of refinement and the G1 refinement pipeline.
//!
//! * [`barriers`]: the post-write barrier that dirties and logs cards.
//! * [`mutator_context`]: the per-thread [`Mutator`] owning a barrier.
//! * [`g1`]: dirty card queues, the hot card cache, card refinement and the refinement
//!   threads.

pub mod barriers;
pub mod g1;
pub mod mutator_context;

pub use self::mutator_context::Mutator;
pub use self::mutator_context::MutatorContext;
