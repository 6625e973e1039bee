//! Concurrent remembered-set refinement for a region-based, Garbage-First style collector.
//!
//! The crate keeps the remembered sets of a regionalized heap up to date while the
//! application runs:
//!
//! * A post-write barrier ([`plan::barriers::G1PostBarrier`]) dirties the card of every store
//!   that creates a reference from one region into another and logs the card on the
//!   mutator's own dirty card queue.
//! * Full queues are handed off to a global list of completed buffers
//!   ([`plan::g1::DirtyCardQueueSet`]).
//! * A cascade of refinement threads ([`plan::g1::ConcurrentG1Refine`]) scans the cards of
//!   completed buffers and records the cross-region references they find in the remembered
//!   set of each target region. The more buffers are pending, the more threads run; past
//!   the red zone, mutators refine their own buffers.
//! * Cards refined over and over are parked in a hot card cache
//!   ([`plan::g1::G1HotCardCache`]) and refined once per eviction instead.
//! * A pause synchronizes with the refinement threads, refines whatever is left and hands
//!   the cards holding references into the collection set to the evacuation.
//!
//! A VM binding implements [`vm::VMBinding`] and drives the subsystem through
//! [`memory_manager`] and [`G1RefinementContext`].

#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate lazy_static;

mod context;
pub mod memory_manager;
pub mod plan;
pub mod policy;
pub mod scheduler;
pub mod util;
pub mod vm;

pub use crate::context::{G1RefineBuilder, G1RefinementContext};
pub use crate::plan::Mutator;
