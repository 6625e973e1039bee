//! Concurrent remembered-set refinement of the Garbage-First collector.

mod concurrent_refine;
mod concurrent_refine_thread;
mod dirty_card_queue;
mod g1remset;
mod hot_card_cache;

pub use self::concurrent_refine::{ConcurrentG1Refine, Zone};
pub use self::concurrent_refine_thread::ConcurrentG1RefineThread;
pub use self::dirty_card_queue::{
    apply_closure_to_buffer, BufferNode, CardBuffer, CardQueueHooks, CardTableEntryClosure,
    DirtyCardQueue, DirtyCardQueueSet, DirtyCardQueueSetConfig, NonMutatorHooks,
};
pub use self::g1remset::{
    refine_card, G1QueueHooks, G1RefineCardClosure, G1RemSet, RefineRecordRefsIntoCSetClosure,
};
pub use self::hot_card_cache::G1HotCardCache;
