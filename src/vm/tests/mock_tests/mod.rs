// Mock tests should have the prefix 'mock_test_' in their file name.

// Common includes for mock tests.
pub(crate) mod mock_test_prelude {
    pub use crate::memory_manager;
    pub use crate::plan::MutatorContext;
    pub use crate::policy::region::{Card, CardState};
    pub use crate::util::test_util::fixtures::*;
    pub use crate::util::test_util::mock_vm::*;
    pub use crate::util::test_util::{panic_after, wait_until};
    pub use crate::util::{Address, ObjectReference};
    pub use crate::vm::*;
}

mod mock_test_barrier_logging;
mod mock_test_evacuation_failure;
mod mock_test_hot_card_cache;
mod mock_test_mutator_back_pressure;
mod mock_test_refinement_stress;
mod mock_test_shutdown;
mod mock_test_worker_cascade;
