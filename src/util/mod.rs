//! Utilities shared by the rest of the crate: addresses, constants, options, locks and logging.

/// Address and object reference types.
pub mod address;
/// Sizes and log sizes used throughout refinement.
pub mod constants;
/// Claimable worker ids.
pub mod free_id_set;
/// Rank-checked mutexes and condition variables.
pub mod lock_rank;
/// Logger initialization.
pub mod logger;
/// Refinement options.
pub mod options;
/// Thread CPU time.
pub mod os;

#[cfg(test)]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
