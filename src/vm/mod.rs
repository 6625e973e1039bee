//! The VM side of refinement.
//!
//! A VM binding implements [`VMBinding`] so that refinement can find the reference fields of a
//! card and report young remembered-set lengths to the VM's pause-time policy. Allocation,
//! region management and the evacuation pause stay with the VM; it tells refinement about them
//! through [`crate::G1RefinementContext`].

mod scanning;
pub use self::scanning::SlotVisitor;

#[cfg(test)]
mod tests;

use crate::util::Address;

/// The `VMBinding` trait connects a VM to the refinement subsystem.
pub trait VMBinding
where
    Self: Sized + 'static + Send + Sync,
{
    /// Visit every reference field of the objects that overlap `[start, end)` and whose fields
    /// lie in that range. Called concurrently with mutators, so a field may be read while it is
    /// being written; either value is fine, because a racing write dirties the card again.
    fn scan_card(&self, start: Address, end: Address, visitor: &mut dyn SlotVisitor);

    /// Whether the VM sizes its young generation adaptively. Young remembered sets are only
    /// sampled if it does.
    fn adaptive_young_list_length(&self) -> bool {
        true
    }

    /// The summed remembered-set lengths of all young regions, sampled periodically by the
    /// young RSet sampling thread.
    fn revise_young_list_target_length_if_necessary(&self, rs_lengths: usize);
}
