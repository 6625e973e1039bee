use crate::util::Address;
use crate::util::ObjectReference;

/// Callback trait of card scanning functions.
pub trait SlotVisitor {
    /// Call this function for each reference field found, with the value it currently holds.
    fn visit_slot(&mut self, slot: Address, value: ObjectReference);
}

/// This lets us use closures as SlotVisitor.
impl<F: FnMut(Address, ObjectReference)> SlotVisitor for F {
    fn visit_slot(&mut self, slot: Address, value: ObjectReference) {
        self(slot, value)
    }
}
