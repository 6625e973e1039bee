use crate::util::constants::*;
use crate::util::Address;
use std::fmt;

/// The value of a card table byte.
///
/// A card starts clean, is dirtied by the write barrier, claimed by the thread that refines it
/// and cleaned again once refined. `Deferred` may be installed on a clean or claimed card by a
/// pause that schedules the card for a later scan. `Young` masks all other states while the
/// card covers a young region.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug, strum_macros::EnumIter)]
pub enum CardState {
    Clean = 0xFF,
    Dirty = 0,
    Claimed = 1,
    Deferred = 2,
    ClaimedDeferred = 3,
    Young = 0x20,
}

/// Bits that are only ever set in a clean card.
pub const CLEAN_CARD_MASK: u8 = 0xE0;

// `Clean` is the only state with every clean-mask bit set.
static_assertions::const_assert_eq!(CardState::Clean as u8 & CLEAN_CARD_MASK, CLEAN_CARD_MASK);
static_assertions::const_assert_eq!(CardState::Young as u8 & CLEAN_CARD_MASK, 0x20);
static_assertions::const_assert!(BYTES_IN_CARD.is_power_of_two());

impl CardState {
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    pub const fn from_byte(byte: u8) -> Option<CardState> {
        match byte {
            0xFF => Some(CardState::Clean),
            0 => Some(CardState::Dirty),
            1 => Some(CardState::Claimed),
            2 => Some(CardState::Deferred),
            3 => Some(CardState::ClaimedDeferred),
            0x20 => Some(CardState::Young),
            _ => None,
        }
    }
}

/// A card, identified by the start address of the heap range it covers.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Card(Address);

impl Card {
    #[inline]
    pub const fn align(address: Address) -> Address {
        address.align_down(BYTES_IN_CARD)
    }

    /// The card covering `address`.
    #[inline]
    pub const fn of(address: Address) -> Self {
        Self(Self::align(address))
    }

    #[inline]
    pub fn from_aligned_address(address: Address) -> Self {
        debug_assert!(address.is_aligned_to(BYTES_IN_CARD));
        Self(address)
    }

    #[inline]
    pub const fn start(&self) -> Address {
        self.0
    }

    #[inline]
    pub const fn end(&self) -> Address {
        self.0.add(BYTES_IN_CARD)
    }

    #[inline]
    pub const fn as_usize(&self) -> usize {
        self.0.as_usize()
    }
}

impl fmt::Debug for Card {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Card({})", self.0)
    }
}
