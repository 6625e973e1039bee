//! Region-level metadata shared by the write barrier and refinement: the card table, card
//! counts, regions and their remembered sets.

mod card;
mod card_counts;
mod cardtable;
mod region;
mod remset;

pub use self::card::*;
pub use self::card_counts::*;
pub use self::cardtable::*;
pub use self::region::*;
pub use self::remset::*;
