/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bits in a word
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_ADDRESS as usize;
/// The number of bits in a word. Remembered-set card bitmaps are arrays of words.
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// log2 of the number of heap bytes covered by one card
pub const LOG_BYTES_IN_CARD: usize = 9;
/// The number of heap bytes covered by one card
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;
/// Mask for the offset of an address within its card
pub const CARD_MASK: usize = BYTES_IN_CARD - 1;

/// The size of one slot in a dirty card buffer. Queue cursors count bytes, not slots.
pub const BYTES_IN_CARD_SLOT: usize = BYTES_IN_ADDRESS;

/// The smallest region we accept: anything smaller makes the per-region card bitmaps
/// degenerate.
pub const MIN_BYTES_IN_REGION: usize = 4 * BYTES_IN_CARD;

/// The default region size.
pub const DEFAULT_BYTES_IN_REGION: usize = BYTES_IN_MBYTE;

/// The largest hot card cache we allow (`1 << 27` entries).
pub const MAX_LOG_HOT_CARD_CACHE_SIZE: usize = 27;

/// The young-RSet sampler checks for a yield request after visiting this many regions.
pub const YOUNG_RS_SAMPLING_YIELD_INTERVAL: usize = 10;
