//! Block-option primitives shared by the Block1 and Block2 directions.

use derive_more::Display;

use super::error::BlockSizeError;

/// Power-of-two block size on the protocol lattice (16..=1024 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct BlockSize(usize);

impl BlockSize {
    /// Smallest negotiable block size.
    pub const MIN: Self = Self(16);
    /// Largest negotiable block size.
    pub const MAX: Self = Self(1024);

    /// Construct a validated block size.
    ///
    /// # Errors
    ///
    /// Returns [`BlockSizeError::Invalid`] unless `value` is a power of two
    /// in `16..=1024`.
    pub const fn new(value: usize) -> Result<Self, BlockSizeError> {
        if value.is_power_of_two() && value >= Self::MIN.0 && value <= Self::MAX.0 {
            Ok(Self(value))
        } else {
            Err(BlockSizeError::Invalid { value })
        }
    }

    /// Return the size in bytes.
    #[must_use]
    pub const fn get(self) -> usize { self.0 }
}

impl TryFrom<usize> for BlockSize {
    type Error = BlockSizeError;

    fn try_from(value: usize) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<BlockSize> for usize {
    fn from(value: BlockSize) -> Self { value.0 }
}

/// The `(num, more, size)` triple carried by a Block1 or Block2 option.
///
/// `num` is the zero-based block number, `more` flags that further blocks
/// follow, `size` is the negotiated block size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[display("({num}, {more}, {size})")]
pub struct BlockOptions {
    pub num: u32,
    pub more: bool,
    pub size: BlockSize,
}

impl BlockOptions {
    /// Construct an option triple.
    #[must_use]
    pub const fn new(num: u32, more: bool, size: BlockSize) -> Self { Self { num, more, size } }

    /// Cursor for the first block of a fresh outbound payload.
    #[must_use]
    pub const fn first(size: BlockSize) -> Self { Self::new(0, true, size) }

    /// Fragment index addressed by this triple.
    ///
    /// `u32` always fits in `usize` on the supported targets; saturating
    /// keeps the result safely out of range elsewhere.
    #[must_use]
    pub fn index(self) -> usize { usize::try_from(self.num).unwrap_or(usize::MAX) }
}
