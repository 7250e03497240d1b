//! SSTable (Sorted String Table) implementation.
//!
//! An SSTable is an immutable, sorted file of internal keys and values. It is
//! written once by a [`TableBuilder`] and read many times through a [`Table`].
//!
//! ## File Format
//!
//! ```text
//! [Data Block 1][trailer]
//! [Data Block 2][trailer]
//! ...
//! [Data Block N][trailer]
//! [Meta Index Block][trailer]   // empty
//! [Index Block][trailer]        // separator key -> data block handle
//! [Footer: 48B]                 // meta index handle, index handle, magic
//! ```
//!
//! ## Block Trailer
//!
//! ```text
//! [compression type: u8][masked crc32c(contents ++ type): u32]
//! ```

pub mod block;
pub mod builder;
pub mod footer;
pub mod reader;

pub use block::{Block, BlockBuilder, BlockIterator};
pub use builder::TableBuilder;
pub use footer::{BlockHandle, BlockTrailer, Footer};
pub use reader::{Table, TableIterator};

pub use crate::config::CompressionType;

/// Footer size in bytes (fixed)
pub const FOOTER_SIZE: usize = 48;

/// Size of the trailer following every block
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Magic number for SSTable files
pub const MAGIC_NUMBER: u64 = 0xdb47_7524_8b80_fb57;
