#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod trace;

mod bucket;

/// The incrementally growing bucket table underneath [`HashMap`].
pub mod bucket_table;

/// Byte views of keys and values.
pub mod bytes;

/// Randomized traversal that tolerates writes between steps.
pub mod cursor;

/// Errors reported by fallible table operations.
pub mod error;

/// A `HashMap` over the bucket table.
///
/// This module provides a `HashMap` with a standard key-value interface,
/// configurable hashers and randomized iteration.
pub mod hash_map;

pub use bucket::BUCKET_SIZE;
pub use bucket_table::BucketTable;
pub use bytes::AsBytes;
pub use cursor::Cursor;
pub use cursor::CursorState;
pub use error::Error;
pub use hash_map::HashMap;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Hasher builder used when none is named.
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// Hasher builder used when none is named.
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// Placeholder hasher builder when neither `foldhash` nor `std` is
        /// enabled. Maps must then be built with an explicit hasher.
        #[derive(Clone, Copy, Debug)]
        pub enum DefaultHashBuilder {}
    }
}
