//! Byte-level access to source images.
//!
//! Everything above this layer works through the [`RangeReader`] capability:
//! positioned, repeatable reads over a resource of known size. Implementations
//! cover local files, HTTP(S) origins (with a buffering fallback for servers
//! without range support), S3-compatible object stores, and in-memory
//! buffers. [`BlockCachedReader`] layers block-granular caching over any of
//! them for the scattered small reads container parsing produces.

mod block_cache;
mod file_reader;
mod http_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCachedReader, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use file_reader::FileRangeReader;
pub use http_reader::{HttpCredentials, HttpRangeReader};
pub use range_reader::{
    read_all, read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le,
    MemoryRangeReader, RangeReader,
};
pub use s3_reader::{create_object_client, ObjectRangeReader};
