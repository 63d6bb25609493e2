//! Compression of cached values. A forest record is bincode-serialized and then LZ4-compressed before it is parked in the tree
//! cache, and decompressed on a cache hit.

mod compressed_bincode;
mod lz4_compression;

pub use compressed_bincode::BincodeCompression;
pub use lz4_compression::Lz4;

use particle_index_core::Result;

use serde::{Deserialize, Serialize};

/// An algorithm for:
///     1. compressing a specific type `Data` into type `CompressedData`
///     2. decompressing `CompressedData` back into `Data`
pub trait Compression: Sized {
    type Data;
    type CompressedData;

    fn compress(&self, data: &Self::Data) -> Result<Compressed<Self>>;
    fn decompress(compressed: &Self::CompressedData) -> Result<Self::Data>;
}

/// A value compressed with compression algorithm `A`.
#[derive(Clone, Deserialize, Serialize)]
pub struct Compressed<A>
where
    A: Compression,
{
    pub compressed_data: A::CompressedData,
    marker: std::marker::PhantomData<A>,
}

impl<A> Compressed<A>
where
    A: Compression,
{
    pub fn new(compressed_data: A::CompressedData) -> Self {
        Self {
            compressed_data,
            marker: Default::default(),
        }
    }

    pub fn decompress(&self) -> Result<A::Data> {
        A::decompress(&self.compressed_data)
    }

    pub fn take(self) -> A::CompressedData {
        self.compressed_data
    }
}

impl<A> Compressed<A>
where
    A: Compression<CompressedData = Vec<u8>>,
{
    /// Size of the compressed payload.
    pub fn num_bytes(&self) -> usize {
        self.compressed_data.len()
    }
}

/// A compression algorithm that acts directly on a slice of bytes.
pub trait BytesCompression {
    fn compress_bytes(&self, bytes: &[u8], compressed_bytes: impl std::io::Write) -> Result<()>;
    fn decompress_bytes(compressed_bytes: &[u8], bytes: &mut impl std::io::Write) -> Result<()>;
}
