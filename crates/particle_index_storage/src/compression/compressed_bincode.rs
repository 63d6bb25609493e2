use super::{BytesCompression, Compressed, Compression};

use particle_index_core::Result;

use serde::{de::DeserializeOwned, Serialize};

/// Run some compression algorithm `A` after bincode serializing a type `T`.
pub struct BincodeCompression<T, A> {
    pub compression: A,
    marker: std::marker::PhantomData<T>,
}

impl<T, A> Clone for BincodeCompression<T, A>
where
    A: Clone,
{
    fn clone(&self) -> Self {
        Self {
            compression: self.compression.clone(),
            marker: Default::default(),
        }
    }
}

impl<T, A> Copy for BincodeCompression<T, A> where A: Copy {}

impl<T, A> BincodeCompression<T, A> {
    pub fn new(compression: A) -> Self {
        Self {
            compression,
            marker: Default::default(),
        }
    }
}

impl<T, A> Compression for BincodeCompression<T, A>
where
    T: DeserializeOwned + Serialize,
    A: BytesCompression,
{
    type Data = T;
    type CompressedData = Vec<u8>;

    fn compress(&self, data: &Self::Data) -> Result<Compressed<Self>> {
        let mut compressed_bytes = Vec::new();
        self.compression
            .compress_bytes(&bincode::serialize(data)?, &mut compressed_bytes)?;

        Ok(Compressed::new(compressed_bytes))
    }

    fn decompress(compressed: &Self::CompressedData) -> Result<Self::Data> {
        let mut decompressed_bytes = Vec::new();
        A::decompress_bytes(compressed, &mut decompressed_bytes)?;

        Ok(bincode::deserialize(&decompressed_bytes)?)
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{octree::ForestRecord, Lz4};

    #[test]
    fn compress_and_decompress_forest_record() {
        let record = ForestRecord {
            dims: (4, 4, 4),
            left_edge: (0.0, 0.0, 0.0),
            right_edge: (1.0, 1.0, 1.0),
            over_refine: 1,
            num_root: 2,
            octree: vec![0b1, 0, 0b1000_0000],
            nocts: 17,
            keys: vec![3, 12],
            domain_id: 5,
        };

        let compression = BincodeCompression::new(Lz4 { level: 10 });
        let compressed = compression.compress(&record).unwrap();
        let decompressed = compressed.decompress().unwrap();

        assert_eq!(record, decompressed);
    }

    #[test]
    fn garbage_fails_to_decompress() {
        let compressed = Compressed::<BincodeCompression<ForestRecord, Lz4>>::new(vec![1, 2, 3]);

        assert!(compressed.decompress().is_err());
    }
}
