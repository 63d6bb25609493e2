//! The seam between the index and whatever reads particle files.
//!
//! A `ParticleSource` hands out positions as raw batches tagged with their scalar type, which is how they typically come off
//! disk. Only `f32` and `f64` coordinates are understood; decoding anything else is an `Error::DataType`.

use crate::SmallKeyHashMap;

use particle_index_core::{FileId, Error, Result};

use auto_impl::auto_impl;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ScalarType {
    F32,
    F64,
    I32,
    I64,
}

impl ScalarType {
    #[inline]
    pub fn size(self) -> usize {
        match self {
            ScalarType::F32 | ScalarType::I32 => 4,
            ScalarType::F64 | ScalarType::I64 => 8,
        }
    }
}

/// A run of `(x, y, z)` positions, stored as raw native-endian scalars.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionBatch {
    pub scalar_type: ScalarType,
    pub bytes: Vec<u8>,
}

impl PositionBatch {
    pub fn from_f32(positions: &[[f32; 3]]) -> Self {
        Self {
            scalar_type: ScalarType::F32,
            bytes: bytemuck::cast_slice(positions).to_vec(),
        }
    }

    pub fn from_f64(positions: &[[f64; 3]]) -> Self {
        Self {
            scalar_type: ScalarType::F64,
            bytes: bytemuck::cast_slice(positions).to_vec(),
        }
    }

    #[inline]
    pub fn position_size(&self) -> usize {
        3 * self.scalar_type.size()
    }

    /// The number of whole positions in the batch.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / self.position_size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes and widens every position to `f64`.
    pub fn decode(&self) -> Result<Vec<[f64; 3]>> {
        if self.bytes.len() % self.position_size() != 0 {
            return Err(Error::DataType(format!(
                "{} bytes is not a whole number of {:?} positions",
                self.bytes.len(),
                self.scalar_type
            )));
        }

        match self.scalar_type {
            ScalarType::F32 => Ok(bytemuck::pod_collect_to_vec::<u8, [f32; 3]>(&self.bytes)
                .into_iter()
                .map(|[x, y, z]| [f64::from(x), f64::from(y), f64::from(z)])
                .collect()),
            ScalarType::F64 => Ok(bytemuck::pod_collect_to_vec::<u8, [f64; 3]>(&self.bytes)),
            other => Err(Error::DataType(format!("{:?}", other))),
        }
    }

    /// The positions with indices in `range`, clamped to the batch.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let size = self.position_size();
        let end = range.end.min(self.len());
        let start = range.start.min(end);

        Self {
            scalar_type: self.scalar_type,
            bytes: self.bytes[start * size..end * size].to_vec(),
        }
    }
}

pub type PositionStream<'a> = Box<dyn Iterator<Item = PositionBatch> + 'a>;

/// Reads the particle positions of one file of a dataset.
#[auto_impl(&, Box)]
pub trait ParticleSource {
    /// A lazy, finite stream of position batches for `file`.
    fn stream_positions(&self, file: FileId) -> Result<PositionStream<'_>>;
}

/// A `ParticleSource` over positions already in memory.
///
/// Several files may share one block of positions, each covering its own range, which is how multi-file catalogs that split one
/// physical file into particle ranges are represented.
#[derive(Clone, Debug)]
pub struct InMemoryParticleSource {
    files: SmallKeyHashMap<FileId, (Arc<PositionBatch>, Range<usize>)>,
    batch_size: usize,
}

impl Default for InMemoryParticleSource {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl InMemoryParticleSource {
    /// Streams will yield at most `batch_size` positions per batch.
    pub fn new(batch_size: usize) -> Self {
        Self {
            files: SmallKeyHashMap::default(),
            batch_size: batch_size.max(1),
        }
    }

    /// All of `positions` belong to `file`.
    pub fn insert(&mut self, file: FileId, positions: PositionBatch) {
        let len = positions.len();
        self.files.insert(file, (Arc::new(positions), 0..len));
    }

    /// Only the positions of `shared` with indices in `range` belong to `file`.
    pub fn insert_range(&mut self, file: FileId, shared: Arc<PositionBatch>, range: Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > shared.len() {
            return Err(Error::InvalidConfig(format!(
                "particle range {:?} is outside of a block of {} positions",
                range,
                shared.len()
            )));
        }
        self.files.insert(file, (shared, range));

        Ok(())
    }

    /// Registered files in increasing order.
    pub fn files(&self) -> Vec<FileId> {
        let mut files: Vec<FileId> = self.files.keys().cloned().collect();
        files.sort_unstable();

        files
    }
}

impl ParticleSource for InMemoryParticleSource {
    fn stream_positions(&self, file: FileId) -> Result<PositionStream<'_>> {
        let (block, range) = self.files.get(&file).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no particle file {}", file),
            ))
        })?;
        let batch_size = self.batch_size;
        let range = range.clone();

        Ok(Box::new(
            range
                .clone()
                .step_by(batch_size)
                .map(move |start| block.slice(start..(start + batch_size).min(range.end))),
        ))
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn f32_positions_are_widened() {
        let batch = PositionBatch::from_f32(&[[0.5, 0.25, 1.0], [2.0, 3.0, 4.0]]);

        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.decode().unwrap(),
            vec![[0.5, 0.25, 1.0], [2.0, 3.0, 4.0]]
        );
    }

    #[test]
    fn integer_positions_are_a_data_type_error() {
        let batch = PositionBatch {
            scalar_type: ScalarType::I32,
            bytes: vec![0; 24],
        };

        assert!(matches!(batch.decode(), Err(Error::DataType(_))));
    }

    #[test]
    fn ragged_bytes_are_a_data_type_error() {
        let batch = PositionBatch {
            scalar_type: ScalarType::F64,
            bytes: vec![0; 30],
        };

        assert!(matches!(batch.decode(), Err(Error::DataType(_))));
    }

    #[test]
    fn stream_splits_into_batches() {
        let positions: Vec<[f64; 3]> = (0..10).map(|i| [i as f64; 3]).collect();
        let mut source = InMemoryParticleSource::new(4);
        source.insert(0, PositionBatch::from_f64(&positions));

        let lens: Vec<usize> = source.stream_positions(0).unwrap().map(|b| b.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);

        let streamed: Vec<[f64; 3]> = source
            .stream_positions(0)
            .unwrap()
            .flat_map(|b| b.decode().unwrap())
            .collect();
        assert_eq!(streamed, positions);
    }

    #[test]
    fn files_can_share_one_block_by_range() {
        let positions: Vec<[f64; 3]> = (0..10).map(|i| [i as f64; 3]).collect();
        let block = Arc::new(PositionBatch::from_f64(&positions));
        let mut source = InMemoryParticleSource::new(3);
        source.insert_range(1, block.clone(), 0..5).unwrap();
        source.insert_range(2, block.clone(), 5..10).unwrap();
        assert!(source.insert_range(3, block, 8..11).is_err());

        let second: Vec<[f64; 3]> = source
            .stream_positions(2)
            .unwrap()
            .flat_map(|b| b.decode().unwrap())
            .collect();
        assert_eq!(second, positions[5..].to_vec());
        assert_eq!(source.files(), vec![1, 2]);
        assert!(matches!(source.stream_positions(7), Err(Error::Io(_))));
    }
}
