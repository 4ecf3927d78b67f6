//! Exact nearest-neighbour index over fixed-dimension embeddings.
//!
//! Rows are stored densely in insertion order and searched by brute force
//! under squared Euclidean distance. That is fine for the hundreds to low
//! thousands of chunks a local corpus produces; an approximate structure
//! can replace it behind the same methods.
//!
//! Ids are allocated from a watermark that only moves forward. Removing
//! rows rebuilds the dense storage from the survivors without renumbering
//! them, so an id is never handed out twice.

use std::collections::HashSet;

use rayon::prelude::*;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"DVVI";

/// Snapshot format version written by [`VectorIndex::snapshot`].
pub const SNAPSHOT_VERSION: u16 = 1;

/// Header: magic(4) + version(2) + dimension(4) + next_id(8) + count(8).
const HEADER_SIZE: usize = 26;

const ARTIFACT: &str = "vector index snapshot";

/// A search hit: row id and squared Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: u64,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    ids: Vec<u64>,
    /// Row-major: `data[row * dimension + dim]`.
    data: Vec<f32>,
    next_id: u64,
}

impl VectorIndex {
    /// Create an empty index.
    ///
    /// A zero-dimension index holds nothing: [`add`](Self::add) and
    /// [`search`](Self::search) reject it with [`Error::InvalidArgument`].
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ids: Vec::new(),
            data: Vec::new(),
            next_id: 0,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of live rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The id the next added vector will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Live ids in ascending order.
    pub fn ids(&self) -> &[u64] {
        &self.ids
    }

    pub fn contains(&self, id: u64) -> bool {
        self.row_of(id).is_some()
    }

    pub fn get(&self, id: u64) -> Option<&[f32]> {
        self.row_of(id).map(|row| self.row(row))
    }

    /// Append vectors, returning the contiguous ids assigned to them.
    ///
    /// The batch is rejected as a whole if any vector has the wrong length.
    ///
    /// # Examples
    ///
    /// ```
    /// use docvec::vector_index::VectorIndex;
    ///
    /// let mut index = VectorIndex::new(2);
    /// assert_eq!(index.add(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap(), [0, 1]);
    /// assert_eq!(index.add(&[vec![2.0, 2.0]]).unwrap(), [2]);
    /// assert!(index.add(&[vec![1.0]]).is_err());
    /// assert_eq!(index.len(), 3);
    /// ```
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Vec<u64>> {
        self.check_dimension()?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        let start = self.next_id;
        let assigned: Vec<u64> = (start..start + vectors.len() as u64).collect();

        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        self.ids.extend_from_slice(&assigned);
        self.next_id = start + vectors.len() as u64;

        Ok(assigned)
    }

    /// Return up to `k` rows closest to `query`, nearest first.
    ///
    /// Equal distances are ordered by ascending id so results are
    /// reproducible across restores.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if k == 0 {
            return Err(Error::InvalidArgument(
                "k must be at least 1".into(),
            ));
        }
        self.check_dimension()?;
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimension)
            .zip(self.ids.par_iter())
            .map(|(row, &id)| Neighbor {
                id,
                distance: squared_l2(query, row),
            })
            .collect();

        let by_distance = |a: &Neighbor, b: &Neighbor| {
            a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id))
        };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, by_distance);
            scored.truncate(k);
        }
        scored.sort_unstable_by(by_distance);

        Ok(scored)
    }

    /// Drop the given ids, returning how many rows were removed.
    pub fn remove(&mut self, ids: &[u64]) -> usize {
        let excluded: HashSet<u64> = ids.iter().copied().collect();
        self.rebuild(&excluded)
    }

    /// Rebuild dense storage from every row not in `excluding`.
    ///
    /// Surviving ids keep their values and the watermark is unchanged.
    pub fn rebuild(&mut self, excluding: &HashSet<u64>) -> usize {
        if excluding.is_empty() {
            return 0;
        }

        let mut ids = Vec::with_capacity(self.ids.len());
        let mut data = Vec::with_capacity(self.data.len());
        for (row, &id) in self.ids.iter().enumerate() {
            if !excluding.contains(&id) {
                ids.push(id);
                data.extend_from_slice(self.row(row));
            }
        }

        let removed = self.ids.len() - ids.len();
        self.ids = ids;
        self.data = data;
        removed
    }

    /// Serialize the index into a self-describing binary blob.
    ///
    /// Binary format:
    /// - 4 bytes: magic `DVVI`
    /// - 2 bytes: format version (u16 LE)
    /// - 4 bytes: dimension D (u32 LE)
    /// - 8 bytes: id watermark (u64 LE)
    /// - 8 bytes: row count N (u64 LE)
    /// - N * 8 bytes: row ids (u64, native byte order)
    /// - N * D * 4 bytes: f32 values in row-major order (native byte order)
    pub fn snapshot(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            HEADER_SIZE + self.ids.len() * 8 + self.data.len() * 4,
        );
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&self.next_id.to_le_bytes());
        bytes.extend_from_slice(&(self.ids.len() as u64).to_le_bytes());
        bytes.extend_from_slice(bytemuck::cast_slice(&self.ids));
        bytes.extend_from_slice(bytemuck::cast_slice(&self.data));
        bytes
    }

    /// Rebuild an index from a [`snapshot`](Self::snapshot) blob.
    pub fn restore(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(corrupt("missing DVVI header"));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(Error::IncompatibleStateVersion {
                artifact: ARTIFACT,
                found: u32::from(version),
                expected: u32::from(SNAPSHOT_VERSION),
            });
        }

        let dimension = read_u32(bytes, 6) as usize;
        if dimension == 0 {
            return Err(corrupt("dimension is zero"));
        }
        let next_id = read_u64(bytes, 10);
        let count = usize::try_from(read_u64(bytes, 18))
            .map_err(|_| corrupt("row count overflows usize"))?;

        let ids_len = count
            .checked_mul(8)
            .ok_or_else(|| corrupt("row count overflows"))?;
        let data_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| corrupt("vector data size overflows"))?;
        if bytes.len() != HEADER_SIZE + ids_len + data_len {
            return Err(corrupt(format!(
                "expected {} bytes, found {}",
                HEADER_SIZE + ids_len + data_len,
                bytes.len()
            )));
        }

        // The slabs may be unaligned inside `bytes`, so copy rather than cast.
        let ids: Vec<u64> = bytemuck::pod_collect_to_vec(
            &bytes[HEADER_SIZE..HEADER_SIZE + ids_len],
        );

        if ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err(corrupt("row ids are not strictly ascending"));
        }
        if ids.last().is_some_and(|&last| last >= next_id) {
            return Err(corrupt("row id at or above the watermark"));
        }

        let data: Vec<f32> =
            bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE + ids_len..]);

        Ok(Self {
            dimension,
            ids,
            data,
            next_id,
        })
    }

    fn check_dimension(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::InvalidArgument(
                "vector index dimension must be at least 1".into(),
            ));
        }
        Ok(())
    }

    fn row(&self, row: usize) -> &[f32] {
        let start = row * self.dimension;
        &self.data[start..start + self.dimension]
    }

    fn row_of(&self, id: u64) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }
}

/// Squared Euclidean distance between equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn corrupt(reason: impl Into<String>) -> Error {
    Error::CorruptState {
        artifact: ARTIFACT,
        reason: reason.into(),
    }
}
