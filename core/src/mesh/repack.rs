//! Vertex repacking.
//!
//! Avatar primitives often index into a vertex pool shared with other
//! primitives. [`VertexRepacker`] finds the vertex ranges a primitive
//! actually references so that every per-vertex attribute can be copied out
//! as a compact array, and rewrites the index buffer to match.
//!
//! ```ignore
//! let (repacker, indices) = VertexRepacker::create(indices, pool_vertex_count)?;
//! let positions = repacker.repack_attribute(&pool_positions);
//! let normals = repacker.repack_attribute(&pool_normals);
//! ```

use fixedbitset::FixedBitSet;

/// Integer type usable as a vertex index.
pub trait VertexIndex: Copy + Send + Sync + 'static {
    /// Widen to `u32`.
    fn to_u32(self) -> u32;
    /// Narrow from `u32`. Only called with values that came from this type.
    fn from_u32(value: u32) -> Self;
}

impl VertexIndex for u16 {
    fn to_u32(self) -> u32 {
        u32::from(self)
    }

    fn from_u32(value: u32) -> Self {
        value as u16
    }
}

impl VertexIndex for u32 {
    fn to_u32(self) -> u32 {
        self
    }

    fn from_u32(value: u32) -> Self {
        value
    }
}

/// Error produced when an index buffer does not fit its vertex pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepackError {
    /// An index points past the end of the vertex pool.
    #[error("index {index} out of range for vertex pool of {vertex_count}")]
    IndexOutOfRange {
        /// Offending index value.
        index: u32,
        /// Size of the vertex pool.
        vertex_count: u32,
    },
}

/// Closed range `[first, last]` of referenced pool vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexRange {
    /// First referenced vertex.
    pub first: u32,
    /// Last referenced vertex (inclusive).
    pub last: u32,
}

impl VertexRange {
    /// Number of vertices in the range.
    pub fn len(&self) -> u32 {
        self.last - self.first + 1
    }

    /// Ranges are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Sorted, non-overlapping maximal runs of referenced vertices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexRepacker {
    ranges: Vec<VertexRange>,
    needs_repacking: bool,
    pool_vertex_count: u32,
}

impl VertexRepacker {
    /// Scans `indices`, derives the referenced ranges and, if repacking is
    /// needed, rewrites the indices into the compact vertex space.
    ///
    /// When the indices already reference the whole pool as one run, the
    /// index buffer is returned as-is.
    pub fn create<I: VertexIndex>(
        indices: Vec<I>,
        pool_vertex_count: u32,
    ) -> Result<(Self, Vec<I>), RepackError> {
        if indices.is_empty() {
            return Ok((
                Self {
                    ranges: Vec::new(),
                    needs_repacking: false,
                    pool_vertex_count,
                },
                indices,
            ));
        }

        let mut used = FixedBitSet::with_capacity(pool_vertex_count as usize);
        let mut min = u32::MAX;
        let mut max = 0u32;
        for &index in &indices {
            let index = index.to_u32();
            if index >= pool_vertex_count {
                return Err(RepackError::IndexOutOfRange {
                    index,
                    vertex_count: pool_vertex_count,
                });
            }
            used.insert(index as usize);
            min = min.min(index);
            max = max.max(index);
        }

        let ranges = collect_ranges(&used, min, max);
        let needs_repacking = !(ranges.len() == 1
            && ranges[0].first == 0
            && ranges[0].last + 1 == pool_vertex_count);

        let repacker = Self {
            ranges,
            needs_repacking,
            pool_vertex_count,
        };

        if !repacker.needs_repacking {
            return Ok((repacker, indices));
        }

        let remapped = indices
            .iter()
            .map(|&index| I::from_u32(repacker.remap_unchecked(index.to_u32())))
            .collect();
        Ok((repacker, remapped))
    }

    /// Whether attributes must be compacted.
    pub fn needs_repacking(&self) -> bool {
        self.needs_repacking
    }

    /// Referenced ranges in ascending order.
    pub fn ranges(&self) -> &[VertexRange] {
        &self.ranges
    }

    /// Size of the source vertex pool.
    pub fn pool_vertex_count(&self) -> u32 {
        self.pool_vertex_count
    }

    /// Number of vertices after repacking.
    pub fn packed_vertex_count(&self) -> u32 {
        if self.needs_repacking {
            self.ranges.iter().map(VertexRange::len).sum()
        } else if self.ranges.is_empty() {
            0
        } else {
            self.pool_vertex_count
        }
    }

    /// Maps a pool vertex to its compact index, if it is referenced.
    pub fn remap(&self, pool_index: u32) -> Option<u32> {
        let slot = self
            .ranges
            .partition_point(|range| range.last < pool_index);
        let range = self.ranges.get(slot)?;
        if pool_index < range.first {
            return None;
        }
        if !self.needs_repacking {
            return Some(pool_index);
        }
        let before: u32 = self.ranges[..slot].iter().map(VertexRange::len).sum();
        Some(pool_index - range.first + before)
    }

    fn remap_unchecked(&self, pool_index: u32) -> u32 {
        self.remap(pool_index).unwrap_or(pool_index)
    }

    /// Copies the referenced ranges of a full-pool attribute array.
    ///
    /// Returns an empty vector when `source` is shorter than the pool (the
    /// attribute is not present) or when the allocation fails.
    pub fn repack_attribute<T: Copy>(&self, source: &[T]) -> Vec<T> {
        if source.is_empty() || source.len() < self.pool_vertex_count as usize {
            return Vec::new();
        }
        if !self.needs_repacking {
            return source[..self.pool_vertex_count as usize].to_vec();
        }

        let len = self.packed_vertex_count() as usize;
        let mut packed = Vec::new();
        if let Err(err) = packed.try_reserve_exact(len) {
            log::error!("VertexRepacker: failed to allocate {len} repacked elements: {err}");
            return Vec::new();
        }
        for range in &self.ranges {
            packed.extend_from_slice(&source[range.first as usize..=range.last as usize]);
        }
        packed
    }

    /// Like [`repack_attribute`](Self::repack_attribute) but takes ownership,
    /// returning `source` unchanged when no repacking is needed.
    pub fn repack_owned<T: Copy>(&self, mut source: Vec<T>) -> Vec<T> {
        if source.len() < self.pool_vertex_count as usize || source.is_empty() {
            return Vec::new();
        }
        if !self.needs_repacking {
            source.truncate(self.pool_vertex_count as usize);
            return source;
        }
        self.repack_attribute(&source)
    }
}

fn collect_ranges(used: &FixedBitSet, min: u32, max: u32) -> Vec<VertexRange> {
    let mut ranges = Vec::new();
    let mut current: Option<VertexRange> = None;
    for index in used.ones() {
        let index = index as u32;
        debug_assert!(index >= min && index <= max);
        current = match current {
            Some(range) if range.last + 1 == index => Some(VertexRange {
                first: range.first,
                last: index,
            }),
            Some(range) => {
                ranges.push(range);
                Some(VertexRange {
                    first: index,
                    last: index,
                })
            }
            None => Some(VertexRange {
                first: index,
                last: index,
            }),
        };
    }
    if let Some(range) = current {
        ranges.push(range);
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_indices_need_no_repacking() {
        let (repacker, indices) = VertexRepacker::create(Vec::<u16>::new(), 10).unwrap();
        assert!(!repacker.needs_repacking());
        assert!(repacker.ranges().is_empty());
        assert!(indices.is_empty());
        assert_eq!(repacker.packed_vertex_count(), 0);
    }

    #[test]
    fn full_pool_is_passed_through() {
        let source = vec![0u16, 1, 2, 2, 1, 3];
        let ptr = source.as_ptr();
        let (repacker, indices) = VertexRepacker::create(source, 4).unwrap();

        assert!(!repacker.needs_repacking());
        assert_eq!(repacker.ranges(), &[VertexRange { first: 0, last: 3 }]);
        assert_eq!(indices.as_ptr(), ptr);

        let attribute = [10, 11, 12, 13];
        assert_eq!(repacker.repack_attribute(&attribute), attribute.to_vec());
    }

    #[test]
    fn fragmented_pool_is_compacted() {
        let source = vec![0u16, 1, 2, 10, 11, 2];
        let (repacker, indices) = VertexRepacker::create(source, 16).unwrap();

        assert!(repacker.needs_repacking());
        assert_eq!(
            repacker.ranges(),
            &[
                VertexRange { first: 0, last: 2 },
                VertexRange { first: 10, last: 11 },
            ]
        );
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 2]);

        let attribute: Vec<u32> = (100..116).collect();
        assert_eq!(
            repacker.repack_attribute(&attribute),
            vec![100, 101, 102, 110, 111]
        );
    }

    #[test]
    fn isolated_max_index_forms_its_own_range() {
        let (repacker, indices) = VertexRepacker::create(vec![1u32, 2, 3, 7], 8).unwrap();
        assert_eq!(
            repacker.ranges(),
            &[
                VertexRange { first: 1, last: 3 },
                VertexRange { first: 7, last: 7 },
            ]
        );
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(repacker.packed_vertex_count(), 4);
    }

    #[test]
    fn repacked_indices_are_tight() {
        let (_, packed) = VertexRepacker::create(vec![5u16, 6, 9, 9, 6, 12], 20).unwrap();
        let (repacker, again) = VertexRepacker::create(packed.clone(), 4).unwrap();
        assert!(!repacker.needs_repacking());
        assert_eq!(again, packed);
    }

    #[test]
    fn short_attribute_repacks_to_empty() {
        let (repacker, _) = VertexRepacker::create(vec![0u16, 5], 8).unwrap();
        assert!(repacker.repack_attribute::<f32>(&[]).is_empty());
        assert!(repacker.repack_attribute(&[1.0f32, 2.0]).is_empty());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let err = VertexRepacker::create(vec![0u16, 9], 4).unwrap_err();
        assert_eq!(
            err,
            RepackError::IndexOutOfRange {
                index: 9,
                vertex_count: 4
            }
        );
    }

    #[test]
    fn remap_reports_unreferenced_vertices() {
        let (repacker, _) = VertexRepacker::create(vec![2u16, 3, 8], 10).unwrap();
        assert_eq!(repacker.remap(2), Some(0));
        assert_eq!(repacker.remap(8), Some(2));
        assert_eq!(repacker.remap(5), None);
        assert_eq!(repacker.remap(0), None);
        assert_eq!(repacker.remap(9), None);
    }

    #[test]
    fn repack_owned_transfers_when_tight() {
        let (repacker, _) = VertexRepacker::create(vec![0u16, 1, 2], 3).unwrap();
        let source = vec![1.0f32, 2.0, 3.0];
        let ptr = source.as_ptr();
        let out = repacker.repack_owned(source);
        assert_eq!(out.as_ptr(), ptr);
    }
}
