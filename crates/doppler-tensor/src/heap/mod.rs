pub mod address;
pub mod segment;

pub use address::VirtualAddress;
use segment::Segment;

use crate::error::{Result, TensorError};

/// Candidate segment sizes probed at init, largest first, per the 4 GiB /
/// 2 GiB / 1 GiB / 512 MiB / 256 MiB / 128 MiB ladder.
const CANDIDATE_SEGMENT_SIZES: &[usize] = &[
    4 << 30,
    2 << 30,
    1 << 30,
    512 << 20,
    256 << 20,
    128 << 20,
];

/// Host-side heap for loading model weights that may exceed a single
/// allocation's practical ceiling. Holds an ordered list of fixed-capacity
/// segments; allocations bump-pointer within the active (last) segment and
/// never straddle a segment boundary. Used only during loading — per-token
/// scratch never touches this heap.
#[derive(Debug)]
pub struct SegmentedHeap {
    segments: Vec<Segment>,
    segment_capacity: usize,
}

impl SegmentedHeap {
    /// Probes the largest segment size the host will allocate, then creates
    /// a heap with one segment of that size.
    pub fn new() -> Result<Self> {
        let segment_capacity = probe_max_segment_size()?;
        log::debug!("segmented heap: probed segment capacity {segment_capacity} bytes");
        Ok(SegmentedHeap {
            segments: vec![Segment::new(segment_capacity)],
            segment_capacity,
        })
    }

    /// Builds a heap with an explicit segment size, bypassing the probe.
    /// Used by tests and by callers with a known-good ceiling.
    pub fn with_segment_size(segment_capacity: usize) -> Self {
        SegmentedHeap {
            segments: vec![Segment::new(segment_capacity)],
            segment_capacity,
        }
    }

    pub fn segment_capacity(&self) -> usize {
        self.segment_capacity
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Allocates `len` bytes, adding a new segment if the active one lacks
    /// room. Returns the virtual address the allocation starts at.
    pub fn alloc(&mut self, len: usize) -> Result<VirtualAddress> {
        if len > self.segment_capacity {
            return Err(TensorError::AllocationFailed {
                requested: len,
                ceiling: self.segment_capacity,
            });
        }

        if self
            .segments
            .last()
            .map(|s| s.remaining() < len)
            .unwrap_or(true)
        {
            self.segments.push(Segment::new(self.segment_capacity));
            log::debug!(
                "segmented heap: opened segment {} ({} bytes)",
                self.segments.len() - 1,
                self.segment_capacity
            );
        }

        let segment_index = self.segments.len() - 1;
        let segment = self.segments.last_mut().expect("segment list non-empty");
        let offset = segment
            .bump_alloc(len)
            .expect("just verified remaining() >= len");

        Ok(VirtualAddress::encode(segment_index as u32, offset as u64))
    }

    /// Writes `bytes` at `va`. `bytes.len()` must fit within the segment
    /// `va` decodes to, starting at its offset.
    pub fn write(&mut self, va: VirtualAddress, bytes: &[u8]) -> Result<()> {
        let (segment_idx, offset) = va.decode();
        let segment = self
            .segments
            .get_mut(segment_idx as usize)
            .ok_or_else(|| TensorError::Other(format!("heap: no segment {segment_idx}")))?;
        segment
            .write(offset as usize, bytes)
            .ok_or_else(|| TensorError::Other("heap: write out of segment bounds".to_string()))
    }

    /// Reads `len` bytes starting at `va`. Never straddles a segment — the
    /// caller (the loader) must align tensors so every read fits in one
    /// segment.
    pub fn get_buffer_slice(&self, va: VirtualAddress, len: usize) -> Result<&[u8]> {
        let (segment_idx, offset) = va.decode();
        let segment = self
            .segments
            .get(segment_idx as usize)
            .ok_or_else(|| TensorError::Other(format!("heap: no segment {segment_idx}")))?;
        segment.read(offset as usize, len).ok_or_else(|| {
            TensorError::Other(
                "heap: read would straddle a segment boundary or run past its end".to_string(),
            )
        })
    }

    /// Deallocates every segment beyond the first and resets the first
    /// segment's bump cursor to zero.
    pub fn reset(&mut self) {
        self.segments.truncate(1);
        if let Some(first) = self.segments.first_mut() {
            first.reset();
        }
    }
}

/// Tries candidate segment sizes largest-first and returns the first that
/// the host can reserve. `Vec::try_reserve` surfaces an allocation failure
/// as an error instead of aborting the process.
fn probe_max_segment_size() -> Result<usize> {
    for &size in CANDIDATE_SEGMENT_SIZES {
        let mut probe: Vec<u8> = Vec::new();
        if probe.try_reserve_exact(size).is_ok() {
            return Ok(size);
        }
        log::warn!("segmented heap: probe of {size} bytes failed, trying smaller");
    }
    Err(TensorError::AllocationFailed {
        requested: *CANDIDATE_SEGMENT_SIZES.last().unwrap(),
        ceiling: 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_write_read_roundtrip() {
        let mut heap = SegmentedHeap::with_segment_size(64);
        let va = heap.alloc(8).unwrap();
        heap.write(va, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(heap.get_buffer_slice(va, 8).unwrap(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_alloc_opens_new_segment_when_full() {
        let mut heap = SegmentedHeap::with_segment_size(8);
        let va1 = heap.alloc(8).unwrap();
        let va2 = heap.alloc(4).unwrap();
        assert_eq!(va1.decode().0, 0);
        assert_eq!(va2.decode().0, 1);
        assert_eq!(heap.segment_count(), 2);
    }

    #[test]
    fn test_alloc_larger_than_segment_fails() {
        let mut heap = SegmentedHeap::with_segment_size(8);
        assert!(heap.alloc(9).is_err());
    }

    #[test]
    fn test_read_never_straddles_segment() {
        let mut heap = SegmentedHeap::with_segment_size(8);
        let va = heap.alloc(8).unwrap();
        // requesting more than this segment holds must fail, not silently
        // spill into the next segment.
        assert!(heap.get_buffer_slice(va, 16).is_err());
    }

    #[test]
    fn test_reset_frees_extra_segments() {
        let mut heap = SegmentedHeap::with_segment_size(8);
        heap.alloc(8).unwrap();
        heap.alloc(8).unwrap();
        assert_eq!(heap.segment_count(), 2);
        heap.reset();
        assert_eq!(heap.segment_count(), 1);
        // first segment's cursor is back at zero.
        assert_eq!(heap.alloc(8).unwrap().decode(), (0, 0));
    }
}
