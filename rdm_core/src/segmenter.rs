//! Chunk segmenter (component C2) — decides the segment layout for a
//! resource given its size and the server's range capability.
//!
//! The layout is computed once, at enqueue/start time, and frozen for the
//! lifetime of the item; resuming never re-segments.

const MIN_SEGMENTS: usize = 4;
const MAX_SEGMENTS: usize = 16;
const BYTES_PER_SEGMENT: u64 = 5 * 1024 * 1024; // 5 MiB

/// A half-open byte range `[start, end)` of the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: u64,
    pub end: u64,
}

impl Segment {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Computes the segment layout for a resource.
///
/// * Non-resumable or unknown size -> a single segment covering the whole
///   (possibly unbounded) resource.
/// * Otherwise -> `n = clamp(total_size / 5MiB, 4, 16)` equal-sized segments,
///   with the remainder absorbed by the last one. `override_n`, if given, is
///   clamped the same way and used instead of the computed `n`.
pub fn segment(total_size: Option<u64>, supports_range: bool, override_n: Option<usize>) -> Vec<Segment> {
    let Some(total_size) = total_size.filter(|&s| s > 0) else {
        return vec![Segment { start: 0, end: 0 }];
    };

    if !supports_range {
        return vec![Segment {
            start: 0,
            end: total_size,
        }];
    }

    let n = override_n
        .unwrap_or_else(|| (total_size / BYTES_PER_SEGMENT) as usize)
        .clamp(MIN_SEGMENTS, MAX_SEGMENTS);
    let n = n.min(total_size.max(1) as usize).max(1);

    let base = total_size / n as u64;
    let mut segments = Vec::with_capacity(n);
    let mut start = 0u64;
    for i in 0..n {
        let end = if i == n - 1 { total_size } else { start + base };
        segments.push(Segment { start, end });
        start = end;
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_resumable_is_single_segment() {
        let segs = segment(Some(10_000), false, None);
        assert_eq!(segs, vec![Segment { start: 0, end: 10_000 }]);
    }

    #[test]
    fn unknown_size_is_single_segment() {
        let segs = segment(None, true, None);
        assert_eq!(segs.len(), 1);
    }

    #[test]
    fn clamps_segment_count_to_minimum_four() {
        // 1 MiB / 5 MiB = 0 -> clamp to 4
        let segs = segment(Some(1024 * 1024), true, None);
        assert_eq!(segs.len(), 4);
    }

    #[test]
    fn clamps_segment_count_to_maximum_sixteen() {
        // 1 GiB / 5 MiB = 204 -> clamp to 16
        let segs = segment(Some(1024 * 1024 * 1024), true, None);
        assert_eq!(segs.len(), 16);
    }

    #[test]
    fn segments_are_contiguous_and_exact() {
        let total = 25 * 1024 * 1024; // 25 MiB -> n=5, clamp to 5 (within [4,16])
        let segs = segment(Some(total), true, None);
        assert_eq!(segs[0].start, 0);
        assert_eq!(segs.last().unwrap().end, total);
        for pair in segs.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
    }

    #[test]
    fn override_n_is_clamped() {
        let segs = segment(Some(10 * 1024 * 1024), true, Some(2));
        assert_eq!(segs.len(), MIN_SEGMENTS);
        let segs = segment(Some(10 * 1024 * 1024), true, Some(64));
        assert_eq!(segs.len(), MAX_SEGMENTS);
    }

    #[test]
    fn twenty_four_mib_yields_four_six_mib_segments() {
        let total = 24 * 1024 * 1024;
        let segs = segment(Some(total), true, None);
        assert_eq!(segs.len(), 4);
        let sixth = total / 4;
        assert_eq!(segs[0], Segment { start: 0, end: sixth });
        assert_eq!(segs[3].end, total);
    }
}
