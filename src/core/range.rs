//! Byte range partitioning
//!
//! Splits a resource length into disjoint, contiguous, inclusive byte ranges.
//! Every worker owns exactly one range, which is what lets them all write into
//! the same file without locking.

use std::fmt;

/// An inclusive `[start, end]` span of bytes within a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    /// First byte offset (inclusive)
    pub start: u64,
    /// Last byte offset (inclusive)
    pub end: u64,
}

#[allow(clippy::len_without_is_empty)]
impl ByteRange {
    /// Create a range; `start` must not exceed `end`
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "inverted byte range {start}-{end}");
        Self { start, end }
    }

    /// Number of bytes covered by the range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for the HTTP `Range` request header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Default partition count: the host's available parallelism, at least 1
pub fn default_connections() -> usize {
    num_cpus::get().max(1)
}

/// Partition `length` bytes into at most `n` ranges.
///
/// `n` is clamped to `1..=length`, so no range is ever empty and exactly `n`
/// ranges come back whenever `length >= n`. The last range absorbs the
/// remainder of the integer division. A zero length yields no ranges.
pub fn partition(length: u64, n: usize) -> Vec<ByteRange> {
    if length == 0 {
        return Vec::new();
    }

    let connections = (n.max(1) as u64).min(length);
    let avg = length / connections;

    (0..connections)
        .map(|i| {
            let start = i * avg;
            let end = if i == connections - 1 {
                length - 1
            } else {
                start + avg - 1
            };
            ByteRange::new(start, end)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(ranges: &[ByteRange], length: u64) {
        if length == 0 {
            assert!(ranges.is_empty());
            return;
        }
        assert_eq!(ranges.first().map(|r| r.start), Some(0));
        assert_eq!(ranges.last().map(|r| r.end), Some(length - 1));
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start, "gap or overlap in {ranges:?}");
        }
        let total: u64 = ranges.iter().map(ByteRange::len).sum();
        assert_eq!(total, length);
    }

    #[test]
    fn test_partition_ten_megabytes_four_ways() {
        let ranges = partition(10_000_000, 4);
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 2_499_999),
                ByteRange::new(2_500_000, 4_999_999),
                ByteRange::new(5_000_000, 7_499_999),
                ByteRange::new(7_500_000, 9_999_999),
            ]
        );
    }

    #[test]
    fn test_partition_zero_length() {
        assert!(partition(0, 4).is_empty());
        assert!(partition(0, 0).is_empty());
    }

    #[test]
    fn test_partition_clamps_zero_connections() {
        assert_eq!(partition(100, 0), vec![ByteRange::new(0, 99)]);
    }

    #[test]
    fn test_partition_tiny_lengths() {
        assert_eq!(partition(1, 8), vec![ByteRange::new(0, 0)]);

        let ranges = partition(3, 8);
        assert_eq!(ranges.len(), 3);
        assert!(ranges.iter().all(|r| r.len() == 1));
    }

    #[test]
    fn test_partition_remainder_goes_to_last_range() {
        let ranges = partition(10, 4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0], ByteRange::new(0, 1));
        assert_eq!(ranges[3], ByteRange::new(6, 9));
    }

    #[test]
    fn test_partition_invariants_hold_for_many_shapes() {
        for length in 0..300u64 {
            for n in 1..24usize {
                let ranges = partition(length, n);
                assert_covers(&ranges, length);
                assert!(ranges.len() <= n);
                if length >= n as u64 {
                    assert_eq!(ranges.len(), n, "length {length}, n {n}");
                }
            }
        }
    }

    #[test]
    fn test_partition_large_length() {
        let length = 81 * 1024 * 1024 * 1024u64;
        let ranges = partition(length, 16);
        assert_eq!(ranges.len(), 16);
        assert_covers(&ranges, length);
    }

    #[test]
    fn test_range_header_value() {
        let range = ByteRange::new(2_500_000, 4_999_999);
        assert_eq!(range.header_value(), "bytes=2500000-4999999");
        assert_eq!(range.len(), 2_500_000);
        assert_eq!(range.to_string(), "2500000-4999999");
    }

    #[test]
    fn test_default_connections_is_positive() {
        assert!(default_connections() >= 1);
    }
}
