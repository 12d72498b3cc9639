//! Interpretation of the `Range: bytes=..` header.
//!
//! Ranges are clamped to the file size, invalid ranges are dropped,
//! and overlapping or contiguous ranges are coalesced. What remains is
//! sorted and disjoint. An empty result means 416.
/// One byte range: absolute position of the first and last byte,
/// plus the number of bytes to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteRange {
    pub start: u64,
    pub end: u64,
    pub count: u64,
}

/// Parse result: the coalesced ranges and the total length.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Ranges {
    pub ranges: Vec<ByteRange>,
    pub total: u64,
}

// One "first-last" / "first-" / "-suffix" spec, clamped. Returns None
// if the spec is invalid or lies entirely outside the file.
fn parse_one(spec: &str, size: u64) -> Option<(u64, u64)> {
    let spec = spec.trim();
    let (first, last) = spec.split_once('-')?;
    let (first, last) = (first.trim(), last.trim());
    if first.is_empty() {
        // suffix range: the last N bytes.
        let n = last.parse::<u64>().ok()?;
        if n == 0 || size == 0 {
            return None;
        }
        let start = size.saturating_sub(n);
        return Some((start, size - 1));
    }
    let start = first.parse::<u64>().ok()?;
    if start >= size {
        return None;
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        let end = last.parse::<u64>().ok()?;
        if end < start {
            return None;
        }
        end.min(size - 1)
    };
    Some((start, end))
}

/// Parse a `Range` header value against a file of `size` bytes.
///
/// Returns None if the header is not a byte-range spec at all (it is
/// then ignored); Some with empty `ranges` means no range was
/// satisfiable (416).
pub(crate) fn parse_ranges(header: &str, size: u64) -> Option<Ranges> {
    let list = header.trim().strip_prefix("bytes=")?;
    let mut ranges: Vec<(u64, u64)> = list
        .split(',')
        .filter_map(|spec| parse_one(spec, size))
        .collect();
    Some(coalesce(&mut ranges))
}

fn coalesce(ranges: &mut Vec<(u64, u64)>) -> Ranges {
    ranges.sort_unstable();
    let mut out: Vec<ByteRange> = Vec::new();
    let mut total = 0;
    for &(start, end) in ranges.iter() {
        if let Some(last) = out.last_mut() {
            // overlapping or contiguous: extend the previous range.
            if start <= last.end + 1 {
                if end > last.end {
                    total += end - last.end;
                    last.end = end;
                    last.count = last.end - last.start + 1;
                }
                continue;
            }
        }
        out.push(ByteRange {
            start,
            end,
            count: end - start + 1,
        });
        total += end - start + 1;
    }
    Ranges { ranges: out, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(header: &str, size: u64) -> Ranges {
        parse_ranges(header, size).unwrap()
    }

    #[test]
    fn simple_forms() {
        let r = ranges("bytes=0-0", 10);
        assert_eq!(r.ranges, vec![ByteRange { start: 0, end: 0, count: 1 }]);
        assert_eq!(r.total, 1);

        let r = ranges("bytes=5-", 10);
        assert_eq!(r.ranges, vec![ByteRange { start: 5, end: 9, count: 5 }]);

        let r = ranges("bytes=-3", 10);
        assert_eq!(r.ranges, vec![ByteRange { start: 7, end: 9, count: 3 }]);
    }

    #[test]
    fn clamping_and_dropping() {
        // end clamped to file size.
        let r = ranges("bytes=5-100", 10);
        assert_eq!(r.ranges, vec![ByteRange { start: 5, end: 9, count: 5 }]);
        // start beyond the file is dropped.
        let r = ranges("bytes=10-12", 10);
        assert!(r.ranges.is_empty());
        // inverted is dropped.
        let r = ranges("bytes=5-2", 10);
        assert!(r.ranges.is_empty());
        // suffix longer than the file covers it all.
        let r = ranges("bytes=-100", 10);
        assert_eq!(r.ranges, vec![ByteRange { start: 0, end: 9, count: 10 }]);
    }

    #[test]
    fn coalescing() {
        // overlapping.
        let r = ranges("bytes=0-4,2-6", 10);
        assert_eq!(r.ranges, vec![ByteRange { start: 0, end: 6, count: 7 }]);
        // contiguous.
        let r = ranges("bytes=0-4,5-6", 10);
        assert_eq!(r.ranges, vec![ByteRange { start: 0, end: 6, count: 7 }]);
        // disjoint stays disjoint, sorted.
        let r = ranges("bytes=7-8,0-1", 10);
        assert_eq!(r.ranges, vec![
            ByteRange { start: 0, end: 1, count: 2 },
            ByteRange { start: 7, end: 8, count: 2 },
        ]);
        assert_eq!(r.total, 4);
    }

    #[test]
    fn invariants_hold() {
        let r = ranges("bytes=3-5,0-0,4-9,-2,20-30", 10);
        let mut prev_end: Option<u64> = None;
        let mut sum = 0;
        for br in &r.ranges {
            assert!(br.start <= br.end);
            assert!(br.end <= 9);
            if let Some(pe) = prev_end {
                assert!(br.start > pe + 1, "ranges must be disjoint, non-contiguous");
            }
            prev_end = Some(br.end);
            sum += br.count;
        }
        assert_eq!(sum, r.total);
    }

    #[test]
    fn unsatisfiable() {
        let r = ranges("bytes=20-30,40-", 10);
        assert!(r.ranges.is_empty());
        assert_eq!(r.total, 0);
        // not a bytes spec at all.
        assert!(parse_ranges("lines=1-2", 10).is_none());
    }
}
