//! Primary-axis partitioning

/// Split `min..=max` into `splits` contiguous, near-equal ranges.
///
/// Each range gets `total / splits` indices and the first `total % splits`
/// ranges get one more. Ranges that would be empty are `None`, so the result
/// always has `splits` slots and worker indices stay stable.
pub fn split_ranges(min: u32, max: u32, splits: usize) -> Vec<Option<(u32, u32)>> {
    let total = if max < min {
        0
    } else {
        u64::from(max - min) + 1
    };
    if splits == 0 {
        return Vec::new();
    }

    let base = total / splits as u64;
    let extra = total % splits as u64;

    let mut ranges = Vec::with_capacity(splits);
    let mut start = u64::from(min);
    for i in 0..splits as u64 {
        let size = base + u64::from(i < extra);
        if size == 0 {
            ranges.push(None);
            continue;
        }
        let end = start + size - 1;
        ranges.push(Some((start as u32, end as u32)));
        start = end + 1;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uneven_split_front_loads_extra() {
        assert_eq!(
            split_ranges(0, 3, 3),
            vec![Some((0, 1)), Some((2, 2)), Some((3, 3))]
        );
    }

    #[test]
    fn test_even_split() {
        assert_eq!(
            split_ranges(0, 2047, 8)[7],
            Some((1792, 2047))
        );
        let ranges = split_ranges(0, 2047, 6);
        assert_eq!(ranges[0], Some((0, 341)));
        assert_eq!(ranges[1], Some((342, 683)));
        assert_eq!(ranges[5], Some((1707, 2047)));
    }

    #[test]
    fn test_more_splits_than_indices() {
        assert_eq!(
            split_ranges(10, 11, 4),
            vec![Some((10, 10)), Some((11, 11)), None, None]
        );
    }

    #[test]
    fn test_ranges_cover_bounds_exactly() {
        let ranges: Vec<(u32, u32)> = split_ranges(5, 104, 7).into_iter().flatten().collect();
        assert_eq!(ranges.first().unwrap().0, 5);
        assert_eq!(ranges.last().unwrap().1, 104);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1 + 1, pair[1].0);
        }
        let covered: u32 = ranges.iter().map(|(lo, hi)| hi - lo + 1).sum();
        assert_eq!(covered, 100);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(split_ranges(0, 10, 0).is_empty());
        assert_eq!(split_ranges(5, 4, 2), vec![None, None]);
        assert_eq!(split_ranges(u32::MAX, u32::MAX, 1), vec![Some((u32::MAX, u32::MAX))]);
    }
}
