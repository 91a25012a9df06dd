//! Small shared helpers.
//!
//! The jitter source is a xorshift generator seeded from the clock:
//! plenty for pacing decisions, not crypto, and it keeps `rand` out of
//! the dependency tree.

/// Pseudo-random value in `[0, max)`. Returns 0 when `max` is 0.
pub fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max
}

/// Pseudo-random value in `[min, max]`.
pub fn jitter_range(min: u64, max: u64) -> u64 {
    if max <= min {
        return min;
    }
    min + jitter_ms(max - min + 1)
}

/// Pick a pseudo-random element of a non-empty slice.
pub fn pick<'a, T>(items: &'a [T]) -> &'a T {
    &items[jitter_ms(items.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounded() {
        for _ in 0..200 {
            assert!(jitter_ms(50) < 50);
        }
        assert_eq!(jitter_ms(0), 0);
    }

    #[test]
    fn test_jitter_range_inclusive() {
        for _ in 0..200 {
            let v = jitter_range(40, 140);
            assert!((40..=140).contains(&v));
        }
        assert_eq!(jitter_range(10, 10), 10);
        assert_eq!(jitter_range(10, 5), 10);
    }

    #[test]
    fn test_pick_stays_in_slice() {
        let items = ["a", "b", "c"];
        for _ in 0..50 {
            assert!(items.contains(pick(&items)));
        }
    }
}
