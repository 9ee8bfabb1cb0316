//! Timing model: a base delay with symmetric random jitter.
//!
//! All values are signed milliseconds. Randomness comes from the
//! thread-local RNG, so concurrent stage workers never contend on it.

use std::time::Duration;

use rand::Rng;

/// `base` plus a uniform offset drawn from `[-jitter, jitter)`.
///
/// A non-positive `jitter` returns `base` unchanged. The result is not
/// clamped: a jitter larger than `base` can produce a negative delay.
pub fn delay(base: i64, jitter: i64) -> i64 {
    if jitter <= 0 {
        return base;
    }
    base.saturating_add(rand::thread_rng().gen_range(-jitter..jitter))
}

/// Converts a signed millisecond delay into a wait. Negative means no wait.
pub fn as_wait(millis: i64) -> Duration {
    Duration::from_millis(millis.max(0).unsigned_abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_jitter_returns_base() {
        for base in [-50, 0, 1, 100, 10_000] {
            assert_eq!(delay(base, 0), base);
            assert_eq!(delay(base, -20), base);
        }
    }

    #[test]
    fn jittered_delay_stays_in_half_open_range() {
        for _ in 0..10_000 {
            let d = delay(100, 25);
            assert!((75..125).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn jitter_is_roughly_uniform() {
        // base 0, jitter 10 → 20 possible values, 100k samples ≈ 5000 each
        let mut buckets = [0u32; 20];
        for _ in 0..100_000 {
            let d = delay(0, 10);
            buckets[(d + 10) as usize] += 1;
        }
        for (i, count) in buckets.iter().enumerate() {
            assert!(
                (4_000..6_000).contains(count),
                "bucket {i} has {count} samples"
            );
        }
    }

    #[test]
    fn large_jitter_can_go_negative() {
        let negatives = (0..1_000).filter(|_| delay(5, 100) < 0).count();
        assert!(negatives > 0);
    }

    #[test]
    fn as_wait_floors_negative_at_zero() {
        assert_eq!(as_wait(-30), Duration::ZERO);
        assert_eq!(as_wait(0), Duration::ZERO);
        assert_eq!(as_wait(250), Duration::from_millis(250));
    }

    #[test]
    fn concurrent_sampling_from_many_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..1_000).all(|_| (990..1010).contains(&delay(1_000, 10)))
                })
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap());
        }
    }
}
