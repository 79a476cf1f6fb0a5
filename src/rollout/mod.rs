//! Deterministic staged-release selection.
//!
//! A device's eligibility for a release depends only on (serial, version,
//! percentage): no randomness, no per-call state, stable across restarts.
//! Because the bucket is fixed for a (serial, version) pair, eligibility
//! is monotonic non-decreasing as the percentage is raised — a device
//! included at 10% never drops out at 50%.

/// Rolling multiply-shift hash of `serial ":" version`, folded into a
/// 0..100 bucket.
fn bucket(serial: &str, version: &str) -> u32 {
    let mut hash: i32 = 0;
    for b in serial.bytes().chain(std::iter::once(b':')).chain(version.bytes()) {
        hash = hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(b as i32);
    }
    hash.unsigned_abs() % 100
}

/// `percentage >= 100` includes everyone, `<= 0` nobody; in between the
/// device is eligible iff its bucket falls below the percentage.
pub fn in_rollout(serial: &str, version: &str, percentage: i32) -> bool {
    if percentage >= 100 {
        return true;
    }
    if percentage <= 0 {
        return false;
    }
    bucket(serial, version) < percentage as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundaries_ignore_the_hash() {
        assert!(in_rollout("a1b2c3d4", "1.0.0", 100));
        assert!(in_rollout("a1b2c3d4", "1.0.0", 250));
        assert!(!in_rollout("a1b2c3d4", "1.0.0", 0));
        assert!(!in_rollout("a1b2c3d4", "1.0.0", -5));
    }

    #[test]
    fn selection_is_stable() {
        let first = in_rollout("a1b2c3d4", "1.4.2", 50);
        for _ in 0..10 {
            assert_eq!(in_rollout("a1b2c3d4", "1.4.2", 50), first);
        }
    }

    #[test]
    fn no_device_drops_out_at_a_higher_percentage() {
        // ≥100 synthetic serials through the staged percentages.
        for n in 0..128u32 {
            let serial = format!("{n:08x}");
            let mut included = false;
            for p in [10, 25, 50, 75, 100] {
                let now = in_rollout(&serial, "2.0.1", p);
                assert!(
                    now || !included,
                    "serial {serial} dropped out between percentages at {p}%"
                );
                included = now;
            }
            assert!(included, "everyone is included at 100%");
        }
    }

    proptest! {
        #[test]
        fn monotonic_in_percentage(serial in "[0-9a-f]{8}", p1 in 0i32..=100, p2 in 0i32..=100) {
            let (lo, hi) = if p1 <= p2 { (p1, p2) } else { (p2, p1) };
            if in_rollout(&serial, "1.4.2", lo) {
                prop_assert!(in_rollout(&serial, "1.4.2", hi));
            }
        }

        #[test]
        fn version_changes_reshuffle_but_stay_deterministic(serial in "[0-9a-f]{8}") {
            prop_assert_eq!(
                in_rollout(&serial, "3.1.0", 50),
                in_rollout(&serial, "3.1.0", 50)
            );
        }
    }
}
