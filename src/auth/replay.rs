//! Timestamp window and monotonicity checks for HMAC-signed requests.
//!
//! A signature is only as fresh as its timestamp: outside the ±5-minute
//! window it is rejected outright, and inside the window it must be
//! strictly newer than the device's last accepted timestamp — an old but
//! still-window-valid signature replayed verbatim fails the second check.

/// Acceptance window around the server clock, seconds. Both late and
/// premature timestamps are rejected at exactly this bound.
pub const AUTH_WINDOW_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayCheck {
    Ok,
    /// `|now - ts| >= 300`.
    OutsideWindow,
    /// `ts <= last_auth_ts` — replay of an already-accepted timestamp.
    NotMonotonic,
}

/// Pure check; on `Ok` the caller must persist `ts` as the device's new
/// `last_auth_ts` (via the conditional update) before reporting success.
pub fn check(now: i64, ts: i64, last_auth_ts: i64) -> ReplayCheck {
    if (now - ts).abs() >= AUTH_WINDOW_SECS {
        return ReplayCheck::OutsideWindow;
    }
    if ts <= last_auth_ts {
        return ReplayCheck::NotMonotonic;
    }
    ReplayCheck::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_706_400_000;

    #[test]
    fn fresh_timestamp_inside_window_is_accepted() {
        assert_eq!(check(NOW, NOW, 1_706_399_999), ReplayCheck::Ok);
        assert_eq!(check(NOW, NOW + 299, 0), ReplayCheck::Ok);
        assert_eq!(check(NOW, NOW - 299, 0), ReplayCheck::Ok);
    }

    #[test]
    fn equal_or_older_than_last_auth_is_a_replay() {
        assert_eq!(check(NOW, 1_706_399_999, 1_706_399_999), ReplayCheck::NotMonotonic);
        assert_eq!(check(NOW, NOW - 10, NOW - 5), ReplayCheck::NotMonotonic);
    }

    #[test]
    fn window_is_closed_at_exactly_300s_both_directions() {
        assert_eq!(check(NOW, NOW - 360, 0), ReplayCheck::OutsideWindow);
        assert_eq!(check(NOW, NOW - 300, 0), ReplayCheck::OutsideWindow);
        assert_eq!(check(NOW, NOW + 300, 0), ReplayCheck::OutsideWindow);
    }

    #[test]
    fn window_check_runs_before_monotonicity() {
        // An ancient timestamp below last_auth_ts reports as expired, not
        // replayed — the device should fix its clock first.
        assert_eq!(check(NOW, NOW - 400, NOW - 350), ReplayCheck::OutsideWindow);
    }
}
