//! Symmetric window extremum tests.
//!
//! The window around `position` is closed on both ends,
//! `[position - period, position + period]`, and truncated (not padded) at
//! the ends of the slice. A value qualifies only if it is strictly below
//! (minimum) or above (maximum) every other finite value in the window.

/// Whether `values[position]` is the strict minimum of its window.
pub fn is_local_minimum(values: &[f64], position: usize, period: usize) -> bool {
    wins(values, position, period, |candidate, other| candidate < other)
}

/// Whether `values[position]` is the strict maximum of its window.
pub fn is_local_maximum(values: &[f64], position: usize, period: usize) -> bool {
    wins(values, position, period, |candidate, other| candidate > other)
}

fn wins(values: &[f64], position: usize, period: usize, beats: impl Fn(f64, f64) -> bool) -> bool {
    let Some(&candidate) = values.get(position) else {
        return false;
    };
    if !candidate.is_finite() {
        return false;
    }
    let start = position.saturating_sub(period);
    let end = (position + period).min(values.len() - 1);
    (start..=end)
        .filter(|&i| i != position)
        .map(|i| values[i])
        .filter(|v| v.is_finite())
        .all(|other| beats(candidate, other))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_spike_is_minimum() {
        let mut values = vec![0.0; 11];
        values[5] = -3.0;
        assert!(is_local_minimum(&values, 5, 2));
        assert!(!is_local_minimum(&values, 4, 2));
        assert!(!is_local_maximum(&values, 5, 2));
    }

    #[test]
    fn test_window_edges_are_inclusive() {
        let values = [-1.0, 0.0, 0.0, -2.0];
        // -2.0 sits exactly `period` away from position 0
        assert!(!is_local_minimum(&values, 0, 3));
        assert!(is_local_minimum(&values, 0, 2));
    }

    #[test]
    fn test_truncated_window() {
        let values = [5.0, 1.0, 2.0];
        assert!(is_local_maximum(&values, 0, 10));
        assert!(!is_local_maximum(&values, 2, 10));
    }

    #[test]
    fn test_ties_do_not_qualify() {
        let values = [-1.0, -1.0, -1.0];
        assert!(!is_local_minimum(&values, 1, 1));
    }

    #[test]
    fn test_non_finite() {
        let values = [f64::NAN, -1.0, 0.5];
        assert!(is_local_minimum(&values, 1, 1));
        assert!(!is_local_minimum(&values, 0, 1));
        assert!(!is_local_minimum(&values, 7, 1));
    }
}
