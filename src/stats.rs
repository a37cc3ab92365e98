use std::time::Duration;

/// Order-statistic median: average of the two middle elements for an even
/// count, the middle element for an odd count. `None` for an empty set so
/// callers render "n/a" instead of crashing on an all-failed batch.
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sorted = sorted_copy(samples);
    let len = sorted.len();
    if len % 2 == 0 {
        Some((sorted[len / 2 - 1] + sorted[len / 2]) / 2.0)
    } else {
        Some(sorted[len / 2])
    }
}

/// 95th percentile via sorted index `floor(0.95 * n) - 1`, saturating at 0.
///
/// The index would go negative at n=1; saturation keeps it well-defined
/// there and returns the sole sample.
pub fn p95(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sorted = sorted_copy(samples);
    let idx = ((0.95 * sorted.len() as f64) as usize).saturating_sub(1);
    Some(sorted[idx])
}

/// Events (or requests) per second of wall time; 0.0 when no time elapsed.
pub fn throughput(count: u64, wall: Duration) -> f64 {
    let secs = wall.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

fn sorted_copy(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_odd_count_is_middle_element() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn median_of_empty_set_is_undefined() {
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn p95_of_single_sample_is_that_sample() {
        assert_eq!(p95(&[42.0]), Some(42.0));
    }

    #[test]
    fn p95_uses_floor_index() {
        // n=20: floor(0.95*20)-1 = 18, the 19th smallest.
        let samples: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        assert_eq!(p95(&samples), Some(19.0));
    }

    #[test]
    fn p95_of_empty_set_is_undefined() {
        assert_eq!(p95(&[]), None);
    }

    #[test]
    fn throughput_of_zero_duration_is_zero() {
        assert_eq!(throughput(100, Duration::ZERO), 0.0);
    }

    #[test]
    fn throughput_divides_count_by_wall_seconds() {
        assert_eq!(throughput(50, Duration::from_secs(10)), 5.0);
    }

    #[test]
    fn throughput_never_yields_nan() {
        assert!(!throughput(0, Duration::ZERO).is_nan());
        assert!(!throughput(0, Duration::from_secs(1)).is_nan());
    }
}
