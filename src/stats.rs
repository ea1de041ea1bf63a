//! Small numeric primitives shared by the diet and footprint stages.

/// Production-weighted mean with a degenerate fallback: when every weight in
/// the group is zero (or missing, coerced to zero by the caller), return the
/// unweighted arithmetic mean instead of NaN. Production coverage is sparse -
/// commonly under half of country-item pairs have direct figures - so the
/// fallback is normal operation, not an error path.
///
/// Returns `None` only for an empty group.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    debug_assert_eq!(values.len(), weights.len());
    let sum_w: f64 = weights.iter().sum();
    if sum_w > 0.0 {
        let sum_vw: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
        Some(sum_vw / sum_w)
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Pick the first available value from candidates in priority order,
/// returning the value together with the tier tag it came from.
pub fn resolve_first<T: Copy>(candidates: &[(Option<f64>, T)]) -> Option<(f64, T)> {
    candidates
        .iter()
        .find_map(|(value, tier)| value.map(|v| (v, *tier)))
}

/// Linear-interpolated percentile of an ascending-sorted slice
/// (same interpolation as `np.percentile`). `q` is in [0, 100].
///
/// Returns NaN for an empty slice; callers exclude empty groups upstream.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 {
        return sorted[0];
    }
    let rank = q / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
