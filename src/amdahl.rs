//! Amdahl's Law with input scaling and startup overhead.
//!
//! Pure, synchronous functions: no I/O, no panics on finite input. This is the
//! lowest leaf in the dependency graph — the [`crate::estimator::Estimator`]
//! and [`crate::residual`] modules build on top of it but it depends on
//! nothing else in this crate.

/// `T(s, gamma, p, k, t_base, c_startup) = c_startup + gamma^k * ((1-p)*t_base + (p/s)*t_base)`
///
/// `s` is clamped to `>= 1` before use.
pub fn theoretical_time(s: u32, gamma: f64, p: f64, k: f64, t_base: f64, c_startup: f64) -> f64 {
    let s = s.max(1) as f64;
    let scaling_factor = gamma.powf(k);
    let amdahl_part = (1.0 - p) * t_base + (p / s) * t_base;
    c_startup + scaling_factor * amdahl_part
}

/// Infers the observed parallelizable fraction `p` from a single execution.
///
/// Returns `None` ("undefined") when `s <= 1` or `t_base <= 0` (no leverage to
/// identify `p`), or when the scale factor `gamma^k` is non-positive.
pub fn infer_p(s: u32, t_actual: f64, c_startup: f64, t_base: f64, gamma: f64, k: f64) -> Option<f64> {
    if s <= 1 || t_base <= 0.0 {
        return None;
    }

    let pure_computation_time = (t_actual - c_startup).max(0.0);

    let expected_scale = gamma.powf(k);
    if expected_scale <= 0.0 {
        return None;
    }

    let normalized_time = pure_computation_time / (expected_scale * t_base);
    let s = s as f64;
    let p_calc = (s / (s - 1.0)) * (1.0 - normalized_time);

    Some(p_calc.clamp(0.01, 0.99))
}

/// Infers the observed input-scaling exponent `k` from a single execution.
///
/// Returns `None` ("undefined") when `gamma` is too close to `1.0` to carry
/// any information about the exponent, or when the theoretical base time at
/// `s` is non-positive, or when the ratio of observed to theoretical time is
/// non-positive.
pub fn infer_k(s: u32, t_actual: f64, c_startup: f64, t_base: f64, gamma: f64, p: f64) -> Option<f64> {
    if (0.99..=1.01).contains(&gamma) {
        return None;
    }

    let pure_time = (t_actual - c_startup).max(1e-3);

    let s = s.max(1) as f64;
    let theoretical_base_at_s = (1.0 - p) * t_base + (p / s) * t_base;
    if theoretical_base_at_s <= 0.0 {
        return None;
    }

    let ratio = pure_time / theoretical_base_at_s;
    if ratio <= 0.0 {
        return None;
    }

    let k_calc = ratio.ln() / gamma.ln();
    Some(k_calc.clamp(0.5, 3.0))
}

/// Exponential moving average: `alpha * old + (1 - alpha) * observed`.
///
/// When `observed` is `None` ("undefined inference"), the old value passes
/// through unchanged — the parameter does not move, but the caller still
/// advances `sample_count` so calibration progresses.
pub fn ema_update(old_val: f64, current_val: Option<f64>, alpha: f64) -> f64 {
    match current_val {
        None => old_val,
        Some(observed) => alpha * old_val + (1.0 - alpha) * observed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_theoretical_time_basic() {
        // Startup = 10, Gamma = 1, T_base = 100, p = 0.5, s = 2
        // Serial part = 100 * 0.5 = 50, Parallel part = (100 * 0.5) / 2 = 25
        // Total = 10 + 50 + 25 = 85
        let t = theoretical_time(2, 1.0, 0.5, 1.0, 100.0, 10.0);
        assert!((t - 85.0).abs() < 1e-9);
    }

    #[test]
    fn test_infer_p_from_theoretical() {
        let p = infer_p(2, 85.0, 10.0, 100.0, 1.0, 1.0);
        assert!((p.unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_amdahl_roundtrip() {
        let original_p = 0.8;
        let t_pred = theoretical_time(4, 1.0, original_p, 1.0, 200.0, 5.0);
        let inferred_p = infer_p(4, t_pred, 5.0, 200.0, 1.0, 1.0);
        assert!((inferred_p.unwrap() - original_p).abs() < 1e-6);
    }

    #[test]
    fn test_k_roundtrip() {
        let original_k = 1.7;
        let p = 0.6;
        let t_pred = theoretical_time(3, 1.8, p, original_k, 150.0, 4.0);
        let inferred_k = infer_k(3, t_pred, 4.0, 150.0, 1.8, p);
        assert!((inferred_k.unwrap() - original_k).abs() < 1e-6);
    }

    #[test]
    fn test_infer_p_undefined_at_s_equal_1() {
        // If s=1, then p cannot be inferred (returns None)
        let p = infer_p(1, 100.0, 5.0, 200.0, 1.0, 1.0);
        assert!(p.is_none());
    }

    #[test]
    fn test_infer_p_undefined_with_zero_base() {
        let p = infer_p(4, 100.0, 5.0, 0.0, 1.0, 1.0);
        assert!(p.is_none());
    }

    #[test]
    fn test_infer_p_clamping() {
        // Impossibly fast execution -> clamp to 0.99
        let p_fast = infer_p(10, 1.0, 5.0, 200.0, 1.0, 1.0);
        assert_eq!(p_fast.unwrap(), 0.99);

        // Slower than serial -> clamp to 0.01
        let p_slow = infer_p(10, 220.0, 5.0, 200.0, 1.0, 1.0);
        assert_eq!(p_slow.unwrap(), 0.01);
    }

    #[test]
    fn test_infer_k_undefined_without_gamma_leverage() {
        let k = infer_k(2, 100.0, 5.0, 100.0, 1.0, 0.5);
        assert!(k.is_none());

        let k2 = infer_k(2, 100.0, 5.0, 100.0, 1.005, 0.5);
        assert!(k2.is_none());
    }

    #[test]
    fn test_infer_k_power_law() {
        let k = infer_k(1, 400.0, 0.0, 100.0, 2.0, 0.0);
        assert!((k.unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_update() {
        let res = ema_update(1.0, Some(0.0), 0.5);
        assert!((res - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ema_idempotent_on_missing_sample() {
        for alpha in [0.0, 0.3, 0.5, 0.8, 1.0] {
            for old in [0.0, 0.5, 0.8, 1.0, -3.2] {
                assert_eq!(ema_update(old, None, alpha), old);
            }
        }
    }
}
