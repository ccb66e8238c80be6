//! Momentum schedule for the EMA teacher update.
//!
//! Values are precomputed once at initialization, one per training
//! iteration, and consumed by index. The standard shape is an optional
//! linear warmup followed by a cosine ramp from the base value toward the
//! final value (conventionally toward 1.0).

use anyhow::ensure;

/// Immutable per-iteration EMA decay values.
#[derive(Debug, Clone)]
pub struct MomentumSchedule {
    values: Vec<f64>,
}

impl MomentumSchedule {
    /// Cosine ramp from `base` to `final_value` over `epochs * niter_per_ep`
    /// iterations, no warmup.
    pub fn cosine(
        base: f64,
        final_value: f64,
        epochs: usize,
        niter_per_ep: usize,
    ) -> anyhow::Result<Self> {
        Self::cosine_with_warmup(base, final_value, epochs, niter_per_ep, 0, 0.0)
    }

    /// Cosine ramp preceded by a linear warmup from `warmup_start` to `base`
    /// over the first `warmup_epochs` epochs.
    pub fn cosine_with_warmup(
        base: f64,
        final_value: f64,
        epochs: usize,
        niter_per_ep: usize,
        warmup_epochs: usize,
        warmup_start: f64,
    ) -> anyhow::Result<Self> {
        let total = epochs * niter_per_ep;
        ensure!(total > 0, "momentum schedule needs at least one iteration");
        let warmup = warmup_epochs * niter_per_ep;
        ensure!(
            warmup < total,
            "warmup ({warmup} iterations) must be shorter than the schedule ({total})"
        );

        let cosine_len = total - warmup;
        let mut values = Vec::with_capacity(total);
        for i in 0..warmup {
            values.push(warmup_start + (base - warmup_start) * i as f64 / warmup as f64);
        }
        for i in 0..cosine_len {
            let progress = i as f64 / cosine_len as f64;
            values.push(
                final_value
                    + 0.5 * (base - final_value) * (1.0 + (std::f64::consts::PI * progress).cos()),
            );
        }
        Self::from_values(values)
    }

    /// Build a schedule from explicit values.
    pub fn from_values(values: Vec<f64>) -> anyhow::Result<Self> {
        ensure!(!values.is_empty(), "momentum schedule must not be empty");
        Ok(Self { values })
    }

    /// Momentum for a global iteration index. Indices past the end clamp to
    /// the final value (the schedule's fixed point).
    pub fn get(&self, iteration: usize) -> f64 {
        self.values[iteration.min(self.values.len() - 1)]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_endpoints() {
        let schedule = MomentumSchedule::cosine(0.996, 1.0, 10, 100).unwrap();
        assert_eq!(schedule.len(), 1000);

        // Starts at base, approaches final.
        assert!((schedule.get(0) - 0.996).abs() < 1e-12);
        assert!((schedule.get(999) - 1.0).abs() < 1e-4);

        // Cosine midpoint is halfway between base and final.
        let mid = schedule.get(500);
        assert!(
            (mid - 0.998).abs() < 1e-4,
            "midpoint expected near 0.998, got {mid}"
        );
    }

    #[test]
    fn test_monotonically_increasing_toward_one() {
        let schedule = MomentumSchedule::cosine(0.9, 1.0, 4, 25).unwrap();
        for i in 1..schedule.len() {
            assert!(
                schedule.get(i) >= schedule.get(i - 1),
                "schedule decreased at iteration {i}"
            );
        }
    }

    #[test]
    fn test_out_of_range_clamps_to_final_value() {
        let schedule = MomentumSchedule::from_values(vec![0.9, 0.99]).unwrap();
        assert_eq!(schedule.get(0), 0.9);
        assert_eq!(schedule.get(1), 0.99);
        assert_eq!(schedule.get(2), 0.99);
        assert_eq!(schedule.get(1_000_000), 0.99);
    }

    #[test]
    fn test_warmup_ramps_linearly() {
        let schedule =
            MomentumSchedule::cosine_with_warmup(0.996, 1.0, 10, 10, 2, 0.0).unwrap();
        assert_eq!(schedule.len(), 100);
        assert!((schedule.get(0) - 0.0).abs() < 1e-12);
        assert!((schedule.get(10) - 0.498).abs() < 1e-9);
        // First post-warmup iteration sits at the base value.
        assert!((schedule.get(20) - 0.996).abs() < 1e-12);
    }

    #[test]
    fn test_empty_schedule_rejected() {
        assert!(MomentumSchedule::from_values(vec![]).is_err());
        assert!(MomentumSchedule::cosine(0.9, 1.0, 0, 10).is_err());
    }

    #[test]
    fn test_warmup_must_fit() {
        assert!(MomentumSchedule::cosine_with_warmup(0.9, 1.0, 2, 10, 2, 0.0).is_err());
    }
}
