//! Software volume scaler curves and gain translation.
//!
//! When a device cannot realize a volume range in hardware, the effective
//! volume is translated to a linear scaler and applied in software by the
//! mixer. Gains are carried in hundredths of a dB throughout.

/// Number of volume steps, covering 0 through 100.
pub const NUM_VOLUME_STEPS: usize = 101;

const DB_PER_STEP: f64 = 0.5;

/// Converts a dB value to a linear scaler.
pub fn db_to_scaler(db: f64) -> f64 {
    10f64.powf(db / 20.0)
}

/// Converts a gain in hundredths of a dB to a linear scaler.
pub fn gain_scaler(centi_db: i64) -> f64 {
    db_to_scaler(centi_db as f64 / 100.0)
}

/// Lookup table from volume step (0-100) to linear scaler.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftvolCurve {
    scalers: [f64; NUM_VOLUME_STEPS],
}

impl Default for SoftvolCurve {
    /// The stepped default curve: full scale at 100, attenuating half a dB
    /// per step, silent at 0.
    fn default() -> Self {
        let mut scalers = [0.0; NUM_VOLUME_STEPS];
        for (step, scaler) in scalers.iter_mut().enumerate().skip(1) {
            *scaler = db_to_scaler((step as f64 - 100.0) * DB_PER_STEP);
        }
        Self { scalers }
    }
}

impl SoftvolCurve {
    /// Builds a curve from an explicit scaler table.
    pub fn from_scalers(scalers: [f64; NUM_VOLUME_STEPS]) -> Self {
        Self { scalers }
    }

    /// The scaler for a volume step; steps above 100 clamp to 100.
    pub fn scaler(&self, volume: u32) -> f64 {
        self.scalers[(volume as usize).min(NUM_VOLUME_STEPS - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_curve_endpoints() {
        let curve = SoftvolCurve::default();
        assert!((curve.scaler(100) - 1.0).abs() < 1e-9);
        assert!(curve.scaler(0).abs() < 1e-9);
    }

    #[test]
    fn default_curve_is_monotonic() {
        let curve = SoftvolCurve::default();
        for step in 1..=100 {
            assert!(curve.scaler(step) > curve.scaler(step - 1));
        }
    }

    #[test]
    fn half_db_per_step() {
        let curve = SoftvolCurve::default();
        let ratio = curve.scaler(100) / curve.scaler(98);
        assert!((ratio - db_to_scaler(1.0)).abs() < 1e-9);
    }

    #[test]
    fn gain_scaler_translation() {
        assert!((gain_scaler(0) - 1.0).abs() < 1e-9);
        assert!((gain_scaler(600) - db_to_scaler(6.0)).abs() < 1e-9);
        assert!((gain_scaler(-2000) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn out_of_range_volume_clamps() {
        let curve = SoftvolCurve::default();
        assert!((curve.scaler(250) - curve.scaler(100)).abs() < 1e-9);
    }
}
