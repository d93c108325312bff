use serde::{Deserialize, Serialize};

pub const DUST_RATIO: f64 = 1e-10;

/// One row of the portfolio: `free` is spendable, `used` is reserved against
/// open orders. `total` is never stored, only derived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AssetBalance {
    pub free: f64,
    pub used: f64,
}

impl Default for AssetBalance {
    fn default() -> Self {
        Self { free: 0.0, used: 0.0 }
    }
}

impl AssetBalance {
    pub fn new(free: f64, used: f64) -> Self {
        Self { free, used }
    }

    pub fn total(&self) -> f64 {
        self.free + self.used
    }

    /// Dust elimination: if `used` is a negligible fraction of `free`, snap
    /// it to zero so floating-point drift never pins a residual open. When
    /// `free` is exactly zero there's no ratio to take, so fall back to an
    /// absolute threshold instead of never clamping.
    pub fn clamp_dust(&mut self) {
        if self.used <= 0.0 {
            return;
        }
        let negligible = if self.free > 0.0 { self.used / self.free < DUST_RATIO } else { self.used < DUST_RATIO };
        if negligible {
            self.used = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_ratio_dust_against_free() {
        let mut bal = AssetBalance::new(1_000_000.0, 1e-8);
        bal.clamp_dust();
        assert_eq!(bal.used, 0.0);
    }

    #[test]
    fn clamps_absolute_dust_when_free_is_zero() {
        let mut bal = AssetBalance::new(0.0, 1e-12);
        bal.clamp_dust();
        assert_eq!(bal.used, 0.0);
    }

    #[test]
    fn leaves_a_real_residual_when_free_is_zero() {
        let mut bal = AssetBalance::new(0.0, 0.5);
        bal.clamp_dust();
        assert_eq!(bal.used, 0.5);
    }
}
