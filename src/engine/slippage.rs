use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Volume-based slippage: `clamp(Normal(μ=1, σ), 0, 1) · volume`. Grounded
/// on `_filled_amount` in `engine_actors.py`, which draws
/// `random.gauss(1.0, sigma)` and clamps to `[0, 1]` before scaling the
/// advertised amount. Deliberately asymmetric: never exceeds `volume`.
pub fn fillable_volume(volume: f64, sigma: f64, rng: &mut impl Rng) -> f64 {
    if volume <= 0.0 {
        return 0.0;
    }
    // `Normal::new` rejects a negative or non-finite sigma; a bad config value
    // must not take down the dispatcher's single-writer task, so fall back to
    // a degenerate distribution (sample == mean) instead of panicking.
    let sample = match Normal::new(1.0_f64, sigma.max(0.0)) {
        Ok(normal) => normal.sample(rng).clamp(0.0, 1.0),
        Err(_) => 1.0,
    };
    volume * sample
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_exceeds_advertised_volume() {
        let mut rng = rand::thread_rng();
        for _ in 0..1000 {
            let out = fillable_volume(10.0, 0.5, &mut rng);
            assert!(out >= 0.0 && out <= 10.0);
        }
    }

    #[test]
    fn zero_volume_is_never_fillable() {
        let mut rng = rand::thread_rng();
        assert_eq!(fillable_volume(0.0, 0.1, &mut rng), 0.0);
    }
}
