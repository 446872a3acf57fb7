//! Prior inflation against ensemble collapse.

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Scale the anomalies of `columns` by `factor` around their ensemble mean.
///
/// A factor of one is a no-op.
pub fn inflate_multiplicative(ensemble: &mut DMatrix<f64>, columns: &[usize], factor: f64) {
    if (factor - 1.0).abs() <= f64::EPSILON || ensemble.nrows() < 2 {
        return;
    }
    for &col in columns {
        let mut column = ensemble.column_mut(col);
        let mean = column.mean();
        column.apply(|v| *v = mean + factor * (*v - mean));
    }
}

/// Add zero-mean Gaussian noise to `columns`, with standard deviation
/// `factor` times the magnitude of each column's ensemble mean.
pub fn inflate_additive<R: Rng + ?Sized>(
    ensemble: &mut DMatrix<f64>,
    columns: &[usize],
    factor: f64,
    rng: &mut R,
) {
    if factor <= 0.0 {
        return;
    }
    for &col in columns {
        let mut column = ensemble.column_mut(col);
        let std_dev = factor * column.mean().abs();
        let Ok(noise) = Normal::new(0.0, std_dev) else {
            continue;
        };
        if std_dev <= 0.0 {
            continue;
        }
        column.apply(|v| *v += noise.sample(rng));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    #[test]
    fn multiplicative_inflation_scales_spread_and_keeps_mean() {
        let mut ensemble = DMatrix::from_row_slice(3, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0]);
        inflate_multiplicative(&mut ensemble, &[0], 2.0);
        assert_relative_eq!(ensemble.column(0).mean(), 2.0);
        assert_relative_eq!(ensemble[(0, 0)], 0.0);
        assert_relative_eq!(ensemble[(2, 0)], 4.0);
        assert_relative_eq!(ensemble[(1, 1)], 5.0);
    }

    #[test]
    fn additive_inflation_perturbs_only_selected_columns() {
        let mut ensemble = DMatrix::from_element(50, 2, 0.5);
        let mut rng = SmallRng::seed_from_u64(11);
        inflate_additive(&mut ensemble, &[1], 0.1, &mut rng);
        assert!(ensemble.column(0).iter().all(|&v| (v - 0.5).abs() < f64::EPSILON));
        assert!(ensemble.column(1).iter().any(|&v| (v - 0.5).abs() > 1e-6));
    }

    #[test]
    fn zero_mean_column_is_not_perturbed() {
        let mut ensemble = DMatrix::zeros(10, 1);
        let mut rng = SmallRng::seed_from_u64(11);
        inflate_additive(&mut ensemble, &[0], 0.5, &mut rng);
        assert!(ensemble.iter().all(|&v| v.abs() < f64::EPSILON));
    }
}
