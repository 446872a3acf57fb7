//! Ensemble adjustment Kalman filter core.
//!
//! Operates on a bare `members x columns` ensemble matrix. Observations
//! point at columns of that matrix and carry their own noise variance;
//! callers decide what the columns mean (state, parameters, or predicted
//! observations appended for smoothing).
//!
//! # Algorithm
//!
//! With ensemble mean `z̄`, scaled anomalies `A = (Z - z̄)ᵀ / √(J-1)` and
//! observed anomalies `HA`:
//!
//! - effective noise `r_k = R_k + obs_cov_noise + joint_cov_noise +
//!   elementwise_reg · (HA HAᵀ)_kk`
//! - innovation covariance `P = HA HAᵀ + diag(r)`, inverted by Cholesky or
//!   by an eigen-decomposition pseudo-inverse
//! - gain `K = A HAᵀ P⁻¹`
//!
//! The deterministic update moves the mean by `K (y - H z̄)` and maps the
//! anomalies through the symmetric square root
//! `T = (I + HAᵀ diag(r)⁻¹ HA)^(-1/2)`. The perturbed-observation update
//! applies `z_i + K (y + ε_i - H z_i)` to each member.
//!
//! Ill-conditioned covariances are absorbed by truncating small
//! eigenvalues; nothing here fails.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest effective observation-noise variance.
const NOISE_FLOOR: f64 = 1e-12;

/// Eigenvalues below this fraction of the largest are treated as zero.
const EIGEN_TOLERANCE: f64 = 1e-10;

/// How ensemble members are moved once the gain is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMethod {
    /// Mean by Kalman gain, anomalies by the symmetric square-root transform.
    #[default]
    Deterministic,
    /// Every member assimilates its own perturbed copy of the observations.
    PerturbedObservations,
}

/// Numerical knobs of a single update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EakfSettings {
    /// Invert the innovation covariance by pseudo-inverse instead of Cholesky.
    pub full_svd: bool,
    /// Added to every observation-noise variance.
    pub obs_cov_noise: f64,
    /// Added to the diagonal of the innovation covariance.
    pub joint_cov_noise: f64,
    /// Relative inflation of each observed prior variance.
    pub elementwise_reg: f64,
    /// Member update rule.
    pub method: UpdateMethod,
}

impl Default for EakfSettings {
    fn default() -> Self {
        Self {
            full_svd: true,
            obs_cov_noise: 0.0,
            joint_cov_noise: 0.0,
            elementwise_reg: 0.0,
            method: UpdateMethod::Deterministic,
        }
    }
}

/// Observations expressed against ensemble columns.
#[derive(Debug, Clone, Copy)]
pub struct ObservedColumns<'a> {
    /// Column observed by each observation.
    pub columns: &'a [usize],
    /// Observed values.
    pub values: &'a [f64],
    /// Observation-noise variances.
    pub variances: &'a [f64],
}

impl ObservedColumns<'_> {
    /// Number of observations.
    pub const fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether there is nothing to assimilate.
    pub const fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Assimilate `observed` into `ensemble` and return the posterior ensemble.
///
/// Ensembles with fewer than two members, or an empty observation set,
/// are returned unchanged.
pub fn eakf_update<R: Rng + ?Sized>(
    ensemble: &DMatrix<f64>,
    observed: &ObservedColumns<'_>,
    settings: &EakfSettings,
    rng: &mut R,
) -> DMatrix<f64> {
    let members = ensemble.nrows();
    let width = ensemble.ncols();
    let m = observed.len();
    if members < 2 || m == 0 {
        return ensemble.clone();
    }

    let scale = ((members - 1) as f64).sqrt();
    let mean = ensemble.row_mean().transpose();
    let mut deviations = ensemble.clone();
    for (col, mut column) in deviations.column_iter_mut().enumerate() {
        column.add_scalar_mut(-mean[col]);
    }
    let anomalies = deviations.transpose() / scale;
    let observed_anomalies = anomalies.select_rows(observed.columns);
    let prior_obs_cov = &observed_anomalies * observed_anomalies.transpose();

    let noise = DVector::from_fn(m, |k, _| {
        (observed.variances[k]
            + settings.obs_cov_noise
            + settings.joint_cov_noise
            + settings.elementwise_reg * prior_obs_cov[(k, k)])
            .max(NOISE_FLOOR)
    });
    let mut innovation_cov = prior_obs_cov;
    for k in 0..m {
        innovation_cov[(k, k)] += noise[k];
    }
    let gain = &anomalies * observed_anomalies.transpose() * invert_spd(&innovation_cov, settings.full_svd);

    let values = DVector::from_column_slice(observed.values);
    match settings.method {
        UpdateMethod::Deterministic => {
            let predicted = DVector::from_fn(m, |k, _| mean[observed.columns[k]]);
            let posterior_mean = &mean + &gain * (values - predicted);

            let weighted = DMatrix::from_fn(m, members, |k, j| observed_anomalies[(k, j)] / noise[k]);
            let mut precision = observed_anomalies.transpose() * weighted;
            for j in 0..members {
                precision[(j, j)] += 1.0;
            }
            let posterior_anomalies = anomalies * inverse_sqrt(precision);
            DMatrix::from_fn(members, width, |j, c| {
                posterior_mean[c] + scale * posterior_anomalies[(c, j)]
            })
        }
        UpdateMethod::PerturbedObservations => {
            let mut posterior = ensemble.clone();
            for member in 0..members {
                let innovation = DVector::from_fn(m, |k, _| {
                    let perturbation = Normal::new(0.0, noise[k].sqrt()).map_or(0.0, |d| d.sample(rng));
                    values[k] + perturbation - ensemble[(member, observed.columns[k])]
                });
                let correction = &gain * innovation;
                for c in 0..width {
                    posterior[(member, c)] += correction[c];
                }
            }
            posterior
        }
    }
}

/// Invert a symmetric positive semi-definite matrix.
///
/// Without `full_svd` a Cholesky factorization is tried first; if it fails
/// (or with `full_svd`) the eigen-decomposition pseudo-inverse is used.
pub fn invert_spd(matrix: &DMatrix<f64>, full_svd: bool) -> DMatrix<f64> {
    if !full_svd {
        if let Some(cholesky) = matrix.clone().cholesky() {
            return cholesky.inverse();
        }
        debug!(dim = matrix.nrows(), "Cholesky failed, using pseudo-inverse");
    }
    pseudo_inverse(matrix)
}

/// Moore-Penrose pseudo-inverse of a symmetric matrix, truncating
/// eigenvalues below a relative tolerance.
pub fn pseudo_inverse(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    spectral_map(matrix.clone(), |v| 1.0 / v)
}

/// `matrix^(-1/2)` of a symmetric positive semi-definite matrix.
fn inverse_sqrt(matrix: DMatrix<f64>) -> DMatrix<f64> {
    spectral_map(matrix, |v| 1.0 / v.sqrt())
}

/// Apply `f` to the retained eigenvalues and rebuild the matrix.
fn spectral_map(matrix: DMatrix<f64>, f: impl Fn(f64) -> f64) -> DMatrix<f64> {
    let eigen = SymmetricEigen::new(matrix);
    let largest = eigen.eigenvalues.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let cutoff = largest * EIGEN_TOLERANCE;
    let mapped = eigen
        .eigenvalues
        .map(|v| if v > cutoff && v > 0.0 { f(v) } else { 0.0 });
    &eigen.eigenvectors * DMatrix::from_diagonal(&mapped) * eigen.eigenvectors.transpose()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    /// Two columns, the second exactly twice the first.
    fn correlated_ensemble(members: usize) -> DMatrix<f64> {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut ensemble = DMatrix::zeros(members, 2);
        for j in 0..members {
            let x: f64 = rng.random_range(0.2..0.6);
            ensemble[(j, 0)] = x;
            ensemble[(j, 1)] = 2.0 * x;
        }
        ensemble
    }

    fn sample_variance(ensemble: &DMatrix<f64>, col: usize) -> f64 {
        let n = ensemble.nrows() as f64;
        let mean = ensemble.column(col).mean();
        ensemble.column(col).iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    }

    #[test]
    fn empty_observations_leave_ensemble_unchanged() {
        let prior = correlated_ensemble(10);
        let observed = ObservedColumns {
            columns: &[],
            values: &[],
            variances: &[],
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let posterior = eakf_update(&prior, &observed, &EakfSettings::default(), &mut rng);
        assert_eq!(posterior, prior);
    }

    #[test]
    fn scalar_update_matches_kalman_posterior() {
        let prior = correlated_ensemble(40);
        let prior_mean = prior.column(0).mean();
        let prior_var = sample_variance(&prior, 0);
        let noise = 0.01;
        let observed = ObservedColumns {
            columns: &[0],
            values: &[0.9],
            variances: &[noise],
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let posterior = eakf_update(&prior, &observed, &EakfSettings::default(), &mut rng);

        let expected_mean = prior_mean + prior_var / (prior_var + noise) * (0.9 - prior_mean);
        let expected_var = prior_var * noise / (prior_var + noise);
        assert_relative_eq!(posterior.column(0).mean(), expected_mean, epsilon = 1e-10);
        assert_relative_eq!(sample_variance(&posterior, 0), expected_var, epsilon = 1e-10);
    }

    #[test]
    fn unobserved_columns_follow_their_correlation() {
        let prior = correlated_ensemble(30);
        let observed = ObservedColumns {
            columns: &[0],
            values: &[0.5],
            variances: &[0.001],
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let posterior = eakf_update(&prior, &observed, &EakfSettings::default(), &mut rng);
        for j in 0..posterior.nrows() {
            assert_relative_eq!(posterior[(j, 1)], 2.0 * posterior[(j, 0)], epsilon = 1e-9);
        }
    }

    #[test]
    fn second_update_with_precise_observation_is_negligible() {
        let prior = correlated_ensemble(25);
        let observed = ObservedColumns {
            columns: &[0],
            values: &[0.45],
            variances: &[1e-10],
        };
        let settings = EakfSettings::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let first = eakf_update(&prior, &observed, &settings, &mut rng);
        let second = eakf_update(&first, &observed, &settings, &mut rng);
        let first_change = (&first - &prior).amax();
        let second_change = (&second - &first).amax();
        assert!(first_change > 1e-2);
        assert!(second_change < 1e-3 * first_change);
    }

    #[test]
    fn cholesky_and_pseudo_inverse_agree_on_spd_matrices() {
        let matrix = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let fast = invert_spd(&matrix, false);
        let robust = invert_spd(&matrix, true);
        assert_relative_eq!(fast, robust, epsilon = 1e-10);
        assert_relative_eq!(&matrix * fast, DMatrix::identity(2, 2), epsilon = 1e-10);
    }

    #[test]
    fn pseudo_inverse_truncates_singular_directions() {
        let singular = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let inverse = pseudo_inverse(&singular);
        assert_relative_eq!(inverse, DMatrix::from_element(2, 2, 0.25), epsilon = 1e-10);
        // The Cholesky path falls back instead of failing.
        assert_relative_eq!(invert_spd(&singular, false), inverse, epsilon = 1e-10);
    }

    #[test]
    fn perturbed_observations_pull_the_mean_toward_the_data() {
        let prior = correlated_ensemble(200);
        let prior_mean = prior.column(0).mean();
        let observed = ObservedColumns {
            columns: &[0],
            values: &[0.9],
            variances: &[0.001],
        };
        let settings = EakfSettings {
            method: UpdateMethod::PerturbedObservations,
            ..EakfSettings::default()
        };
        let mut rng = SmallRng::seed_from_u64(3);
        let posterior = eakf_update(&prior, &observed, &settings, &mut rng);
        let posterior_mean = posterior.column(0).mean();
        assert!(posterior_mean > prior_mean);
        assert!((posterior_mean - 0.9).abs() < (prior_mean - 0.9).abs());
    }

    #[test]
    fn single_member_ensemble_is_returned_unchanged() {
        let prior = DMatrix::from_row_slice(1, 2, &[0.3, 0.6]);
        let observed = ObservedColumns {
            columns: &[0],
            values: &[0.9],
            variances: &[0.01],
        };
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(eakf_update(&prior, &observed, &EakfSettings::default(), &mut rng), prior);
    }
}
