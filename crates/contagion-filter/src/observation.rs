//! Observation records, sampling policies and noise models.
//!
//! # Observation models
//!
//! - **Tests** (sensor surveys and viral tests) draw a noisy binary result
//!   per sampled node from its true status, then report the posterior
//!   probability of infection given the result: the positive predictive
//!   value for a positive test, the false omission rate for a negative one.
//!   The prior prevalence is the ensemble mean of the observed compartment.
//! - **Records** report, for every user node, whether it is in the observed
//!   compartment (hospital or death records), as `certainty` or
//!   `1 - certainty`.
//!
//! Noise variance is the Bernoulli variance `v (1 - v)` of the reported
//! value, floored at the source's `min_noise_variance`.

use std::collections::BTreeSet;

use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use contagion_types::{Compartment, EnsembleState, NodeId, StatusMap, Step};

/// Prevalence is kept this far from 0 and 1 so predictive values stay finite.
const PREVALENCE_MARGIN: f64 = 1e-6;

/// Channel an observation source draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    /// Random surveys of the population.
    Sensor,
    /// Viral tests whose results arrive after a delay.
    ViralTest,
    /// Hospital or death records.
    Record,
}

/// Which records a record source reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolarity {
    /// Only nodes in the observed compartment.
    Positive,
    /// Only nodes outside the observed compartment.
    Negative,
    /// Every user node.
    #[default]
    Both,
}

/// How nodes are chosen for observation at each cadence step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SamplingPolicy {
    /// A uniform draw of `budget` nodes without replacement.
    Random {
        /// Nodes observed per step.
        budget: usize,
    },
    /// Neighbors of the previous step's positives first, then a uniform
    /// draw to fill the budget.
    NeighborBiased {
        /// Nodes observed per step.
        budget: usize,
    },
    /// A draw weighted by the ensemble variance of the observed compartment.
    HighVariance {
        /// Nodes observed per step.
        budget: usize,
    },
    /// Every user node.
    AllNodes,
}

/// One buffered batch of observations from a single source.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Step the observation was taken at.
    pub step: Step,
    /// Time the observation was taken at.
    pub time: f64,
    /// Name of the source that produced it.
    pub source: String,
    /// Observed compartment.
    pub compartment: Compartment,
    /// Observed user-node positions.
    pub nodes: Vec<usize>,
    /// Observed values, one per node.
    pub values: Vec<f64>,
    /// Diagonal of the observation-noise covariance.
    pub variances: Vec<f64>,
}

impl Observation {
    /// Number of observed nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was observed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Test characteristics of a sensor or viral test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TestCharacteristics {
    /// Probability that an infected node tests positive.
    pub sensitivity: f64,
    /// Probability that a non-infected node tests negative.
    pub specificity: f64,
}

impl TestCharacteristics {
    /// Positive predictive value at prevalence `p`.
    pub fn positive_predictive_value(&self, p: f64) -> f64 {
        let p = p.clamp(PREVALENCE_MARGIN, 1.0 - PREVALENCE_MARGIN);
        let true_positive = self.sensitivity * p;
        let false_positive = (1.0 - self.specificity) * (1.0 - p);
        ratio(true_positive, true_positive + false_positive)
    }

    /// False omission rate at prevalence `p`.
    pub fn false_omission_rate(&self, p: f64) -> f64 {
        let p = p.clamp(PREVALENCE_MARGIN, 1.0 - PREVALENCE_MARGIN);
        let false_negative = (1.0 - self.sensitivity) * p;
        let true_negative = self.specificity * (1.0 - p);
        ratio(false_negative, false_negative + true_negative)
    }

    /// Draw a test result for a node whose true infection status is `infected`.
    pub fn draw<R: Rng + ?Sized>(&self, infected: bool, rng: &mut R) -> bool {
        let positive_probability = if infected {
            self.sensitivity
        } else {
            1.0 - self.specificity
        };
        rng.random::<f64>() < positive_probability
    }
}

/// `num / den`, zero when the denominator vanishes.
fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 { num / den } else { 0.0 }
}

/// Noise variance of a reported probability.
pub fn bernoulli_variance(value: f64, floor: f64) -> f64 {
    (value * (1.0 - value)).max(floor)
}

/// Choose user-node positions to observe.
///
/// `previous_positives` are user positions that tested positive at the
/// source's previous cadence step; `neighbors` returns a position's user
/// network neighbors.
pub fn sample_nodes<R: Rng + ?Sized>(
    policy: SamplingPolicy,
    state: &EnsembleState,
    compartment: Compartment,
    previous_positives: &[usize],
    neighbors: impl Fn(usize) -> Vec<usize>,
    rng: &mut R,
) -> Vec<usize> {
    let n = state.n_nodes();
    let mut nodes = match policy {
        SamplingPolicy::AllNodes => (0..n).collect(),
        SamplingPolicy::Random { budget } => index::sample(rng, n, budget.min(n)).into_vec(),
        SamplingPolicy::NeighborBiased { budget } => {
            let budget = budget.min(n);
            let candidates: BTreeSet<usize> = previous_positives
                .iter()
                .flat_map(|&node| neighbors(node))
                .filter(|&node| node < n)
                .collect();
            let candidates: Vec<usize> = candidates.into_iter().collect();
            let mut chosen: BTreeSet<usize> = if candidates.len() > budget {
                index::sample(rng, candidates.len(), budget)
                    .into_iter()
                    .map(|i| candidates[i])
                    .collect()
            } else {
                candidates.into_iter().collect()
            };
            let remaining: Vec<usize> = (0..n).filter(|node| !chosen.contains(node)).collect();
            let fill = budget.saturating_sub(chosen.len()).min(remaining.len());
            chosen.extend(index::sample(rng, remaining.len(), fill).into_iter().map(|i| remaining[i]));
            chosen.into_iter().collect()
        }
        SamplingPolicy::HighVariance { budget } => {
            let budget = budget.min(n);
            let variance = state.variance();
            let weight = |node: usize| variance[compartment.index() * n + node].max(0.0);
            let positive = (0..n).filter(|&node| weight(node) > 0.0).count();
            if positive >= budget {
                index::sample_weighted(rng, n, weight, budget)
                    .map(index::IndexVec::into_vec)
                    .unwrap_or_else(|_| index::sample(rng, n, budget).into_vec())
            } else {
                index::sample(rng, n, budget).into_vec()
            }
        }
    };
    nodes.sort_unstable();
    nodes
}

/// Values and variances of a test taken at `nodes`.
///
/// Returns `(values, variances, positives)` where `positives` are the
/// positions that tested positive.
pub fn test_observations<R: Rng + ?Sized>(
    nodes: &[usize],
    state: &EnsembleState,
    compartment: Compartment,
    truth: &StatusMap,
    user_nodes: &[NodeId],
    test: TestCharacteristics,
    min_noise_variance: f64,
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>, Vec<usize>) {
    let prevalence = state.compartment_mean(compartment);
    let mut values = Vec::with_capacity(nodes.len());
    let mut variances = Vec::with_capacity(nodes.len());
    let mut positives = Vec::new();
    for &node in nodes {
        let infected = user_nodes
            .get(node)
            .and_then(|id| truth.get(id))
            .is_some_and(|&status| status == compartment);
        let value = if test.draw(infected, rng) {
            positives.push(node);
            test.positive_predictive_value(prevalence[node])
        } else {
            test.false_omission_rate(prevalence[node])
        };
        values.push(value);
        variances.push(bernoulli_variance(value, min_noise_variance));
    }
    (values, variances, positives)
}

/// Record observations over every user node, filtered by `polarity`.
///
/// Returns `(nodes, values, variances)`.
pub fn record_observations(
    n_nodes: usize,
    compartment: Compartment,
    truth: &StatusMap,
    user_nodes: &[NodeId],
    polarity: RecordPolarity,
    certainty: f64,
    min_noise_variance: f64,
) -> (Vec<usize>, Vec<f64>, Vec<f64>) {
    let mut nodes = Vec::new();
    let mut values = Vec::new();
    let mut variances = Vec::new();
    for node in 0..n_nodes {
        let recorded = user_nodes
            .get(node)
            .and_then(|id| truth.get(id))
            .is_some_and(|&status| status == compartment);
        let keep = match polarity {
            RecordPolarity::Positive => recorded,
            RecordPolarity::Negative => !recorded,
            RecordPolarity::Both => true,
        };
        if !keep {
            continue;
        }
        let value = if recorded { certainty } else { 1.0 - certainty };
        nodes.push(node);
        values.push(value);
        variances.push(bernoulli_variance(value, min_noise_variance));
    }
    (nodes, values, variances)
}
