//! Global and localized application of the filter, in sequential batches.
//!
//! A localized update corrects each node's block of the joint matrix from
//! a subset of the observations only. Every block is computed from the
//! same prior, so the order in which nodes are visited does not matter.
//! Population-wide parameters are never part of a node block and are only
//! touched by a global update.

use std::ops::Range;

use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::eakf::{EakfSettings, ObservedColumns, eakf_update};
use crate::joint::JointLayout;

/// Which observations correct which part of the joint matrix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// One joint update of every column from every observation.
    #[default]
    Global,
    /// Each observed node's block is updated from its own observations.
    Local,
    /// Each node's block is updated from observations on the node and its
    /// contact-network neighbors.
    Neighbor,
}

/// Observations of one batch, aligned by index.
#[derive(Debug, Clone, Copy)]
pub struct BatchObservations<'a> {
    /// User-node position of each observation.
    pub nodes: &'a [usize],
    /// Joint-matrix column of each observation.
    pub columns: &'a [usize],
    /// Observed values.
    pub values: &'a [f64],
    /// Noise variances.
    pub variances: &'a [f64],
}

/// One localized sub-problem.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalGroup {
    /// Columns written back from this sub-problem.
    target: Vec<usize>,
    /// Indices of the observations that inform it.
    observations: Vec<usize>,
}

/// Split `count` observations into at most `batches` contiguous ranges
/// whose sizes differ by at most one.
pub fn batch_ranges(count: usize, batches: usize) -> Vec<Range<usize>> {
    let batches = batches.clamp(1, count.max(1));
    let base = count / batches;
    let extra = count % batches;
    let mut ranges = Vec::with_capacity(batches);
    let mut start = 0;
    for b in 0..batches {
        let len = base + usize::from(b < extra);
        ranges.push(start..start + len);
        start += len;
    }
    ranges
}

/// Assimilate `observations` into `joint`, in `n_batches` sequential
/// sub-batches, each posterior serving as the next prior.
pub fn assimilate_batches<R: Rng + ?Sized>(
    joint: &DMatrix<f64>,
    layout: &JointLayout,
    observations: &BatchObservations<'_>,
    update_type: UpdateType,
    n_batches: usize,
    settings: &EakfSettings,
    neighbors: &dyn Fn(usize) -> Vec<usize>,
    rng: &mut R,
) -> DMatrix<f64> {
    let mut current = joint.clone();
    for range in batch_ranges(observations.nodes.len(), n_batches) {
        if range.is_empty() {
            continue;
        }
        let batch = BatchObservations {
            nodes: &observations.nodes[range.clone()],
            columns: &observations.columns[range.clone()],
            values: &observations.values[range.clone()],
            variances: &observations.variances[range],
        };
        current = match update_type {
            UpdateType::Global => eakf_update(
                &current,
                &ObservedColumns {
                    columns: batch.columns,
                    values: batch.values,
                    variances: batch.variances,
                },
                settings,
                rng,
            ),
            UpdateType::Local | UpdateType::Neighbor => {
                let groups = local_groups(update_type, layout, batch.nodes, neighbors);
                localized_update(&current, &groups, &batch, settings, rng)
            }
        };
    }
    current
}

/// Build the localized sub-problems for a batch.
fn local_groups(
    update_type: UpdateType,
    layout: &JointLayout,
    nodes: &[usize],
    neighbors: &dyn Fn(usize) -> Vec<usize>,
) -> Vec<LocalGroup> {
    let mut groups = Vec::new();
    for node in 0..layout.n_nodes() {
        let informing: Vec<usize> = match update_type {
            UpdateType::Local => (0..nodes.len()).filter(|&k| nodes[k] == node).collect(),
            UpdateType::Neighbor => {
                let mut region = neighbors(node);
                region.push(node);
                (0..nodes.len()).filter(|&k| region.contains(&nodes[k])).collect()
            }
            UpdateType::Global => Vec::new(),
        };
        if !informing.is_empty() {
            groups.push(LocalGroup {
                target: layout.node_block(node),
                observations: informing,
            });
        }
    }
    groups
}

/// Solve every group against the shared prior and write back its target columns.
fn localized_update<R: Rng + ?Sized>(
    prior: &DMatrix<f64>,
    groups: &[LocalGroup],
    batch: &BatchObservations<'_>,
    settings: &EakfSettings,
    rng: &mut R,
) -> DMatrix<f64> {
    let mut posterior = prior.clone();
    for group in groups {
        let mut columns = group.target.clone();
        let mut positions = Vec::with_capacity(group.observations.len());
        for &k in &group.observations {
            let column = batch.columns[k];
            let found = columns.iter().position(|&c| c == column);
            let position = if let Some(position) = found {
                position
            } else {
                columns.push(column);
                columns.len() - 1
            };
            positions.push(position);
        }
        let values: Vec<f64> = group.observations.iter().map(|&k| batch.values[k]).collect();
        let variances: Vec<f64> = group.observations.iter().map(|&k| batch.variances[k]).collect();

        let sub_prior = prior.select_columns(&columns);
        let sub_posterior = eakf_update(
            &sub_prior,
            &ObservedColumns {
                columns: &positions,
                values: &values,
                variances: &variances,
            },
            settings,
            rng,
        );
        for (i, &column) in group.target.iter().enumerate() {
            posterior.set_column(column, &sub_posterior.column(i));
        }
    }
    posterior
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use contagion_types::Compartment;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn random_joint(members: usize, width: usize) -> DMatrix<f64> {
        let mut rng = SmallRng::seed_from_u64(21);
        DMatrix::from_fn(members, width, |_, _| rng.random_range(0.1..0.5))
    }

    fn no_neighbors(_: usize) -> Vec<usize> {
        Vec::new()
    }

    #[test]
    fn batch_ranges_are_contiguous_and_balanced() {
        let ranges = batch_ranges(10, 3);
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert_eq!(batch_ranges(2, 5), vec![0..1, 1..2]);
        assert_eq!(batch_ranges(0, 3), vec![0..0]);
    }

    #[test]
    fn local_update_touches_only_observed_blocks() {
        let layout = JointLayout::new(3, Vec::new(), 1);
        let prior = random_joint(10, layout.width());
        let column = layout.state_column(Compartment::I, 1);
        let batch = BatchObservations {
            nodes: &[1],
            columns: &[column],
            values: &[0.9],
            variances: &[0.01],
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let posterior = assimilate_batches(
            &prior,
            &layout,
            &batch,
            UpdateType::Local,
            1,
            &EakfSettings::default(),
            &no_neighbors,
            &mut rng,
        );
        for node in [0, 2] {
            for c in layout.node_block(node) {
                assert_eq!(posterior.column(c), prior.column(c));
            }
        }
        // The population-wide transmission column is never localized.
        let beta = layout.transmission_columns()[0];
        assert_eq!(posterior.column(beta), prior.column(beta));
        assert!(posterior.column(column) != prior.column(column));
    }

    #[test]
    fn neighbor_update_spreads_to_adjacent_blocks() {
        let layout = JointLayout::new(3, Vec::new(), 0);
        let prior = random_joint(10, layout.width());
        let column = layout.state_column(Compartment::I, 1);
        let batch = BatchObservations {
            nodes: &[1],
            columns: &[column],
            values: &[0.9],
            variances: &[0.01],
        };
        let neighbors = |node: usize| if node == 0 { vec![1] } else { Vec::new() };
        let mut rng = SmallRng::seed_from_u64(1);
        let posterior = assimilate_batches(
            &prior,
            &layout,
            &batch,
            UpdateType::Neighbor,
            1,
            &EakfSettings::default(),
            &neighbors,
            &mut rng,
        );
        let node0 = layout.state_column(Compartment::I, 0);
        let node2 = layout.state_column(Compartment::I, 2);
        assert!(posterior.column(node0) != prior.column(node0));
        assert_eq!(posterior.column(node2), prior.column(node2));
    }

    #[test]
    fn global_update_moves_unobserved_parameters() {
        let layout = JointLayout::new(2, Vec::new(), 1);
        let mut prior = random_joint(20, layout.width());
        let observed = layout.state_column(Compartment::I, 0);
        let beta = layout.transmission_columns()[0];
        for j in 0..20 {
            prior[(j, beta)] = 10.0 * prior[(j, observed)];
        }
        let batch = BatchObservations {
            nodes: &[0],
            columns: &[observed],
            values: &[0.45],
            variances: &[0.001],
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let posterior = assimilate_batches(
            &prior,
            &layout,
            &batch,
            UpdateType::Global,
            1,
            &EakfSettings::default(),
            &no_neighbors,
            &mut rng,
        );
        assert!(posterior.column(beta) != prior.column(beta));
    }
}
