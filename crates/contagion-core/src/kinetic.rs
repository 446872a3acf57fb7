//! Ground-truth simulator and user-network contracts.

use contagion_filter::ObservedNetwork;
use contagion_types::{ContactMatrix, ContactNetwork, StatusMap};

/// Errors raised by a kinetic simulator.
#[derive(Debug, thiserror::Error)]
pub enum KineticError {
    /// The requested stop time lies before the simulator's clock.
    #[error("cannot run to {stop_time}: kinetic clock is already at {current_time}")]
    StopTimeInPast {
        /// Requested stop time.
        stop_time: f64,
        /// Simulator clock.
        current_time: f64,
    },

    /// The network covers a different population than the simulator.
    #[error("kinetic model holds {expected} nodes, network has {found}")]
    NodeCount {
        /// Nodes the simulator was built for.
        expected: usize,
        /// Nodes in the supplied network.
        found: usize,
    },
}

/// The stochastic simulator that produces the synthetic ground truth.
pub trait KineticSimulator {
    /// Advance the epidemic to `stop_time` over `network` and return the
    /// network with the contact durations realized over the interval.
    fn run(&mut self, stop_time: f64, network: &ContactNetwork) -> Result<ContactNetwork, KineticError>;

    /// Statuses of every node at the simulator's clock.
    fn current_statuses(&self) -> &StatusMap;

    /// The simulator's clock.
    fn time(&self) -> f64;
}

/// Projection of the full contact network onto the user population.
///
/// User positions `0..n_users` index the forecast's node axis;
/// [`ObservedNetwork::user_nodes`] maps them back to full-population ids.
pub trait UserNetworkProjector: ObservedNetwork {
    /// Re-project from a new full-population network.
    fn update_from(&mut self, network: &ContactNetwork);

    /// Mean contact durations between user positions.
    fn edge_weights(&self) -> &ContactMatrix;

    /// Diurnally integrated activation rate per user position.
    fn lambda_integrated(&self) -> &[f64];

    /// Cap the midday contact rate of every user node.
    fn set_max_contact_rate(&mut self, lambda_max: f64);
}
