//! Sweep orchestration: the time-stepping state machine of a run.
//!
//! [`Orchestrator::run`] drives one complete run:
//!
//! 1. **Spin-up**: forecast and kinetic model advance in lockstep without
//!    assimilation. The intervention policy is consulted after every step.
//! 2. For every remaining prediction window:
//!    - **Predict**: advance the window in lockstep, recording the network
//!      store and collecting observations on each source's cadence.
//!    - **Assimilate** according to the [`SweepVariant`]:
//!      *backward/forward* steps back over the DA window assimilating as it
//!      goes, assimilates once more at the peak and steps forward again;
//!      *iterated-forward* corrects the window start by fixed-lag smoothing
//!      in a round robin over source kinds, replaying the window after each
//!      pass that changed the ensemble.
//!    - **Intervene** if the schedule is due.
//! 3. **Finish**: final series push and artifact hand-off to the sink.
//!
//! # Design Principles
//!
//! - The [`SimulationContext`] owns the canonical ensemble and parameters.
//!   Each collaborator call borrows them and the returned value is adopted.
//! - Every state or parameter change made by an assimilator is pushed into
//!   the stepper before it is stepped again.
//! - Time drift beyond one contact interval aborts the run with a
//!   [`ConsistencyError`]; nothing is rescheduled or silently repaired.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use contagion_filter::{FilterError, ObservationKind, ObservationSource};
use contagion_store::{StateSeries, StoreError, TimeIndexedNetworkStore, TimeSeriesError};
use contagion_types::status::slice_statuses;
use contagion_types::{
    Compartment, CompartmentCounts, ContactNetwork, EnsembleState, NodeId, ParameterEnsemble, StatusMap, Step,
    TimeError,
};

use crate::config::{AssimilationConfig, ConfigError};
use crate::context::{ConsistencyError, ForecastClock, SimulationContext};
use crate::intervention::{InterventionError, InterventionPolicy, SelectionInputs};
use crate::kinetic::{KineticError, KineticSimulator, UserNetworkProjector};
use crate::series::ReportingSeries;
use crate::sink::{Artifact, OutputSink, SinkError};
use crate::prior;
use crate::stepper::{ForecastStepper, StepperError};

/// Seed offset of the first observation source; source `i` uses `seed + OFFSET + i`.
const SOURCE_SEED_OFFSET: u64 = 100;

/// Collection starts this fraction of a contact interval before the
/// earliest assimilation time, so a step landing on it counts.
const COLLECTION_SLACK: f64 = 0.1;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How each prediction window is assimilated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepVariant {
    /// Assimilate while stepping backwards over the DA window, then forwards.
    #[default]
    BackwardForward,
    /// Correct the window start by fixed-lag smoothing and replay the window.
    IteratedForward,
}

/// Phase of the state machine, carried in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    /// Lockstep advance before any assimilation.
    SpinUp,
    /// Lockstep advance over a prediction window.
    Predict,
    /// Backward steps over the DA window.
    BackwardSweep,
    /// Forward steps back to the window end.
    ForwardSweep,
    /// Fixed-lag correction of the window start.
    AssimilateInitial,
    /// Replay from the corrected window start.
    ResimulateForward,
}

/// Source kind assimilated in smoothing pass `pass`: one sensor pass, one
/// viral-test pass, then `n_record_sweeps` record passes per sweep.
pub const fn pass_kind(pass: usize, n_record_sweeps: usize) -> ObservationKind {
    match pass % (2 + n_record_sweeps) {
        0 => ObservationKind::Sensor,
        1 => ObservationKind::ViralTest,
        _ => ObservationKind::Record,
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Forecast time drifted from the schedule or the kinetic clock.
    #[error("time consistency violated: {source}")]
    Consistency {
        /// The failed check.
        #[from]
        source: ConsistencyError,
    },

    /// The network store could not serve or accept an interval.
    #[error("network store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// A reporting series overflowed its planned length.
    #[error("reporting series error: {source}")]
    TimeSeries {
        /// The underlying series error.
        #[from]
        source: TimeSeriesError,
    },

    /// An observation source failed.
    #[error("assimilation error: {source}")]
    Filter {
        /// The underlying source error.
        #[from]
        source: FilterError,
    },

    /// The forecast stepper failed.
    #[error("forecast stepper error: {source}")]
    Stepper {
        /// The underlying stepper error.
        #[from]
        source: StepperError,
    },

    /// The kinetic simulator failed.
    #[error("kinetic simulator error: {source}")]
    Kinetic {
        /// The underlying simulator error.
        #[from]
        source: KineticError,
    },

    /// The output sink failed.
    #[error("output error: {source}")]
    Sink {
        /// The underlying sink error.
        #[from]
        source: SinkError,
    },

    /// The intervention policy failed.
    #[error("intervention error: {source}")]
    Intervention {
        /// The underlying policy error.
        #[from]
        source: InterventionError,
    },

    /// A time could not be placed on the grid.
    #[error("time grid error: {source}")]
    Time {
        /// The underlying grid error.
        #[from]
        source: TimeError,
    },

    /// The configuration is invalid.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying configuration error.
        #[from]
        source: ConfigError,
    },

    /// A replay started from a step with no recorded state.
    #[error("no ensemble state recorded at {time}")]
    MissingSnapshot {
        /// Time of the missing snapshot.
        time: f64,
    },
}

// ---------------------------------------------------------------------------
// Collaborators and summary
// ---------------------------------------------------------------------------

/// The external components a run drives.
pub struct Collaborators {
    /// Forecast ensemble solver.
    pub stepper: Box<dyn ForecastStepper>,
    /// Ground-truth simulator.
    pub kinetic: Box<dyn KineticSimulator>,
    /// Projection of the full network onto the users.
    pub user_network: Box<dyn UserNetworkProjector>,
    /// Artifact destination.
    pub sink: Box<dyn OutputSink>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    /// Prediction windows run after spin-up.
    pub windows: usize,
    /// Lockstep forecast steps taken.
    pub steps: usize,
    /// Assimilation calls that changed the ensemble.
    pub updates: usize,
    /// Forecast time at the end of the run.
    pub final_time: f64,
    /// Kinetic time at the end of the run.
    pub kinetic_time: f64,
    /// Kinetic compartment counts of the users at the end of the run.
    pub final_counts: CompartmentCounts,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives spin-up, prediction, assimilation sweeps and interventions.
pub struct Orchestrator {
    /// Run name, for logs.
    run_name: String,
    /// How windows are assimilated.
    variant: SweepVariant,
    /// Collection and assimilation disabled.
    prior_run: bool,
    /// Sweeps per window.
    n_sweeps: usize,
    /// Record passes per iterated-forward sweep.
    n_record_sweeps: usize,
    /// Stepper sub-steps per forward interval.
    n_forward_steps: usize,
    /// Stepper sub-steps per backward interval.
    n_backward_steps: usize,
    /// Mutable run state.
    context: SimulationContext,
    /// One assimilator per configured source.
    sources: Vec<ObservationSource>,
    /// Intervention policy.
    intervention: InterventionPolicy,
    /// External components.
    collaborators: Collaborators,
    /// Lockstep steps taken.
    steps: usize,
    /// Assimilation calls that changed the ensemble.
    updates: usize,
    /// Assimilation walltime of the current window.
    walltime_assimilation: Duration,
}

impl Orchestrator {
    /// Validate `config`, draw the prior ensembles and prepare the
    /// collaborators. `network` is the full-population network the kinetic
    /// model starts from.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Config`] for an invalid configuration,
    /// or the collaborator error if the stepper rejects the prior.
    pub fn new(
        config: &AssimilationConfig,
        network: ContactNetwork,
        mut collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        let plan = config.validate()?;
        let grid = plan.grid;
        let seed = config.run.seed;
        let start_time = grid.time_of(plan.start_step);

        collaborators.user_network.update_from(&network);
        let n_users = collaborators.user_network.user_nodes().len();
        let ensemble_size = config.ensemble.ensemble_size;

        let ensemble_state = prior::initial_state(&config.ensemble, n_users, seed);
        let parameters = prior::initial_parameters(&config.parameters, ensemble_size, n_users, seed.wrapping_add(1));
        let transmission_width = parameters.transmission_rate.width();
        let settings = config.parameters.settings();

        let sources = config
            .sources
            .iter()
            .zip(SOURCE_SEED_OFFSET..)
            .map(|(source, offset)| {
                ObservationSource::new(
                    source.clone(),
                    grid,
                    &settings,
                    n_users,
                    transmission_width,
                    seed.wrapping_add(offset),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let intervention = InterventionPolicy::new(
            config.intervention.clone(),
            grid,
            plan.start_step,
            (config.population.lambda_min, config.population.lambda_max),
            seed.wrapping_add(2),
        )?;

        let stepper = &mut collaborators.stepper;
        stepper.set_start_time(start_time);
        stepper.set_states_ensemble(&ensemble_state)?;
        stepper.update_ensemble(&parameters)?;

        let clock = ForecastClock::new(grid, start_time);
        clock.check("kinetic clock at start", collaborators.kinetic.time())?;

        let context = SimulationContext {
            plan,
            clock,
            ensemble_state,
            parameters,
            state_series: StateSeries::new(),
            store: TimeIndexedNetworkStore::new(grid, plan.store_capacity())?,
            network,
            kinetic_statuses: collaborators.kinetic.current_statuses().clone(),
            series: ReportingSeries::new(
                ensemble_size,
                n_users,
                transmission_width,
                config.parameters.transform,
                plan.total_steps().saturating_add(1),
            ),
            status_trace: Vec::with_capacity(plan.total_steps()),
        };

        Ok(Self {
            run_name: config.run.name.clone(),
            variant: config.windows.variant,
            prior_run: config.run.prior_run,
            n_sweeps: config.windows.n_sweeps,
            n_record_sweeps: config.windows.n_record_sweeps,
            n_forward_steps: config.windows.n_forward_steps,
            n_backward_steps: config.windows.n_backward_steps,
            context,
            sources,
            intervention,
            collaborators,
            steps: 0,
            updates: 0,
            walltime_assimilation: Duration::ZERO,
        })
    }

    /// The run state.
    pub const fn context(&self) -> &SimulationContext {
        &self.context
    }

    /// The observation sources.
    pub fn sources(&self) -> &[ObservationSource] {
        &self.sources
    }

    /// The intervention policy.
    pub const fn intervention(&self) -> &InterventionPolicy {
        &self.intervention
    }

    /// Give the collaborators back.
    pub fn into_collaborators(self) -> Collaborators {
        self.collaborators
    }

    /// Run spin-up, every prediction window and the final hand-off.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: a consistency violation, a missing
    /// interval, a series overflow or a collaborator failure.
    pub fn run(&mut self) -> Result<RunSummary, OrchestratorError> {
        let plan = self.context.plan;
        info!(
            run = %self.run_name,
            variant = ?self.variant,
            windows = plan.n_prediction_windows,
            spin_up_windows = plan.n_spin_up_windows,
            steps_per_window = plan.steps_per_prediction_window,
            steps_per_da_window = plan.steps_per_da_window,
            sources = self.sources.len(),
            prior_run = self.prior_run,
            "Assimilation run starting"
        );

        self.spin_up()?;
        for window in plan.n_spin_up_windows..plan.n_prediction_windows {
            self.run_window(window)?;
        }
        self.finish()
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    fn spin_up(&mut self) -> Result<(), OrchestratorError> {
        let started = Instant::now();
        self.collaborators.stepper.reset_walltimes();
        self.context.store.clear_lookback_floor();
        info!(time = self.context.clock.time(), steps = self.context.plan.spin_up_steps(), "Spin-up started");

        for _ in 0..self.context.plan.spin_up_steps() {
            self.forecast_step(SweepPhase::SpinUp)?;
            self.intervene()?;
        }

        info!(
            time = self.context.clock.time(),
            elapsed_s = started.elapsed().as_secs_f64(),
            eval_closure_s = self.collaborators.stepper.walltime_eval_closure().as_secs_f64(),
            "Spin-up ended"
        );
        Ok(())
    }

    fn run_window(&mut self, window: usize) -> Result<(), OrchestratorError> {
        let plan = self.context.plan;
        let started = Instant::now();
        let updates_before = self.updates;
        self.walltime_assimilation = Duration::ZERO;
        self.collaborators.stepper.reset_walltimes();

        let window_start = plan.grid.time_of(plan.start_step)
            + window as f64 * plan.steps_per_prediction_window as f64 * plan.grid.interval();
        self.context.clock.snap_to("prediction window start", window_start)?;
        self.collaborators.stepper.set_start_time(window_start);
        info!(
            window = window + 1,
            windows = plan.n_prediction_windows,
            time = window_start,
            "Prediction window started"
        );

        let window_end = self.context.clock.step()?.offset(plan.steps_per_prediction_window);
        let lookback = plan.steps_per_da_window.max(plan.steps_per_contact_trace);
        self.context
            .store
            .set_lookback_floor(self.context.time_of(window_end.offset(-lookback)))?;

        for _ in 0..plan.steps_per_prediction_window {
            self.forecast_step(SweepPhase::Predict)?;
        }

        let current = self.context.clock.step()?;
        let da_start = current.offset(-plan.steps_per_da_window);
        for source in &mut self.sources {
            source.prune_before(da_start);
        }

        if self.prior_run {
            debug!(window = window + 1, "Prior run, assimilation skipped");
        } else if !self.intervention.is_model_based() {
            debug!(
                window = window + 1,
                selection = ?self.intervention.selection(),
                "Intervention is not model based, assimilation skipped"
            );
        } else {
            match self.variant {
                SweepVariant::BackwardForward => {
                    for sweep in 0..self.n_sweeps {
                        self.backward_forward_sweep(sweep)?;
                    }
                }
                SweepVariant::IteratedForward => self.iterated_forward_sweeps()?,
            }
        }

        self.intervene()?;
        self.context
            .clock
            .check("prediction window end against kinetic clock", self.collaborators.kinetic.time())?;

        let parameters = &self.context.parameters;
        debug!(
            clinical = ?prior::mean_clinical_values(&parameters.transition_rates),
            transmission_rate = parameters.transmission_rate.mean(),
            "Parameter ensemble means"
        );
        info!(
            window = window + 1,
            time = self.context.clock.time(),
            updates = self.updates - updates_before,
            elapsed_s = started.elapsed().as_secs_f64(),
            eval_closure_s = self.collaborators.stepper.walltime_eval_closure().as_secs_f64(),
            assimilation_s = self.walltime_assimilation.as_secs_f64(),
            "Prediction window ended"
        );
        Ok(())
    }

    /// One lockstep step: record series, run the kinetic model over the
    /// interval, advance the forecast, and collect due observations.
    fn forecast_step(&mut self, phase: SweepPhase) -> Result<(), OrchestratorError> {
        let ctx = &mut self.context;
        let users = &mut *self.collaborators.user_network;
        let stepper = &mut *self.collaborators.stepper;
        let dt = ctx.dt();
        let start_time = ctx.clock.time();
        let step = ctx.clock.step()?;

        ctx.series.record(&ctx.ensemble_state, &ctx.parameters)?;
        dump_if_due(ctx, &*users, &mut *self.collaborators.sink, step)?;

        let realized = self.collaborators.kinetic.run(start_time + dt, &ctx.network)?;
        ctx.store.save_network_by_start_time(start_time, &realized)?;
        ctx.store
            .save_start_statuses_to_network(start_time, ctx.kinetic_statuses.clone())?;
        ctx.kinetic_statuses = self.collaborators.kinetic.current_statuses().clone();
        ctx.store
            .save_end_statuses_to_network(start_time + dt, ctx.kinetic_statuses.clone())?;
        ctx.network = realized;
        ctx.status_trace
            .push(CompartmentCounts::of_nodes(&ctx.kinetic_statuses, users.user_nodes()));

        users.update_from(&ctx.network);
        load_contacts(stepper, &*users)?;
        ctx.ensemble_state = stepper.simulate(dt, self.n_forward_steps)?;
        ctx.clock.advance();
        self.steps += 1;

        let now = step.next();
        let time = ctx.time_of(now);
        debug!(phase = ?phase, step = now.index(), time, "Forecast step");

        if self.prior_run || time <= ctx.plan.earliest_assimilation_time - COLLECTION_SLACK * dt {
            return Ok(());
        }
        for source in self.sources.iter_mut().filter(|source| source.is_due(now)) {
            source.find_and_store_observations(&ctx.ensemble_state, &ctx.kinetic_statuses, &*users, time)?;
        }
        if self.variant == SweepVariant::IteratedForward {
            ctx.state_series.record(now, ctx.ensemble_state.clone());
        }
        Ok(())
    }

    fn backward_forward_sweep(&mut self, sweep: usize) -> Result<(), OrchestratorError> {
        let ctx = &mut self.context;
        let users = &mut *self.collaborators.user_network;
        let stepper = &mut *self.collaborators.stepper;
        let dt = ctx.dt();
        let current_time = ctx.clock.time();
        let mut past = ctx.clock.step()?;
        let steps = ctx.plan.steps_per_da_window;
        debug!(sweep = sweep + 1, sweeps = self.n_sweeps, time = current_time, "Sweep started");

        stepper.set_start_time(current_time);
        for _ in 0..steps {
            let record = ctx.store.get_network_from_end_time(ctx.clock.time())?;
            let started = Instant::now();
            let updated = assimilate_due(
                &mut self.sources,
                past,
                ctx.time_of(past),
                current_time,
                &mut ctx.ensemble_state,
                &mut ctx.parameters,
                record.end_statuses.as_ref(),
                &*users,
            )?;
            self.walltime_assimilation += started.elapsed();
            if updated > 0 {
                self.updates += updated;
                push_to_stepper(stepper, &ctx.ensemble_state, &ctx.parameters)?;
            }

            users.update_from(&record.contact_network);
            load_contacts(stepper, &*users)?;
            ctx.ensemble_state = stepper.simulate_backwards(dt, self.n_backward_steps)?;
            ctx.clock.rewind();
            past = past.prev();
            debug!(phase = ?SweepPhase::BackwardSweep, step = past.index(), updated, "Sweep step");
        }

        let started = Instant::now();
        let updated = assimilate_due(
            &mut self.sources,
            past,
            ctx.time_of(past),
            current_time,
            &mut ctx.ensemble_state,
            &mut ctx.parameters,
            None,
            &*users,
        )?;
        self.walltime_assimilation += started.elapsed();
        if updated > 0 {
            self.updates += updated;
            push_to_stepper(stepper, &ctx.ensemble_state, &ctx.parameters)?;
        }
        debug!(time = ctx.clock.time(), updated, "Backward sweep ended at the peak");

        stepper.set_start_time(ctx.clock.time());
        for _ in 0..steps {
            let record = ctx.store.get_network_from_start_time(ctx.clock.time())?;
            users.update_from(&record.contact_network);
            load_contacts(stepper, &*users)?;
            ctx.ensemble_state = stepper.simulate(dt, self.n_forward_steps)?;
            ctx.clock.advance();
            past = past.next();

            let started = Instant::now();
            let updated = assimilate_due(
                &mut self.sources,
                past,
                ctx.time_of(past),
                current_time,
                &mut ctx.ensemble_state,
                &mut ctx.parameters,
                record.end_statuses.as_ref(),
                &*users,
            )?;
            self.walltime_assimilation += started.elapsed();
            if updated > 0 {
                self.updates += updated;
                push_to_stepper(stepper, &ctx.ensemble_state, &ctx.parameters)?;
            }
            debug!(phase = ?SweepPhase::ForwardSweep, step = past.index(), updated, "Sweep step");
        }

        ctx.clock.check("backward/forward sweep end", current_time)?;
        Ok(())
    }

    fn iterated_forward_sweeps(&mut self) -> Result<(), OrchestratorError> {
        let current_time = self.context.clock.time();
        let current = self.context.clock.step()?;
        let past = current.offset(-self.context.plan.steps_per_da_window);
        let past_time = self.context.time_of(past);
        self.context.state_series.prune_before(past);

        let passes = self.n_sweeps * (2 + self.n_record_sweeps);
        for pass in 0..passes {
            let kind = pass_kind(pass, self.n_record_sweeps);
            let started = Instant::now();
            let mut updated = false;
            for source in self.sources.iter_mut().filter(|source| source.kind() == kind) {
                let outcome = source.update_initial_from_series(
                    &self.context.state_series,
                    &self.context.parameters,
                    &*self.collaborators.user_network,
                    past_time,
                    current_time,
                )?;
                if outcome.updated {
                    self.context.state_series.record(past, outcome.state);
                    self.context.parameters = outcome.parameters;
                    self.updates += 1;
                    updated = true;
                }
            }
            self.walltime_assimilation += started.elapsed();
            debug!(phase = ?SweepPhase::AssimilateInitial, pass, kind = ?kind, updated, "Smoothing pass");

            if updated {
                self.resimulate(past, current)?;
            }
        }
        Ok(())
    }

    /// Replay the forecast from the snapshot at `from` to `to`, re-recording
    /// every snapshot on the way.
    fn resimulate(&mut self, from: Step, to: Step) -> Result<(), OrchestratorError> {
        let ctx = &mut self.context;
        let users = &mut *self.collaborators.user_network;
        let stepper = &mut *self.collaborators.stepper;
        let dt = ctx.dt();
        let from_time = ctx.time_of(from);
        let start = ctx
            .state_series
            .get(from)
            .ok_or(OrchestratorError::MissingSnapshot { time: from_time })?;

        stepper.set_states_ensemble(start)?;
        stepper.set_start_time(from_time);
        stepper.update_ensemble(&ctx.parameters)?;

        let mut replay = ForecastClock::new(ctx.plan.grid, from_time);
        let mut step = from;
        while step < to {
            let record = ctx.store.get_network_from_start_time(replay.time())?;
            users.update_from(&record.contact_network);
            load_contacts(stepper, &*users)?;
            ctx.ensemble_state = stepper.simulate(dt, self.n_forward_steps)?;
            replay.advance();
            step = step.next();
            ctx.state_series.record(step, ctx.ensemble_state.clone());
        }
        debug!(phase = ?SweepPhase::ResimulateForward, from = from.index(), to = to.index(), "Window replayed");

        replay.check("re-simulated window end", ctx.clock.time())?;
        Ok(())
    }

    fn intervene(&mut self) -> Result<(), OrchestratorError> {
        let step = self.context.clock.step()?;
        if !self.intervention.is_due(step) {
            return Ok(());
        }
        let positives: Vec<NodeId> = self
            .sources
            .iter()
            .filter(|source| source.kind() == ObservationKind::ViralTest)
            .flat_map(|source| source.positive_nodes_at(step).iter().copied())
            .collect();
        let users = &mut *self.collaborators.user_network;
        let user_nodes = users.user_nodes().to_vec();
        let inputs = SelectionInputs {
            state: &self.context.ensemble_state,
            user_nodes: &user_nodes,
            positives: &positives,
            store: &self.context.store,
        };
        self.intervention
            .apply(step, &inputs, &mut self.context.network, users)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<RunSummary, OrchestratorError> {
        let ctx = &mut self.context;
        let sink = &mut *self.collaborators.sink;
        let step = ctx.clock.step()?;

        ctx.series.record(&ctx.ensemble_state, &ctx.parameters)?;
        dump_if_due(ctx, &*self.collaborators.user_network, sink, step)?;
        ctx.series.save(sink)?;
        sink.save(&Artifact::StatusTrace {
            counts: &ctx.status_trace,
        })?;
        sink.save(&Artifact::InterventionHistory {
            nodes: self.intervention.history(),
        })?;

        let final_counts = ctx.status_trace.last().copied().unwrap_or_default();
        if ctx.series.len() != ctx.series.compartment_fractions.capacity() {
            warn!(
                recorded = ctx.series.len(),
                planned = ctx.series.compartment_fractions.capacity(),
                "Reporting series shorter than planned"
            );
        }
        let summary = RunSummary {
            windows: ctx.plan.n_prediction_windows.saturating_sub(ctx.plan.n_spin_up_windows),
            steps: self.steps,
            updates: self.updates,
            final_time: ctx.clock.time(),
            kinetic_time: self.collaborators.kinetic.time(),
            final_counts,
        };
        info!(
            run = %self.run_name,
            steps = summary.steps,
            updates = summary.updates,
            final_time = summary.final_time,
            infected = final_counts.get(Compartment::I),
            "Assimilation run ended"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Hand the user network's contact durations and activation rates to the stepper.
fn load_contacts(stepper: &mut dyn ForecastStepper, users: &dyn UserNetworkProjector) -> Result<(), StepperError> {
    stepper.set_mean_contact_duration(users.edge_weights())?;
    stepper.set_diurnally_averaged_nodal_activation_rate(users.lambda_integrated())
}

fn push_to_stepper(
    stepper: &mut dyn ForecastStepper,
    state: &EnsembleState,
    parameters: &ParameterEnsemble,
) -> Result<(), StepperError> {
    stepper.set_states_ensemble(state)?;
    stepper.update_ensemble(parameters)
}

/// Run every source due at `step` in order, adopting each correction.
/// Returns how many sources changed the ensemble.
fn assimilate_due(
    sources: &mut [ObservationSource],
    step: Step,
    time: f64,
    current_time: f64,
    state: &mut EnsembleState,
    parameters: &mut ParameterEnsemble,
    truth: Option<&StatusMap>,
    users: &dyn UserNetworkProjector,
) -> Result<usize, FilterError> {
    let mut updated = 0;
    for source in sources.iter_mut().filter(|source| source.is_due(step)) {
        let outcome = source.update(state, truth, parameters, users, time, current_time)?;
        if outcome.updated {
            *state = outcome.state;
            *parameters = outcome.parameters;
            updated += 1;
        }
    }
    Ok(updated)
}

/// Save the kinetic statuses of the users and the forecast mean at save steps.
fn dump_if_due(
    ctx: &SimulationContext,
    users: &dyn UserNetworkProjector,
    sink: &mut dyn OutputSink,
    step: Step,
) -> Result<(), SinkError> {
    if !Step::new(step.since(ctx.plan.start_step)).is_multiple_of(ctx.plan.steps_per_save) {
        return Ok(());
    }
    let statuses = slice_statuses(&ctx.kinetic_statuses, users.user_nodes());
    let mean = ctx.ensemble_state.mean();
    sink.save(&Artifact::KineticStatuses {
        step: step.index(),
        statuses: &statuses,
    })?;
    sink.save(&Artifact::MeanState {
        step: step.index(),
        mean: mean.as_slice(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_passes_cycle_through_source_kinds() {
        let kinds: Vec<ObservationKind> = (0..8).map(|pass| pass_kind(pass, 2)).collect();
        assert_eq!(
            kinds,
            vec![
                ObservationKind::Sensor,
                ObservationKind::ViralTest,
                ObservationKind::Record,
                ObservationKind::Record,
                ObservationKind::Sensor,
                ObservationKind::ViralTest,
                ObservationKind::Record,
                ObservationKind::Record,
            ]
        );
    }

    #[test]
    fn variant_tags_are_snake_case() {
        let variant: SweepVariant = serde_yml::from_str("iterated_forward").unwrap();
        assert_eq!(variant, SweepVariant::IteratedForward);
        assert!(serde_yml::from_str::<SweepVariant>("forward_backward").is_err());
    }
}
