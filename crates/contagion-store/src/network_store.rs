//! Time-indexed storage of contact-network intervals.
//!
//! The kinetic simulator runs one static contact interval at a time. Before
//! each run the orchestrator opens a record with the network and the start
//! statuses; after the run it fills in the end statuses. Records are keyed
//! by the grid step of their start time and live until evicted FIFO once
//! the store is at capacity.
//!
//! # Invariants
//!
//! - Lookups go through [`TimeGrid::step_of`], so a time within half an
//!   interval of a boundary finds the record and anything else is a
//!   [`StoreError::MissingInterval`].
//! - The orchestrator pins a lookback floor while a window may still be
//!   replayed. Eviction of an interval at or after the floor is an error,
//!   never a silent loss of data.

use std::collections::BTreeMap;

use tracing::debug;

use contagion_types::{ContactNetwork, StatusMap, Step, TimeGrid};

use crate::StoreError;

/// One static contact interval `[start, end)` and its boundary statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalRecord {
    /// Grid step of the interval start.
    pub start: Step,
    /// Grid step of the interval end (`start + 1`).
    pub end: Step,
    /// Start time in days.
    pub start_time: f64,
    /// End time in days.
    pub end_time: f64,
    /// The network as it was used for this interval.
    pub contact_network: ContactNetwork,
    /// Statuses at the start of the interval, once recorded.
    pub start_statuses: Option<StatusMap>,
    /// Statuses at the end of the interval, once recorded.
    pub end_statuses: Option<StatusMap>,
}

/// Bounded FIFO history of contact-network intervals.
#[derive(Debug, Clone)]
pub struct TimeIndexedNetworkStore {
    /// Grid used to convert times to keys.
    grid: TimeGrid,
    /// Maximum number of retained intervals.
    capacity: usize,
    /// Records keyed by start step.
    records: BTreeMap<Step, IntervalRecord>,
    /// Earliest start step that must not be evicted.
    lookback_floor: Option<Step>,
}

impl TimeIndexedNetworkStore {
    /// Create a store holding at most `capacity` intervals.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ZeroCapacity`] for a zero capacity.
    pub fn new(grid: TimeGrid, capacity: usize) -> Result<Self, StoreError> {
        if capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        Ok(Self {
            grid,
            capacity,
            records: BTreeMap::new(),
            lookback_floor: None,
        })
    }

    /// Create a store sized for the assimilation windows: the larger of
    /// one DA window plus one prediction window, and the contact-trace
    /// lookback.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ZeroCapacity`] if every window is empty.
    pub fn for_windows(
        grid: TimeGrid,
        steps_per_da_window: usize,
        steps_per_prediction_window: usize,
        steps_per_contact_trace: usize,
    ) -> Result<Self, StoreError> {
        let capacity = steps_per_da_window
            .saturating_add(steps_per_prediction_window)
            .max(steps_per_contact_trace);
        Self::new(grid, capacity)
    }

    /// Maximum number of retained intervals.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of retained intervals.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Protect every interval starting at or after `time` from eviction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Time`] if `time` cannot be placed on the grid.
    pub fn set_lookback_floor(&mut self, time: f64) -> Result<(), StoreError> {
        self.lookback_floor = Some(self.grid.step_of(time)?);
        Ok(())
    }

    /// Remove the lookback protection.
    pub const fn clear_lookback_floor(&mut self) {
        self.lookback_floor = None;
    }

    /// Open the record for the interval starting at `start_time`.
    ///
    /// Re-saving an existing start replaces its network and clears its
    /// statuses. When the store is full the oldest interval is evicted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LookbackEviction`] if the interval to evict
    /// lies inside the protected lookback window, or [`StoreError::Time`]
    /// for an off-grid time.
    pub fn save_network_by_start_time(
        &mut self,
        start_time: f64,
        network: &ContactNetwork,
    ) -> Result<(), StoreError> {
        let start = self.grid.step_of(start_time)?;
        if !self.records.contains_key(&start) && self.records.len() >= self.capacity {
            self.evict_oldest(start)?;
        }
        let end = start.next();
        self.records.insert(
            start,
            IntervalRecord {
                start,
                end,
                start_time: self.grid.time_of(start),
                end_time: self.grid.time_of(end),
                contact_network: network.clone(),
                start_statuses: None,
                end_statuses: None,
            },
        );
        Ok(())
    }

    /// Record the statuses at the start of the interval beginning at `start_time`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingInterval`] if no such interval is stored.
    pub fn save_start_statuses_to_network(
        &mut self,
        start_time: f64,
        statuses: StatusMap,
    ) -> Result<(), StoreError> {
        let start = self.grid.step_of(start_time)?;
        let record = self
            .records
            .get_mut(&start)
            .ok_or(StoreError::MissingInterval { time: start_time })?;
        record.start_statuses = Some(statuses);
        Ok(())
    }

    /// Record the statuses at the end of the interval ending at `end_time`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingInterval`] if no such interval is stored.
    pub fn save_end_statuses_to_network(
        &mut self,
        end_time: f64,
        statuses: StatusMap,
    ) -> Result<(), StoreError> {
        let start = self.grid.step_of(end_time)?.prev();
        let record = self
            .records
            .get_mut(&start)
            .ok_or(StoreError::MissingInterval { time: end_time })?;
        record.end_statuses = Some(statuses);
        Ok(())
    }

    /// The interval starting at `start_time`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingInterval`] if no such interval is stored.
    pub fn get_network_from_start_time(&self, start_time: f64) -> Result<&IntervalRecord, StoreError> {
        let start = self.grid.step_of(start_time)?;
        self.records
            .get(&start)
            .ok_or(StoreError::MissingInterval { time: start_time })
    }

    /// The interval ending at `end_time`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingInterval`] if no such interval is stored.
    pub fn get_network_from_end_time(&self, end_time: f64) -> Result<&IntervalRecord, StoreError> {
        let start = self.grid.step_of(end_time)?.prev();
        self.records
            .get(&start)
            .ok_or(StoreError::MissingInterval { time: end_time })
    }

    /// Stored intervals whose start lies in `[from_time, to_time)`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Time`] for an off-grid bound.
    pub fn intervals_between(
        &self,
        from_time: f64,
        to_time: f64,
    ) -> Result<impl Iterator<Item = &IntervalRecord>, StoreError> {
        let from = self.grid.step_of(from_time)?;
        let to = self.grid.step_of(to_time)?;
        let range = if from < to { from..to } else { from..from };
        Ok(self.records.range(range).map(|(_, record)| record))
    }

    /// The most recently started interval.
    pub fn latest(&self) -> Option<&IntervalRecord> {
        self.records.values().next_back()
    }

    /// Drop the oldest record to make room for `incoming`.
    fn evict_oldest(&mut self, incoming: Step) -> Result<(), StoreError> {
        let Some(&oldest) = self.records.keys().next() else {
            return Ok(());
        };
        if let Some(floor) = self.lookback_floor {
            if oldest >= floor {
                return Err(StoreError::LookbackEviction {
                    evicted_start: self.grid.time_of(oldest),
                    floor: self.grid.time_of(floor),
                });
            }
        }
        self.records.remove(&oldest);
        debug!(
            evicted = oldest.index(),
            incoming = incoming.index(),
            "Evicted oldest network interval"
        );
        Ok(())
    }
}
