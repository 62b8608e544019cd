// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Per-chip binary search of a register value.
//!
//! All chips are searched in lock-step: every iteration writes each chip's
//! midpoint, takes one measurement round for the whole detector and then
//! updates the per-chip search states independently of each other.

use calib_log::{diagnostic, info, warn};
use detector_container::{DataContainer, Topology};
use serde::{Deserialize, Serialize};

use crate::hardware::{ChipResponse, Observable, Register};
use crate::{EngineContext, Error, Result};

/// Direction of the register response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    /// The metric grows with the register value.
    Rising,
    /// The metric shrinks as the register value grows.
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    TooHigh,
    TooLow,
}

impl Comparator {
    /// A metric equal to the target counts as [`Verdict::TooLow`].
    pub fn verdict(self, metric: f64, target: f64) -> Verdict {
        let too_high = match self {
            Comparator::Rising => metric > target,
            Comparator::Falling => metric < target,
        };
        if too_high {
            Verdict::TooHigh
        } else {
            Verdict::TooLow
        }
    }
}

/// Which sample is kept when several are equally close to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// Keep the earliest sample.
    Strict,
    /// Let a later sample replace an equally close one.
    LastWins,
}

impl TieBreak {
    fn improves(self, distance: f64, best: f64) -> bool {
        match self {
            TieBreak::Strict => distance < best,
            TieBreak::LastWins => distance <= best,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BisectionRequest {
    pub register: Register,
    /// Events per round. `None` uses [`crate::settings::EngineSettings::events_per_point`].
    pub events_per_point: Option<u32>,
    pub target: f64,
    pub lo: u32,
    pub hi_exclusive: u32,
    pub comparator: Comparator,
    pub tie_break: TieBreak,
    pub observable: Observable,
    /// Name of the published stream.
    pub stream: String,
}

/// Number of iterations needed to search `[lo, hi_exclusive)`.
pub fn iterations(lo: u32, hi_exclusive: u32) -> u32 {
    match hi_exclusive.checked_sub(lo) {
        Some(span) if span > 0 => span.ilog2() + 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SearchState {
    min: u32,
    max: u32,
    best_value: Option<u32>,
    best_metric: Option<f64>,
    best_distance: f64,
}

impl SearchState {
    fn new(lo: u32, hi_exclusive: u32) -> Self {
        SearchState {
            min: lo,
            max: hi_exclusive,
            best_value: None,
            best_metric: None,
            best_distance: f64::INFINITY,
        }
    }

    fn mid(&self) -> u32 {
        self.min + (self.max - self.min) / 2
    }

    /// Fold the metric measured at [`Self::mid`] into the state.
    ///
    /// An undefined metric leaves the state unchanged.
    fn update(&mut self, metric: Option<f64>, request: &BisectionRequest) {
        let Some(metric) = metric else {
            return;
        };
        let mid = self.mid();
        match request.comparator.verdict(metric, request.target) {
            Verdict::TooHigh => self.max = mid,
            Verdict::TooLow => self.min = mid,
        }
        let distance = (metric - request.target).abs();
        if request.tie_break.improves(distance, self.best_distance) {
            self.best_distance = distance;
            self.best_value = Some(mid);
            self.best_metric = Some(metric);
        }
    }
}

#[derive(Debug, Clone)]
pub struct BisectionOutcome {
    /// Register value closest to the target per chip, `None` when no defined
    /// metric was ever measured.
    pub best_values: DataContainer<Option<u32>>,
    pub best_metrics: DataContainer<Option<f64>>,
    /// Response measured after the best values were written.
    pub response: DataContainer<ChipResponse>,
    pub iterations: u32,
}

impl BisectionOutcome {
    /// Best values, failing on the first chip without one.
    pub fn require_best_values(&self) -> Result<DataContainer<u32>> {
        if let Some((key, _)) = self.best_values.leaves().find(|(_, v)| v.is_none()) {
            return Err(Error::UndefinedBestValue { chip: key.address });
        }
        Ok(self.best_values.map(|_, v| v.unwrap_or_default()))
    }
}

pub struct BisectionEngine<'c, 'a> {
    ctx: &'c mut EngineContext<'a>,
}

impl<'c, 'a> BisectionEngine<'c, 'a> {
    pub fn new(ctx: &'c mut EngineContext<'a>) -> Self {
        BisectionEngine { ctx }
    }

    /// Measurement calls counted by [`Self::search`] for `request`.
    pub fn expected_measurements(&self, request: &BisectionRequest) -> u64 {
        u64::from(iterations(request.lo, request.hi_exclusive)) * self.ctx.measurements_per_round()
    }

    fn validate(request: &BisectionRequest) -> Result<()> {
        if request.hi_exclusive <= request.lo {
            return Err(Error::InvalidRequest(format!(
                "empty search interval [{}, {})",
                request.lo, request.hi_exclusive
            )));
        }
        if request.hi_exclusive > request.register.range_len() {
            return Err(Error::ValueOutOfRange {
                register: request.register.name().to_string(),
                value: request.hi_exclusive - 1,
                bits: request.register.bits(),
            });
        }
        if !request.target.is_finite() {
            return Err(Error::InvalidRequest(format!(
                "target {} is not finite",
                request.target
            )));
        }
        Ok(())
    }

    /// Search every chip for the register value whose metric is closest to
    /// `request.target`.
    ///
    /// Runs [`iterations`] measurement rounds, then writes each chip's best
    /// value and refreshes the response with one more round that is not
    /// counted as progress. Chips without a best value keep their last
    /// midpoint.
    pub fn search(&mut self, request: &BisectionRequest) -> Result<BisectionOutcome> {
        Self::validate(request)?;
        let topology: &Topology = self.ctx.topology;
        let register = &request.register;
        let iterations = iterations(request.lo, request.hi_exclusive);
        info!(
            "Bisecting {} in [{}, {}) towards {} ({} iterations)",
            register,
            request.lo,
            request.hi_exclusive,
            request.target,
            iterations
        );

        let events = self.ctx.events_per_point(request.events_per_point);
        let writer = self.ctx.writer();
        let mut states =
            DataContainer::with_payload(topology, SearchState::new(request.lo, request.hi_exclusive));
        for iteration in 0..iterations {
            let mids = states.map(|_, state| Some(state.mid()));
            writer.write_each(self.ctx.registers, register, &mids)?;
            let response = self.ctx.measure(events)?;
            states.zip_mut_with(&response, |_, state, r| {
                state.update(r.metric(request.observable), request);
            })?;
            self.ctx
                .publisher
                .publish(&response, &request.stream, Some(f64::from(iteration)));
            diagnostic!("Bisection iteration {iteration} of {register} done");
        }

        let best_values = states.map(|_, state| state.best_value);
        let best_metrics = states.map(|_, state| state.best_metric);
        for (key, value) in best_values.leaves() {
            if value.is_none() {
                warn!("No best value of {register} found for chip {}", key.address);
            }
        }
        writer.write_each(self.ctx.registers, register, &best_values)?;
        let response = self.ctx.refresh(events)?;
        self.ctx.publisher.publish(&best_values, &request.stream, None);
        info!("Bisection of {register} done");
        self.ctx.report_chip_errors(register.name());
        Ok(BisectionOutcome {
            best_values,
            best_metrics,
            response,
            iterations,
        })
    }
}
