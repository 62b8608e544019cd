// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Linear register sweeps.

use calib_log::{diagnostic, info};
use detector_container::DataContainer;
use serde::Serialize;

use crate::hardware::{ChipResponse, Register};
use crate::{EngineContext, Error, Result};

/// One sweep of `register` over `values`.
#[derive(Debug, Clone)]
pub struct SweepRequest {
    pub register: Register,
    pub values: Vec<u32>,
    /// Events per step. `None` uses [`crate::settings::EngineSettings::events_per_point`].
    pub events_per_point: Option<u32>,
    /// Name of the published stream.
    pub stream: String,
}

pub struct ScanEngine<'c, 'a> {
    ctx: &'c mut EngineContext<'a>,
}

impl<'c, 'a> ScanEngine<'c, 'a> {
    pub fn new(ctx: &'c mut EngineContext<'a>) -> Self {
        ScanEngine { ctx }
    }

    /// Measurement calls [`Self::sweep`] makes for `request`.
    pub fn expected_measurements(&self, request: &SweepRequest) -> u64 {
        request.values.len() as u64 * self.ctx.measurements_per_round()
    }

    /// Step `request.register` through `request.values` on every chip.
    ///
    /// After step `i`, the series of each chip in `out` holds `i + 1`
    /// entries, the last one extracted from the response to `values[i]`.
    /// Any previous content of `out` is discarded. The partial series are
    /// published after every step, with the register value as header.
    pub fn sweep<T, F>(
        &mut self,
        request: &SweepRequest,
        mut extract: F,
        out: &mut DataContainer<Vec<T>>,
    ) -> Result<()>
    where
        T: Serialize,
        F: FnMut(&ChipResponse) -> T,
    {
        let SweepRequest {
            register,
            values,
            events_per_point,
            stream,
        } = request;
        if values.len() > self.ctx.settings.max_scan_steps {
            return Err(Error::InvalidRequest(format!(
                "{} steps exceed the limit of {}, subsample the values first",
                values.len(),
                self.ctx.settings.max_scan_steps
            )));
        }
        for value in values {
            register.check_value(*value)?;
        }
        out.check_congruent(&DataContainer::build(self.ctx.topology))?;
        let events = self.ctx.events_per_point(*events_per_point);
        out.for_each_leaf_mut(|_, series| {
            series.clear();
            series.reserve(values.len());
        });

        info!("Sweeping {} over {} values", register, values.len());
        let writer = self.ctx.writer();
        for (step, &value) in values.iter().enumerate() {
            writer.write_all(self.ctx.registers, self.ctx.topology, register, value)?;
            let response = self.ctx.measure(events)?;
            out.zip_mut_with(&response, |_, series, r| series.push(extract(r)))?;
            self.ctx.publisher.publish(out, stream, Some(f64::from(value)));
            diagnostic!("Sweep step {step}: {register} = {value}");
        }
        info!("Sweep of {register} done");
        self.ctx.report_chip_errors(register.name());
        Ok(())
    }
}

/// At most `cap` evenly spaced values from `start` to `stop` inclusive.
///
/// With `n = min(stop - start + 1, cap)` values, the spacing is
/// `(stop - start + 1) / n`. An empty list is returned when `stop < start`
/// or `cap` is zero.
pub fn capped_range(start: u32, stop: u32, cap: usize) -> Vec<u32> {
    if stop < start || cap == 0 {
        return vec![];
    }
    let span = u64::from(stop - start) + 1;
    let n = span.min(cap as u64);
    let step = span / n;
    (0..n).map(|i| start + (step * i) as u32).collect()
}

/// `start, start + step, ...` up to and including `stop`.
pub fn stepped(start: u32, stop: u32, step: u32) -> Result<Vec<u32>> {
    if step == 0 {
        return Err(Error::InvalidRequest("step must be positive".to_string()));
    }
    Ok((start..=stop).step_by(step as usize).collect())
}

/// Index of the first maximum of `series`. Unordered entries are skipped.
pub fn arg_max<T: PartialOrd>(series: &[T]) -> Option<usize> {
    let mut best: Option<(usize, &T)> = None;
    for (i, value) in series.iter().enumerate() {
        if value.partial_cmp(value).is_none() {
            continue;
        }
        match best {
            Some((_, max)) if value <= max => {}
            _ => best = Some((i, value)),
        }
    }
    best.map(|(i, _)| i)
}

/// Index of the first entry at or above `boundary`.
pub fn first_crossing<T: PartialOrd>(series: &[T], boundary: &T) -> Option<usize> {
    series.iter().position(|value| value >= boundary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::Observable;
    use crate::progress::ProgressCounter;
    use crate::publisher::ResultPublisher;
    use crate::settings::EngineSettings;
    use crate::simulation::{RecordingSink, SimulatedDetector};
    use channel_group::{ChannelGroup, ChannelGroupHandler};
    use detector_container::{ChipIndex, Topology};

    fn latency_detector(topology: &Topology) -> SimulatedDetector {
        // Each chip sees hits only at latency 100 + chip id.
        SimulatedDetector::new(topology.clone(), |chip, registers, channels| {
            let latency = registers.get("LATENCY_CONFIG").copied().unwrap_or(0);
            let occupancy = if latency == 100 + u32::from(chip.chip) {
                1.0
            } else {
                0.1 * f64::from(latency % 3)
            };
            ChipResponse::occupancy(occupancy, channels.number_of_enabled())
        })
    }

    fn run_sweep(
        topology: &Topology,
        detector: &SimulatedDetector,
        publisher: &mut ResultPublisher,
        request: &SweepRequest,
    ) -> DataContainer<Vec<f64>> {
        let handler = ChannelGroupHandler::single(ChannelGroup::new(4, 4));
        let mut registers = detector.registers();
        let mut measurement = detector.measurement();
        let progress = ProgressCounter::new();
        let settings = EngineSettings {
            report_chip_errors: false,
            ..Default::default()
        };
        let mut ctx = EngineContext::new(
            topology,
            &mut registers,
            &mut measurement,
            &handler,
            &progress,
            publisher,
            &settings,
        );
        let mut engine = ScanEngine::new(&mut ctx);
        progress.set_total(engine.expected_measurements(request));
        let mut out = DataContainer::with_payload(topology, vec![-1.0]);
        engine
            .sweep(
                request,
                |r| r.metric(Observable::Occupancy).unwrap_or(0.0),
                &mut out,
            )
            .unwrap();
        assert!(progress.is_complete());
        assert_eq!(progress.current(), progress.total());
        out
    }

    fn latency_request() -> SweepRequest {
        SweepRequest {
            register: Register::new("LATENCY_CONFIG", 9).unwrap(),
            values: (96..=104).collect(),
            events_per_point: Some(10),
            stream: "Occ".to_string(),
        }
    }

    #[test]
    fn test_sweep_fidelity() {
        let topology = Topology::uniform(1, 1, 2, 3);
        let detector = latency_detector(&topology);
        let request = latency_request();
        let out = run_sweep(
            &topology,
            &detector,
            &mut ResultPublisher::disabled(),
            &request,
        );
        for (key, series) in out.leaves() {
            assert_eq!(series.len(), request.values.len());
            for (value, occupancy) in request.values.iter().zip(series) {
                let expected = if *value == 100 + u32::from(key.address.chip) {
                    1.0
                } else {
                    0.1 * f64::from(value % 3)
                };
                assert_eq!(*occupancy, expected);
            }
            assert_eq!(arg_max(series), Some(4 + key.index.chip));
        }
        assert_eq!(detector.measurement_count(), 9);
        assert_eq!(detector.last_events(), Some(10));
    }

    #[test]
    fn test_sweep_uses_configured_events() {
        let topology = Topology::uniform(1, 1, 1, 1);
        let detector = latency_detector(&topology);
        let request = SweepRequest {
            events_per_point: None,
            ..latency_request()
        };
        run_sweep(
            &topology,
            &detector,
            &mut ResultPublisher::disabled(),
            &request,
        );
        assert_eq!(
            detector.last_events(),
            Some(EngineSettings::default().events_per_point)
        );
    }

    #[test]
    fn test_sweep_publishes_every_step() {
        let topology = Topology::uniform(2, 1, 1, 1);
        let detector = latency_detector(&topology);
        let request = latency_request();
        let sink = RecordingSink::default();
        let mut publisher = ResultPublisher::with_sink(sink.clone());
        let published = run_sweep(&topology, &detector, &mut publisher, &request);
        let frames = sink.frames();
        assert_eq!(frames.len(), 2 * request.values.len());
        assert_eq!(frames[0]["header"], 96.0);
        assert_eq!(frames[0]["chips"][0]["value"].as_array().unwrap().len(), 1);
        assert_eq!(frames[17]["header"], 104.0);
        assert_eq!(frames[17]["board"], 1);

        let silent = run_sweep(
            &topology,
            &latency_detector(&topology),
            &mut ResultPublisher::disabled(),
            &request,
        );
        assert_eq!(published, silent);
    }

    #[test]
    fn test_sweep_rejects_invalid_requests() {
        let topology = Topology::uniform(1, 1, 1, 1);
        let detector = latency_detector(&topology);
        let handler = ChannelGroupHandler::single(ChannelGroup::new(1, 1));
        let mut registers = detector.registers();
        let mut measurement = detector.measurement();
        let progress = ProgressCounter::new();
        let mut publisher = ResultPublisher::disabled();
        let settings = EngineSettings {
            max_scan_steps: 4,
            ..Default::default()
        };
        let mut ctx = EngineContext::new(
            &topology,
            &mut registers,
            &mut measurement,
            &handler,
            &progress,
            &mut publisher,
            &settings,
        );
        let mut engine = ScanEngine::new(&mut ctx);
        let mut out = DataContainer::with_payload(&topology, vec![]);
        let mut request = SweepRequest {
            register: Register::new("DAC", 4).unwrap(),
            values: vec![0, 1, 2, 3, 4],
            events_per_point: Some(1),
            stream: "Occ".to_string(),
        };
        assert!(matches!(
            engine.sweep(&request, |r| r.occupancy, &mut out),
            Err(Error::InvalidRequest(_))
        ));
        request.values = vec![3, 16];
        assert!(matches!(
            engine.sweep(&request, |r| r.occupancy, &mut out),
            Err(Error::ValueOutOfRange { value: 16, .. })
        ));
        let mut wrong_shape = DataContainer::with_payload(&Topology::uniform(1, 1, 1, 2), vec![]);
        request.values = vec![3];
        assert!(matches!(
            engine.sweep(&request, |r| r.occupancy, &mut wrong_shape),
            Err(Error::Container(_))
        ));
        assert_eq!(detector.measurement_count(), 0);
        engine.sweep(&request, |r| r.occupancy, &mut out).unwrap();
        assert_eq!(out.get(ChipIndex::new(0, 0, 0, 0)).unwrap().len(), 1);
    }

    #[test]
    fn test_capped_range() {
        assert_eq!(capped_range(0, 9, 100), (0..=9).collect::<Vec<_>>());
        assert_eq!(capped_range(0, 9, 5), vec![0, 2, 4, 6, 8]);
        assert_eq!(capped_range(10, 20, 3), vec![10, 13, 16]);
        assert_eq!(capped_range(0, 65535, 65536).len(), 65536);
        assert!(capped_range(5, 4, 10).is_empty());
    }

    #[test]
    fn test_stepped() {
        assert_eq!(stepped(0, 10, 5).unwrap(), vec![0, 5, 10]);
        assert_eq!(stepped(3, 10, 4).unwrap(), vec![3, 7]);
        assert!(stepped(0, 10, 0).is_err());
    }

    #[test]
    fn test_best_index_policies() {
        assert_eq!(arg_max(&[0.1, 0.7, 0.3, 0.7]), Some(1));
        assert_eq!(arg_max(&[f64::NAN, 0.2, 0.1]), Some(1));
        assert_eq!(arg_max::<f64>(&[]), None);
        assert_eq!(first_crossing(&[0.1, 0.5, 0.99, 1.0], &0.99), Some(2));
        assert_eq!(first_crossing(&[0.1, 0.5], &0.99), None);
    }
}
