// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use calib_engine::EngineContext;
use calib_engine::bisection::{BisectionEngine, BisectionRequest, Comparator, TieBreak};
use calib_engine::hardware::{ChipResponse, Observable, Register};
use calib_engine::progress::ProgressCounter;
use calib_engine::publisher::ResultPublisher;
use calib_engine::settings::EngineSettings;
use calib_engine::simulation::SimulatedDetector;
use calib_engine::writer::WriteMode;
use channel_group::{ChannelGroup, ChannelGroupHandler};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use detector_container::Topology;
use std::hint::black_box;

fn detector(topology: &Topology) -> SimulatedDetector {
    SimulatedDetector::new(topology.clone(), |chip, registers, channels| {
        let value = registers.get("Vthreshold_LIN").copied().unwrap_or(0);
        let crossing = 200 + 7 * u32::from(chip.chip) + 3 * u32::from(chip.hybrid);
        let occupancy = if value >= crossing { 1.0 } else { 0.0 };
        ChipResponse::occupancy(occupancy, channels.number_of_enabled())
    })
}

fn bench_search(c: &mut Criterion) {
    let request = BisectionRequest {
        register: Register::new("Vthreshold_LIN", 10).unwrap(),
        events_per_point: None,
        target: 0.5,
        lo: 0,
        hi_exclusive: 1024,
        comparator: Comparator::Rising,
        tie_break: TieBreak::LastWins,
        observable: Observable::Occupancy,
        stream: "Occ".to_string(),
    };
    let handler = ChannelGroupHandler::single(ChannelGroup::new(8, 8));

    let mut group = c.benchmark_group("bisection");
    for (mode, name) in [(WriteMode::PerChip, "per_chip"), (WriteMode::Packed, "packed")] {
        let settings = EngineSettings {
            write_mode: mode,
            report_chip_errors: false,
            ..Default::default()
        };
        for hybrids in [1u16, 4, 16] {
            let topology = Topology::uniform(1, 2, hybrids, 4);
            group.bench_with_input(BenchmarkId::new(name, hybrids), &hybrids, |b, _| {
                b.iter(|| {
                    let detector = detector(&topology);
                    let mut registers = detector.registers();
                    let mut measurement = detector.measurement();
                    let progress = ProgressCounter::new();
                    let mut publisher = ResultPublisher::disabled();
                    let mut ctx = EngineContext::new(
                        &topology,
                        &mut registers,
                        &mut measurement,
                        &handler,
                        &progress,
                        &mut publisher,
                        &settings,
                    );
                    let outcome = BisectionEngine::new(&mut ctx).search(&request).unwrap();
                    black_box(outcome.best_values);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_search);
criterion_main!(benches);
