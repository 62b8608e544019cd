// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use channel_group::ChannelGroupHandler;
use detector_container::Topology;

use crate::hardware::{ChipRegisterInterface, Measurement};
use crate::progress::ProgressCounter;
use crate::publisher::ResultPublisher;
use crate::settings::EngineSettings;
use crate::writer::RegisterWriter;

/// Everything an engine stage needs, borrowed from the calibration.
///
/// The context is the only channel through which stages share state: the
/// progress counter and the publisher are passed in explicitly rather than
/// living in globals.
pub struct EngineContext<'a> {
    pub topology: &'a Topology,
    pub registers: &'a mut dyn ChipRegisterInterface,
    pub measurement: &'a mut dyn Measurement,
    pub channel_groups: &'a ChannelGroupHandler,
    pub progress: &'a ProgressCounter,
    pub publisher: &'a mut ResultPublisher,
    pub settings: &'a EngineSettings,
}

impl<'a> EngineContext<'a> {
    pub fn new(
        topology: &'a Topology,
        registers: &'a mut dyn ChipRegisterInterface,
        measurement: &'a mut dyn Measurement,
        channel_groups: &'a ChannelGroupHandler,
        progress: &'a ProgressCounter,
        publisher: &'a mut ResultPublisher,
        settings: &'a EngineSettings,
    ) -> Self {
        EngineContext {
            topology,
            registers,
            measurement,
            channel_groups,
            progress,
            publisher,
            settings,
        }
    }

    /// Events per measurement, falling back to the configured default.
    pub fn events_per_point(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.settings.events_per_point)
    }

    pub fn writer(&self) -> RegisterWriter {
        self.settings.writer()
    }

    /// Measurement calls per round, one per test group.
    pub fn measurements_per_round(&self) -> u64 {
        self.channel_groups.number_of_groups() as u64
    }
}
