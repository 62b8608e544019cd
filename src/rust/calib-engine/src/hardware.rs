// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Contracts towards the register transport and the measurement procedure.

use std::fmt::Display;

use channel_group::ChannelGroup;
use detector_container::{ChipAddress, DataContainer, HybridAddress};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Widest chip register.
pub const MAX_REGISTER_BITS: u8 = 16;

/// A named chip register of fixed width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Register {
    name: String,
    bits: u8,
}

impl Register {
    pub fn new(name: impl Into<String>, bits: u8) -> Result<Self> {
        let name = name.into();
        if bits == 0 || bits > MAX_REGISTER_BITS {
            return Err(Error::InvalidRegister {
                name,
                reason: format!("width must be within 1..={MAX_REGISTER_BITS} bits, got {bits}"),
            });
        }
        Ok(Register { name, bits })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn max_value(&self) -> u32 {
        (1 << self.bits) - 1
    }

    /// Number of representable values.
    pub fn range_len(&self) -> u32 {
        1 << self.bits
    }

    pub fn check_value(&self, value: u32) -> Result<()> {
        if value > self.max_value() {
            return Err(Error::ValueOutOfRange {
                register: self.name.clone(),
                value,
                bits: self.bits,
            });
        }
        Ok(())
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterCommand {
    pub chip: ChipAddress,
    pub register: String,
    pub value: u32,
}

/// Register writes to be sent to one hybrid in a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBuffer {
    commands: Vec<RegisterCommand>,
}

impl CommandBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: RegisterCommand) {
        self.commands.push(command);
    }

    pub fn append(&mut self, mut other: CommandBuffer) {
        self.commands.append(&mut other.commands);
    }

    pub fn commands(&self) -> &[RegisterCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl IntoIterator for CommandBuffer {
    type Item = RegisterCommand;
    type IntoIter = std::vec::IntoIter<RegisterCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

/// Blocking access to chip registers.
///
/// Write failures are reported through the return value; retrying is up to
/// the caller.
pub trait ChipRegisterInterface {
    fn write(&mut self, chip: &ChipAddress, register: &str, value: u32) -> bool;

    /// Write `value` to every chip of board `board`.
    fn write_broadcast(&mut self, board: u16, register: &str, value: u32) -> bool;

    fn supports_broadcast(&self) -> bool {
        false
    }

    fn pack(&self, chip: &ChipAddress, register: &str, value: u32) -> CommandBuffer {
        let mut buffer = CommandBuffer::new();
        buffer.push(RegisterCommand {
            chip: *chip,
            register: register.to_string(),
            value,
        });
        buffer
    }

    /// Send the packed commands of one hybrid.
    ///
    /// Transports without batching fall back to one write per command.
    fn send_packed(&mut self, _hybrid: &HybridAddress, commands: CommandBuffer) -> bool {
        commands
            .into_iter()
            .fold(true, |ok, c| self.write(&c.chip, &c.register, c.value) && ok)
    }

    fn read(&mut self, chip: &ChipAddress, register: &str) -> Result<u32>;
}

/// Observable derived from a chip response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Observable {
    #[default]
    Occupancy,
    PulseHeight,
}

impl Observable {
    pub fn name(&self) -> &'static str {
        match self {
            Observable::Occupancy => "occupancy",
            Observable::PulseHeight => "pulse_height",
        }
    }
}

/// Response of one chip to a stimulus burst, averaged over its enabled
/// channels.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChipResponse {
    pub occupancy: f64,
    pub pulse_height: f64,
    pub pulse_height_error: f64,
    pub enabled_channels: usize,
}

impl ChipResponse {
    pub fn occupancy(occupancy: f64, enabled_channels: usize) -> Self {
        ChipResponse {
            occupancy,
            enabled_channels,
            ..Default::default()
        }
    }

    pub fn metric(&self, observable: Observable) -> Option<f64> {
        if self.enabled_channels == 0 {
            return None;
        }
        let value = match observable {
            Observable::Occupancy => self.occupancy,
            Observable::PulseHeight => self.pulse_height,
        };
        value.is_finite().then_some(value)
    }

    pub fn observables(&self) -> IndexMap<&'static str, f64> {
        [Observable::Occupancy, Observable::PulseHeight]
            .into_iter()
            .filter_map(|o| self.metric(o).map(|v| (o.name(), v)))
            .collect()
    }

    /// Combine the responses of disjoint channel subsets of one chip.
    ///
    /// Occupancy is weighted by the number of enabled channels. Pulse height
    /// is weighted by inverse variance when every contribution carries an
    /// error, by channel count otherwise.
    pub fn average(responses: &[ChipResponse]) -> ChipResponse {
        let contributing: Vec<_> = responses
            .iter()
            .filter(|r| r.enabled_channels > 0)
            .collect();
        let enabled_channels: usize = contributing.iter().map(|r| r.enabled_channels).sum();
        if enabled_channels == 0 {
            return ChipResponse::default();
        }
        let channels = enabled_channels as f64;
        let occupancy = contributing
            .iter()
            .map(|r| r.occupancy * r.enabled_channels as f64)
            .sum::<f64>()
            / channels;
        let with_errors = contributing
            .iter()
            .all(|r| r.pulse_height_error.is_finite() && r.pulse_height_error > 0.0);
        let (pulse_height, pulse_height_error) = if with_errors {
            let weights: f64 = contributing
                .iter()
                .map(|r| 1.0 / r.pulse_height_error.powi(2))
                .sum();
            let mean = contributing
                .iter()
                .map(|r| r.pulse_height / r.pulse_height_error.powi(2))
                .sum::<f64>()
                / weights;
            (mean, (1.0 / weights).sqrt())
        } else {
            let mean = contributing
                .iter()
                .map(|r| r.pulse_height * r.enabled_channels as f64)
                .sum::<f64>()
                / channels;
            (mean, 0.0)
        };
        ChipResponse {
            occupancy,
            pulse_height,
            pulse_height_error,
            enabled_channels,
        }
    }
}

/// Stimulus and readout of the whole detector.
pub trait Measurement {
    /// Inject `events` pulses into `channels` of every chip and return the
    /// response of each chip.
    fn run(
        &mut self,
        channels: &ChannelGroup,
        events: u32,
    ) -> Result<DataContainer<ChipResponse>>;
}
