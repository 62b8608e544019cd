// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Register writes with an explicit failure policy.

use std::thread;
use std::time::Duration;

use calib_log::{diagnostic, warn};
use detector_container::{ChipAddress, DataContainer, Topology};
use serde::{Deserialize, Serialize};

use crate::hardware::{ChipRegisterInterface, CommandBuffer, Register};
use crate::{Error, Result};

/// What to do when the transport reports a failed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteRetryPolicy {
    /// Log the failure and continue.
    Ignore,
    /// Repeat the write, sleeping `backoff_us` between attempts, and fail
    /// with [`Error::RegisterWriteFailed`] after `max_attempts`.
    Retry { max_attempts: u32, backoff_us: u64 },
}

impl Default for WriteRetryPolicy {
    fn default() -> Self {
        WriteRetryPolicy::Retry {
            max_attempts: 40,
            backoff_us: 100,
        }
    }
}

/// How per-chip values reach the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WriteMode {
    /// One write per chip.
    PerChip,
    /// One packed transaction per hybrid.
    #[default]
    Packed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterWriter {
    policy: WriteRetryPolicy,
    mode: WriteMode,
}

impl RegisterWriter {
    pub fn new(policy: WriteRetryPolicy, mode: WriteMode) -> Self {
        RegisterWriter { policy, mode }
    }

    pub fn policy(&self) -> WriteRetryPolicy {
        self.policy
    }

    /// Write the same value to every chip.
    ///
    /// Uses one broadcast per board when the transport supports it.
    pub fn write_all(
        &self,
        registers: &mut dyn ChipRegisterInterface,
        topology: &Topology,
        register: &Register,
        value: u32,
    ) -> Result<()> {
        register.check_value(value)?;
        if registers.supports_broadcast() {
            for board in topology.boards() {
                self.attempt(&format!("board {}", board.id), register, value, || {
                    registers.write_broadcast(board.id, register.name(), value)
                })?;
            }
        } else {
            for chip in topology.chips() {
                self.write_one(registers, &chip.address, register, value)?;
            }
        }
        Ok(())
    }

    pub fn write_one(
        &self,
        registers: &mut dyn ChipRegisterInterface,
        chip: &ChipAddress,
        register: &Register,
        value: u32,
    ) -> Result<()> {
        register.check_value(value)?;
        self.attempt(&format!("chip {chip}"), register, value, || {
            registers.write(chip, register.name(), value)
        })
    }

    /// Write per-chip values. Chips holding `None` are left untouched.
    pub fn write_each(
        &self,
        registers: &mut dyn ChipRegisterInterface,
        register: &Register,
        values: &DataContainer<Option<u32>>,
    ) -> Result<()> {
        for (_, value) in values.leaves() {
            if let Some(value) = value {
                register.check_value(*value)?;
            }
        }
        match self.mode {
            WriteMode::PerChip => {
                for (key, value) in values.leaves() {
                    if let Some(value) = value {
                        self.write_one(registers, &key.address, register, *value)?;
                    }
                }
            }
            WriteMode::Packed => {
                for (key, hybrid) in values.hybrids() {
                    let mut buffer = CommandBuffer::new();
                    for chip in hybrid.chips() {
                        if let Some(value) = chip.value() {
                            let address = key.address.chip(chip.id());
                            buffer.append(registers.pack(&address, register.name(), *value));
                        }
                    }
                    let Some(first) = buffer.commands().first() else {
                        continue;
                    };
                    let target = format!("hybrid {}", key.address);
                    diagnostic!(
                        "Sending {} packed writes of {register} to {target}",
                        buffer.len()
                    );
                    // The packed transaction carries several values; report the
                    // first one on failure.
                    let value = first.value;
                    self.attempt(&target, register, value, || {
                        registers.send_packed(&key.address, buffer.clone())
                    })?;
                }
            }
        }
        Ok(())
    }

    fn attempt(
        &self,
        target: &str,
        register: &Register,
        value: u32,
        mut write: impl FnMut() -> bool,
    ) -> Result<()> {
        match self.policy {
            WriteRetryPolicy::Ignore => {
                if !write() {
                    warn!("Write of {register} = {value} to {target} failed, continuing");
                }
                Ok(())
            }
            WriteRetryPolicy::Retry {
                max_attempts,
                backoff_us,
            } => {
                let max_attempts = max_attempts.max(1);
                for attempt in 1..=max_attempts {
                    if write() {
                        return Ok(());
                    }
                    diagnostic!(
                        "Write of {register} to {target} failed (attempt {attempt}/{max_attempts})"
                    );
                    if attempt < max_attempts {
                        thread::sleep(Duration::from_micros(backoff_us));
                    }
                }
                Err(Error::RegisterWriteFailed {
                    target: target.to_string(),
                    register: register.name().to_string(),
                    value,
                    attempts: max_attempts,
                })
            }
        }
    }
}
