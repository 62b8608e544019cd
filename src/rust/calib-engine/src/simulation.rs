// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! In-memory detector for dry runs and tests.
//!
//! A [`SimulatedDetector`] keeps a register file per chip and answers
//! measurements from a user supplied response model. The register and
//! measurement capabilities are handed out as separate handles sharing the
//! detector state, so both can be borrowed by one [`crate::EngineContext`].

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use channel_group::ChannelGroup;
use detector_container::{ChipAddress, DataContainer, HybridAddress, Topology};
use indexmap::IndexMap;

use crate::hardware::{
    ChipRegisterInterface, ChipResponse, CommandBuffer, Measurement, RegisterCommand,
};
use crate::publisher::{PublishError, PublishSink};
use crate::{Error, Result};

/// Register values of one chip, by register name.
pub type ChipRegisters = IndexMap<String, u32>;

type ResponseModel = Box<dyn FnMut(&ChipAddress, &ChipRegisters, &ChannelGroup) -> ChipResponse>;

struct SimState {
    topology: Topology,
    registers: HashMap<ChipAddress, ChipRegisters>,
    model: ResponseModel,
    failing_writes: usize,
    broadcast: bool,
    measurements: usize,
    last_events: Option<u32>,
    broadcasts: usize,
    packed_sends: usize,
    write_log: Vec<RegisterCommand>,
}

impl SimState {
    fn take_failure(&mut self) -> bool {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return true;
        }
        false
    }

    fn set(&mut self, chip: &ChipAddress, register: &str, value: u32) {
        self.registers
            .entry(*chip)
            .or_default()
            .insert(register.to_string(), value);
    }

    fn apply(&mut self, command: RegisterCommand) {
        self.set(&command.chip, &command.register, command.value);
        self.write_log.push(command);
    }
}

pub struct SimulatedDetector {
    state: Rc<RefCell<SimState>>,
}

impl SimulatedDetector {
    /// Detector whose chips respond according to `model`.
    ///
    /// The model is called once per chip and measurement with the chip's
    /// current register values and the stimulated channels.
    pub fn new<F>(topology: Topology, model: F) -> Self
    where
        F: FnMut(&ChipAddress, &ChipRegisters, &ChannelGroup) -> ChipResponse + 'static,
    {
        let state = SimState {
            topology,
            registers: HashMap::new(),
            model: Box::new(model),
            failing_writes: 0,
            broadcast: false,
            measurements: 0,
            last_events: None,
            broadcasts: 0,
            packed_sends: 0,
            write_log: vec![],
        };
        SimulatedDetector {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn registers(&self) -> SimRegisters {
        SimRegisters {
            state: Rc::clone(&self.state),
        }
    }

    pub fn measurement(&self) -> SimMeasurement {
        SimMeasurement {
            state: Rc::clone(&self.state),
        }
    }

    pub fn register_value(&self, chip: &ChipAddress, register: &str) -> Option<u32> {
        self.state
            .borrow()
            .registers
            .get(chip)
            .and_then(|r| r.get(register).copied())
    }

    /// Set a register without going through the transport.
    pub fn set_register(&self, chip: &ChipAddress, register: &str, value: u32) {
        self.state.borrow_mut().set(chip, register, value);
    }

    /// Make the next `n` write transactions fail.
    pub fn fail_next_writes(&self, n: usize) {
        self.state.borrow_mut().failing_writes = n;
    }

    pub fn set_broadcast_support(&self, enabled: bool) {
        self.state.borrow_mut().broadcast = enabled;
    }

    pub fn measurement_count(&self) -> usize {
        self.state.borrow().measurements
    }

    /// Events requested by the latest measurement.
    pub fn last_events(&self) -> Option<u32> {
        self.state.borrow().last_events
    }

    pub fn broadcast_count(&self) -> usize {
        self.state.borrow().broadcasts
    }

    pub fn packed_send_count(&self) -> usize {
        self.state.borrow().packed_sends
    }

    /// Successful per-chip writes, including those of packed transactions.
    pub fn write_log(&self) -> Vec<RegisterCommand> {
        self.state.borrow().write_log.clone()
    }
}

/// Register access handle of a [`SimulatedDetector`].
pub struct SimRegisters {
    state: Rc<RefCell<SimState>>,
}

impl ChipRegisterInterface for SimRegisters {
    fn write(&mut self, chip: &ChipAddress, register: &str, value: u32) -> bool {
        let mut state = self.state.borrow_mut();
        if state.take_failure() {
            return false;
        }
        state.apply(RegisterCommand {
            chip: *chip,
            register: register.to_string(),
            value,
        });
        true
    }

    fn write_broadcast(&mut self, board: u16, register: &str, value: u32) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.broadcast || state.take_failure() {
            return false;
        }
        let chips: Vec<_> = state
            .topology
            .chips()
            .filter(|key| key.address.board == board)
            .map(|key| key.address)
            .collect();
        for chip in chips {
            state.set(&chip, register, value);
        }
        state.broadcasts += 1;
        true
    }

    fn supports_broadcast(&self) -> bool {
        self.state.borrow().broadcast
    }

    fn send_packed(&mut self, _hybrid: &HybridAddress, commands: CommandBuffer) -> bool {
        let mut state = self.state.borrow_mut();
        if state.take_failure() {
            return false;
        }
        for command in commands {
            state.apply(command);
        }
        state.packed_sends += 1;
        true
    }

    fn read(&mut self, chip: &ChipAddress, register: &str) -> Result<u32> {
        self.state
            .borrow()
            .registers
            .get(chip)
            .and_then(|r| r.get(register).copied())
            .ok_or_else(|| Error::new(format!("Register {register} of chip {chip} was never set")))
    }
}

/// Measurement handle of a [`SimulatedDetector`].
pub struct SimMeasurement {
    state: Rc<RefCell<SimState>>,
}

impl Measurement for SimMeasurement {
    fn run(&mut self, channels: &ChannelGroup, events: u32) -> Result<DataContainer<ChipResponse>> {
        let mut state = self.state.borrow_mut();
        state.measurements += 1;
        state.last_events = Some(events);
        let SimState {
            topology,
            registers,
            model,
            ..
        } = &mut *state;
        let unset = ChipRegisters::new();
        Ok(DataContainer::from_fn(topology, |key| {
            let chip_registers = registers.get(&key.address).unwrap_or(&unset);
            model(&key.address, chip_registers, channels)
        }))
    }
}

/// Publish sink keeping every frame in memory.
#[derive(Clone, Default)]
pub struct RecordingSink {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingSink {
    /// Recorded frames, decoded.
    pub fn frames(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .map(|frames| {
                frames
                    .iter()
                    .filter_map(|frame| serde_json::from_slice(frame).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl PublishSink for RecordingSink {
    fn send(&mut self, frame: Vec<u8>) -> Result<(), PublishError> {
        self.frames
            .lock()
            .map_err(|_| PublishError::Disconnected)?
            .push(frame);
        Ok(())
    }
}
