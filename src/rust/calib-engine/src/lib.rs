// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Register calibration engines.
//!
//! A calibration drives chip registers through an [`EngineContext`] with one
//! of two control loops: a linear sweep ([`scan::ScanEngine`]) or a per-chip
//! binary search ([`bisection::BisectionEngine`]). Both write registers
//! through a [`hardware::ChipRegisterInterface`], take feedback from a
//! [`hardware::Measurement`], account for their work in a
//! [`progress::ProgressCounter`] and stream snapshots through a
//! [`publisher::ResultPublisher`].

pub mod bisection;
pub mod context;
pub mod hardware;
mod measure;
pub mod progress;
pub mod publisher;
pub mod report;
pub mod scan;
pub mod settings;
pub mod simulation;
pub mod writer;

pub use context::EngineContext;

use std::fmt::Display;

use detector_container::ChipAddress;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Container(#[from] detector_container::Error),
    #[error(transparent)]
    ChannelGroup(#[from] channel_group::Error),
    #[error("Failed to write {register} = {value} to {target} after {attempts} attempt(s)")]
    RegisterWriteFailed {
        target: String,
        register: String,
        value: u32,
        attempts: u32,
    },
    #[error("No best value found for chip {chip}")]
    UndefinedBestValue { chip: ChipAddress },
    #[error("Value {value} does not fit into {bits} bit register {register}")]
    ValueOutOfRange {
        register: String,
        value: u32,
        bits: u8,
    },
    #[error("Invalid register {name}: {reason}")]
    InvalidRegister { name: String, reason: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new<T: Display>(msg: T) -> Self {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
