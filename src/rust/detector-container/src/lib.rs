// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Detector hierarchy (board → optical group → hybrid → chip) and a
//! payload-generic container that mirrors it.

mod container;
mod key;
mod topology;

pub use container::{BoardData, ChipData, DataContainer, HybridData, OpticalGroupData};
pub use key::{ChipAddress, ChipIndex, ChipKey, HybridAddress, HybridKey};
pub use topology::{
    BoardDescription, ChipDescription, HybridDescription, OpticalGroupDescription, Topology,
};

use std::fmt::Display;

/// Level of the detector hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Board,
    OpticalGroup,
    Hybrid,
    Chip,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Level::Board => "board",
            Level::OpticalGroup => "optical group",
            Level::Hybrid => "hybrid",
            Level::Chip => "chip",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{level} index {index} out of bounds (number of {level}s: {len})")]
    IndexOutOfBounds {
        level: Level,
        index: usize,
        len: usize,
    },
    #[error("Duplicate {level} id {id}")]
    DuplicateId { level: Level, id: u16 },
    #[error("Containers differ in {level} structure at {path}")]
    Incongruent { level: Level, path: String },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
