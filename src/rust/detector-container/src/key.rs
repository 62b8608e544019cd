// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Display;

/// Position of a chip, as dense per-sibling indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChipIndex {
    pub board: usize,
    pub optical_group: usize,
    pub hybrid: usize,
    pub chip: usize,
}

impl ChipIndex {
    pub fn new(board: usize, optical_group: usize, hybrid: usize, chip: usize) -> Self {
        ChipIndex {
            board,
            optical_group,
            hybrid,
            chip,
        }
    }
}

/// Hardware identity of a chip, as the ids of the chip and its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChipAddress {
    pub board: u16,
    pub optical_group: u16,
    pub hybrid: u16,
    pub chip: u16,
}

impl ChipAddress {
    pub fn hybrid(&self) -> HybridAddress {
        HybridAddress {
            board: self.board,
            optical_group: self.optical_group,
            hybrid: self.hybrid,
        }
    }
}

impl Display for ChipAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.board, self.optical_group, self.hybrid, self.chip
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HybridAddress {
    pub board: u16,
    pub optical_group: u16,
    pub hybrid: u16,
}

impl HybridAddress {
    pub fn chip(&self, chip: u16) -> ChipAddress {
        ChipAddress {
            board: self.board,
            optical_group: self.optical_group,
            hybrid: self.hybrid,
            chip,
        }
    }
}

impl Display for HybridAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.board, self.optical_group, self.hybrid)
    }
}

/// Both views of a leaf, as yielded by leaf traversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipKey {
    pub index: ChipIndex,
    pub address: ChipAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HybridKey {
    pub board: usize,
    pub optical_group: usize,
    pub hybrid: usize,
    pub address: HybridAddress,
}
