// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{ChipAddress, ChipIndex, ChipKey, Error, Level, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipDescription {
    pub id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridDescription {
    pub id: u16,
    pub chips: Vec<ChipDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpticalGroupDescription {
    pub id: u16,
    pub hybrids: Vec<HybridDescription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDescription {
    pub id: u16,
    pub optical_groups: Vec<OpticalGroupDescription>,
}

#[derive(Deserialize)]
struct TopologyDescription {
    boards: Vec<BoardDescription>,
}

/// Fixed hierarchy of the detector under calibration.
///
/// Sibling order defines the dense `index` of every node, the `id` is the
/// hardware address and must be unique among siblings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topology {
    boards: Vec<BoardDescription>,
}

impl Topology {
    pub fn new(boards: Vec<BoardDescription>) -> Result<Self> {
        check_unique(Level::Board, boards.iter().map(|b| b.id))?;
        for board in &boards {
            check_unique(Level::OpticalGroup, board.optical_groups.iter().map(|o| o.id))?;
            for og in &board.optical_groups {
                check_unique(Level::Hybrid, og.hybrids.iter().map(|h| h.id))?;
                for hybrid in &og.hybrids {
                    check_unique(Level::Chip, hybrid.chips.iter().map(|c| c.id))?;
                }
            }
        }
        Ok(Topology { boards })
    }

    /// Parse a `{"boards": [{"id": .., "optical_groups": [..]}]}` description.
    pub fn from_json(json: &str) -> Result<Self> {
        let description: TopologyDescription =
            serde_json::from_str(json).map_err(anyhow::Error::from)?;
        Topology::new(description.boards)
    }

    /// Topology with the same fan-out at every node and ids equal to indices.
    pub fn uniform(boards: u16, optical_groups: u16, hybrids: u16, chips: u16) -> Self {
        let boards = (0..boards)
            .map(|id| BoardDescription {
                id,
                optical_groups: (0..optical_groups)
                    .map(|id| OpticalGroupDescription {
                        id,
                        hybrids: (0..hybrids)
                            .map(|id| HybridDescription {
                                id,
                                chips: (0..chips).map(|id| ChipDescription { id }).collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        Topology { boards }
    }

    pub fn boards(&self) -> &[BoardDescription] {
        &self.boards
    }

    pub fn number_of_chips(&self) -> usize {
        self.chips().count()
    }

    /// All chips, depth-first in index order.
    pub fn chips(&self) -> impl Iterator<Item = ChipKey> {
        self.boards.iter().enumerate().flat_map(|(b, board)| {
            board
                .optical_groups
                .iter()
                .enumerate()
                .flat_map(move |(o, og)| {
                    og.hybrids.iter().enumerate().flat_map(move |(h, hybrid)| {
                        hybrid.chips.iter().enumerate().map(move |(c, chip)| ChipKey {
                            index: ChipIndex::new(b, o, h, c),
                            address: ChipAddress {
                                board: board.id,
                                optical_group: og.id,
                                hybrid: hybrid.id,
                                chip: chip.id,
                            },
                        })
                    })
                })
        })
    }
}

fn check_unique(level: Level, ids: impl Iterator<Item = u16>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(Error::DuplicateId { level, id });
        }
    }
    Ok(())
}
