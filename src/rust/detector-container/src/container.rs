// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::{
    ChipAddress, ChipIndex, ChipKey, Error, HybridAddress, HybridKey, Level, Result, Topology,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ChipData<T> {
    id: u16,
    value: T,
}

impl<T> ChipData<T> {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HybridData<T> {
    id: u16,
    summary: Option<T>,
    chips: Vec<ChipData<T>>,
}

impl<T> HybridData<T> {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn summary(&self) -> Option<&T> {
        self.summary.as_ref()
    }

    pub fn set_summary(&mut self, summary: T) {
        self.summary = Some(summary);
    }

    pub fn chips(&self) -> &[ChipData<T>] {
        &self.chips
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpticalGroupData<T> {
    id: u16,
    summary: Option<T>,
    hybrids: Vec<HybridData<T>>,
}

impl<T> OpticalGroupData<T> {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn summary(&self) -> Option<&T> {
        self.summary.as_ref()
    }

    pub fn set_summary(&mut self, summary: T) {
        self.summary = Some(summary);
    }

    pub fn hybrids(&self) -> &[HybridData<T>] {
        &self.hybrids
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardData<T> {
    id: u16,
    summary: Option<T>,
    optical_groups: Vec<OpticalGroupData<T>>,
}

impl<T> BoardData<T> {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn summary(&self) -> Option<&T> {
        self.summary.as_ref()
    }

    pub fn set_summary(&mut self, summary: T) {
        self.summary = Some(summary);
    }

    pub fn optical_groups(&self) -> &[OpticalGroupData<T>] {
        &self.optical_groups
    }

    /// Chips of this board, depth-first in index order.
    pub fn chips(&self) -> impl Iterator<Item = (ChipAddress, &T)> {
        let board_id = self.id;
        self.optical_groups.iter().flat_map(move |og| {
            og.hybrids.iter().flat_map(move |hybrid| {
                hybrid.chips.iter().map(move |chip| {
                    let address = ChipAddress {
                        board: board_id,
                        optical_group: og.id,
                        hybrid: hybrid.id,
                        chip: chip.id,
                    };
                    (address, &chip.value)
                })
            })
        })
    }
}

/// Tree with the shape of a [`Topology`] holding one `T` per chip and an
/// optional summary `T` per board, optical group and hybrid.
///
/// All containers built from the same topology are structurally congruent, so
/// their leaf traversals visit the same chips in the same order.
#[derive(Debug, Clone, PartialEq)]
pub struct DataContainer<T> {
    boards: Vec<BoardData<T>>,
}

impl DataContainer<()> {
    /// Structure-only container.
    pub fn build(topology: &Topology) -> Self {
        DataContainer::from_fn(topology, |_| ())
    }
}

impl<T> DataContainer<T> {
    pub fn with_payload(topology: &Topology, init: T) -> Self
    where
        T: Clone,
    {
        DataContainer::from_fn(topology, |_| init.clone())
    }

    pub fn from_fn<F>(topology: &Topology, mut init: F) -> Self
    where
        F: FnMut(ChipKey) -> T,
    {
        let mut chips = topology.chips();
        let boards = topology
            .boards()
            .iter()
            .map(|board| BoardData {
                id: board.id,
                summary: None,
                optical_groups: board
                    .optical_groups
                    .iter()
                    .map(|og| OpticalGroupData {
                        id: og.id,
                        summary: None,
                        hybrids: og
                            .hybrids
                            .iter()
                            .map(|hybrid| HybridData {
                                id: hybrid.id,
                                summary: None,
                                chips: hybrid
                                    .chips
                                    .iter()
                                    .zip(chips.by_ref())
                                    .map(|(chip, key)| ChipData {
                                        id: chip.id,
                                        value: init(key),
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        DataContainer { boards }
    }

    pub fn boards(&self) -> &[BoardData<T>] {
        &self.boards
    }

    pub fn board(&self, index: usize) -> Result<&BoardData<T>> {
        child(&self.boards, Level::Board, index)
    }

    pub fn board_mut(&mut self, index: usize) -> Result<&mut BoardData<T>> {
        child_mut(&mut self.boards, Level::Board, index)
    }

    pub fn number_of_chips(&self) -> usize {
        self.leaves().count()
    }

    /// Payload of the chip at the given indices.
    pub fn at(
        &mut self,
        board: usize,
        optical_group: usize,
        hybrid: usize,
        chip: usize,
    ) -> Result<&mut T> {
        self.get_mut(ChipIndex::new(board, optical_group, hybrid, chip))
    }

    pub fn get(&self, index: ChipIndex) -> Result<&T> {
        let board = child(&self.boards, Level::Board, index.board)?;
        let og = child(&board.optical_groups, Level::OpticalGroup, index.optical_group)?;
        let hybrid = child(&og.hybrids, Level::Hybrid, index.hybrid)?;
        let chip = child(&hybrid.chips, Level::Chip, index.chip)?;
        Ok(&chip.value)
    }

    pub fn get_mut(&mut self, index: ChipIndex) -> Result<&mut T> {
        let board = child_mut(&mut self.boards, Level::Board, index.board)?;
        let og = child_mut(
            &mut board.optical_groups,
            Level::OpticalGroup,
            index.optical_group,
        )?;
        let hybrid = child_mut(&mut og.hybrids, Level::Hybrid, index.hybrid)?;
        let chip = child_mut(&mut hybrid.chips, Level::Chip, index.chip)?;
        Ok(&mut chip.value)
    }

    /// Leaves, depth-first in index order.
    pub fn leaves(&self) -> impl Iterator<Item = (ChipKey, &T)> {
        self.boards.iter().enumerate().flat_map(|(b, board)| {
            board
                .optical_groups
                .iter()
                .enumerate()
                .flat_map(move |(o, og)| {
                    og.hybrids.iter().enumerate().flat_map(move |(h, hybrid)| {
                        hybrid.chips.iter().enumerate().map(move |(c, chip)| {
                            let key = ChipKey {
                                index: ChipIndex::new(b, o, h, c),
                                address: ChipAddress {
                                    board: board.id,
                                    optical_group: og.id,
                                    hybrid: hybrid.id,
                                    chip: chip.id,
                                },
                            };
                            (key, &chip.value)
                        })
                    })
                })
        })
    }

    pub fn leaves_mut(&mut self) -> impl Iterator<Item = (ChipKey, &mut T)> {
        self.boards.iter_mut().enumerate().flat_map(|(b, board)| {
            let board_id = board.id;
            board
                .optical_groups
                .iter_mut()
                .enumerate()
                .flat_map(move |(o, og)| {
                    let og_id = og.id;
                    og.hybrids
                        .iter_mut()
                        .enumerate()
                        .flat_map(move |(h, hybrid)| {
                            let hybrid_id = hybrid.id;
                            hybrid.chips.iter_mut().enumerate().map(move |(c, chip)| {
                                let ChipData { id, value } = chip;
                                let key = ChipKey {
                                    index: ChipIndex::new(b, o, h, c),
                                    address: ChipAddress {
                                        board: board_id,
                                        optical_group: og_id,
                                        hybrid: hybrid_id,
                                        chip: *id,
                                    },
                                };
                                (key, value)
                            })
                        })
                })
        })
    }

    pub fn for_each_leaf<F>(&self, mut f: F)
    where
        F: FnMut(ChipKey, &T),
    {
        self.leaves().for_each(|(key, value)| f(key, value));
    }

    pub fn for_each_leaf_mut<F>(&mut self, mut f: F)
    where
        F: FnMut(ChipKey, &mut T),
    {
        self.leaves_mut().for_each(|(key, value)| f(key, value));
    }

    /// Hybrids, depth-first in index order.
    pub fn hybrids(&self) -> impl Iterator<Item = (HybridKey, &HybridData<T>)> {
        self.boards.iter().enumerate().flat_map(|(b, board)| {
            board
                .optical_groups
                .iter()
                .enumerate()
                .flat_map(move |(o, og)| {
                    og.hybrids.iter().enumerate().map(move |(h, hybrid)| {
                        let key = HybridKey {
                            board: b,
                            optical_group: o,
                            hybrid: h,
                            address: HybridAddress {
                                board: board.id,
                                optical_group: og.id,
                                hybrid: hybrid.id,
                            },
                        };
                        (key, hybrid)
                    })
                })
        })
    }

    /// Congruent container with leaf payloads mapped by `f`.
    ///
    /// Summaries are not carried over.
    pub fn map<U, F>(&self, mut f: F) -> DataContainer<U>
    where
        F: FnMut(ChipKey, &T) -> U,
    {
        let mut leaves = self.leaves();
        let boards = self
            .boards
            .iter()
            .map(|board| BoardData {
                id: board.id,
                summary: None,
                optical_groups: board
                    .optical_groups
                    .iter()
                    .map(|og| OpticalGroupData {
                        id: og.id,
                        summary: None,
                        hybrids: og
                            .hybrids
                            .iter()
                            .map(|hybrid| HybridData {
                                id: hybrid.id,
                                summary: None,
                                chips: hybrid
                                    .chips
                                    .iter()
                                    .zip(leaves.by_ref())
                                    .map(|(chip, (key, value))| ChipData {
                                        id: chip.id,
                                        value: f(key, value),
                                    })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        DataContainer { boards }
    }

    /// Visit leaf pairs of two congruent containers.
    pub fn zip_mut_with<U, F>(&mut self, other: &DataContainer<U>, mut f: F) -> Result<()>
    where
        F: FnMut(ChipKey, &mut T, &U),
    {
        self.check_congruent(other)?;
        for ((key, value), (_, other_value)) in self.leaves_mut().zip(other.leaves()) {
            f(key, value, other_value);
        }
        Ok(())
    }

    pub fn is_congruent_with<U>(&self, other: &DataContainer<U>) -> bool {
        self.check_congruent(other).is_ok()
    }

    pub fn check_congruent<U>(&self, other: &DataContainer<U>) -> Result<()> {
        let incongruent = |level, path: String| Error::Incongruent { level, path };
        if !same_ids(&self.boards, &other.boards, |b| b.id, |b| b.id) {
            return Err(incongruent(Level::Board, String::from("/")));
        }
        for (board, other_board) in self.boards.iter().zip(&other.boards) {
            if !same_ids(
                &board.optical_groups,
                &other_board.optical_groups,
                |o| o.id,
                |o| o.id,
            ) {
                return Err(incongruent(Level::OpticalGroup, board.id.to_string()));
            }
            for (og, other_og) in board.optical_groups.iter().zip(&other_board.optical_groups) {
                if !same_ids(&og.hybrids, &other_og.hybrids, |h| h.id, |h| h.id) {
                    return Err(incongruent(
                        Level::Hybrid,
                        format!("{}/{}", board.id, og.id),
                    ));
                }
                for (hybrid, other_hybrid) in og.hybrids.iter().zip(&other_og.hybrids) {
                    if !same_ids(&hybrid.chips, &other_hybrid.chips, |c| c.id, |c| c.id) {
                        return Err(incongruent(
                            Level::Chip,
                            format!("{}/{}/{}", board.id, og.id, hybrid.id),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether this container has the shape of `topology`.
    pub fn matches_topology(&self, topology: &Topology) -> bool {
        self.check_congruent(&DataContainer::build(topology)).is_ok()
    }
}

fn same_ids<A, B>(a: &[A], b: &[B], id_a: impl Fn(&A) -> u16, id_b: impl Fn(&B) -> u16) -> bool {
    a.len() == b.len() && a.iter().map(id_a).eq(b.iter().map(id_b))
}

fn child<C>(items: &[C], level: Level, index: usize) -> Result<&C> {
    items.get(index).ok_or(Error::IndexOutOfBounds {
        level,
        index,
        len: items.len(),
    })
}

fn child_mut<C>(items: &mut [C], level: Level, index: usize) -> Result<&mut C> {
    let len = items.len();
    items
        .get_mut(index)
        .ok_or(Error::IndexOutOfBounds { level, index, len })
}
