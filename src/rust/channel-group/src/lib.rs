// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Channel selection within a chip's pixel matrix.
//!
//! A [`ChannelGroup`] is a bitmap over the matrix. A [`ChannelGroupHandler`]
//! splits a base group into the test groups that are stimulated one at a
//! time during a measurement round.

mod group;
mod handler;

pub use group::{ChannelGroup, DEFAULT_COLS, DEFAULT_ROWS};
pub use handler::{ChannelGroupHandler, GroupPolicy, GroupingParameters, TestGroup, TestGroups};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Channel ({row}, {col}) outside of {rows}x{cols} matrix")]
    ChannelOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Channel groups have different geometry: {left} vs {right}")]
    GeometryMismatch { left: String, right: String },
    #[error("Pattern has {actual} entries, matrix has {expected} channels")]
    PatternLength { expected: usize, actual: usize },
    #[error("Invalid grouping parameters: {0}")]
    InvalidParameters(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
