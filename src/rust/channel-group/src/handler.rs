// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::{ChannelGroup, Error, Result};

/// Which test groups a measurement round stimulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupPolicy {
    /// Only the first test group.
    Fast,
    /// Every test group in turn.
    #[default]
    Exhaustive,
    /// The base group as a single test group.
    AllChannels,
}

/// How the base group is cut into clusters and clusters into test groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingParameters {
    pub clusters_per_group: usize,
    pub cols_per_cluster: usize,
    pub rows_per_cluster: usize,
}

impl Default for GroupingParameters {
    fn default() -> Self {
        GroupingParameters {
            clusters_per_group: 50,
            cols_per_cluster: 1,
            rows_per_cluster: 1,
        }
    }
}

impl GroupingParameters {
    fn validate(&self) -> Result<()> {
        if self.clusters_per_group == 0 || self.cols_per_cluster == 0 || self.rows_per_cluster == 0
        {
            return Err(Error::InvalidParameters(format!("{self:?}")));
        }
        Ok(())
    }
}

/// One channel subset to stimulate, with its position in the round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestGroup {
    pub index: usize,
    pub channels: ChannelGroup,
}

/// Splits a base channel group into disjoint test groups.
///
/// The matrix is tiled into `rows_per_cluster` x `cols_per_cluster` clusters.
/// Clusters holding at least one enabled channel are numbered in row-major
/// order and dealt round-robin over `ceil(clusters / clusters_per_group)`
/// test groups. Each test group only contains channels enabled in the base
/// group, so the groups are disjoint and together cover the base exactly.
#[derive(Debug, Clone)]
pub struct ChannelGroupHandler {
    base: ChannelGroup,
    policy: GroupPolicy,
    parameters: GroupingParameters,
    clusters: Vec<(usize, usize)>,
}

impl ChannelGroupHandler {
    pub fn new(
        base: ChannelGroup,
        policy: GroupPolicy,
        parameters: GroupingParameters,
    ) -> Result<Self> {
        parameters.validate()?;
        let mut handler = ChannelGroupHandler {
            base,
            policy,
            parameters,
            clusters: vec![],
        };
        handler.update_clusters();
        Ok(handler)
    }

    /// Handler stimulating the whole base group at once.
    pub fn single(base: ChannelGroup) -> Self {
        let mut handler = ChannelGroupHandler {
            base,
            policy: GroupPolicy::AllChannels,
            parameters: GroupingParameters::default(),
            clusters: vec![],
        };
        handler.update_clusters();
        handler
    }

    pub fn set_custom_group(&mut self, group: ChannelGroup) {
        self.base = group;
        self.update_clusters();
    }

    pub fn set_policy(&mut self, policy: GroupPolicy) {
        self.policy = policy;
    }

    pub fn set_parameters(&mut self, parameters: GroupingParameters) -> Result<()> {
        parameters.validate()?;
        self.parameters = parameters;
        self.update_clusters();
        Ok(())
    }

    pub fn base(&self) -> &ChannelGroup {
        &self.base
    }

    pub fn policy(&self) -> GroupPolicy {
        self.policy
    }

    fn update_clusters(&mut self) {
        let GroupingParameters {
            rows_per_cluster,
            cols_per_cluster,
            ..
        } = self.parameters;
        let rows = self.base.rows();
        let cols = self.base.cols();
        self.clusters = (0..rows)
            .step_by(rows_per_cluster)
            .flat_map(|row| (0..cols).step_by(cols_per_cluster).map(move |col| (row, col)))
            .filter(|&(row, col)| {
                self.cluster_cells(row, col)
                    .any(|(r, c)| self.base.is_enabled(r, c).unwrap_or(false))
            })
            .collect();
    }

    fn cluster_cells(&self, row: usize, col: usize) -> impl Iterator<Item = (usize, usize)> {
        let row_end = (row + self.parameters.rows_per_cluster).min(self.base.rows());
        let col_end = (col + self.parameters.cols_per_cluster).min(self.base.cols());
        (row..row_end).flat_map(move |r| (col..col_end).map(move |c| (r, c)))
    }

    fn partitions(&self) -> usize {
        self.clusters
            .len()
            .div_ceil(self.parameters.clusters_per_group)
            .max(1)
    }

    /// Number of test groups [`Self::iter`] yields.
    pub fn number_of_groups(&self) -> usize {
        match self.policy {
            GroupPolicy::Fast | GroupPolicy::AllChannels => 1,
            GroupPolicy::Exhaustive => self.partitions(),
        }
    }

    /// Test group `index`, or `None` past the end.
    pub fn group(&self, index: usize) -> Option<ChannelGroup> {
        if index >= self.number_of_groups() {
            return None;
        }
        if self.policy == GroupPolicy::AllChannels {
            return Some(self.base.clone());
        }
        let partitions = self.partitions();
        let mut group = ChannelGroup::empty(self.base.rows(), self.base.cols());
        for &(row, col) in self.clusters.iter().skip(index).step_by(partitions) {
            for (r, c) in self.cluster_cells(row, col) {
                if self.base.is_enabled(r, c).unwrap_or(false) {
                    group.enable(r, c).ok()?;
                }
            }
        }
        Some(group)
    }

    /// Lazily built test groups, restartable by calling again.
    pub fn iter(&self) -> TestGroups<'_> {
        TestGroups {
            handler: self,
            next: 0,
            end: self.number_of_groups(),
        }
    }

    /// Union of all test groups.
    pub fn all_channels_group(&self) -> ChannelGroup {
        let mut union = ChannelGroup::empty(self.base.rows(), self.base.cols());
        for test_group in self.iter() {
            for (row, col) in test_group.channels.iter_enabled() {
                // Test groups share the base geometry.
                let _ = union.enable(row, col);
            }
        }
        union
    }
}

impl<'a> IntoIterator for &'a ChannelGroupHandler {
    type Item = TestGroup;
    type IntoIter = TestGroups<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct TestGroups<'a> {
    handler: &'a ChannelGroupHandler,
    next: usize,
    end: usize,
}

impl Iterator for TestGroups<'_> {
    type Item = TestGroup;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let channels = self.handler.group(index)?;
        Some(TestGroup { index, channels })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for TestGroups<'_> {}
