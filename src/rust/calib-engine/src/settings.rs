// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Module for defining settings shared by the calibration engines.

use channel_group::{ChannelGroup, ChannelGroupHandler, GroupPolicy, GroupingParameters};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::hardware::MAX_REGISTER_BITS;
use crate::writer::{RegisterWriter, WriteMode, WriteRetryPolicy};

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

/// Largest number of steps a sweep may take, the range of the widest register.
pub const MAX_SCAN_STEPS: usize = 1 << MAX_REGISTER_BITS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub events_per_point: u32,
    pub write_mode: WriteMode,
    pub retry_policy: WriteRetryPolicy,
    pub max_scan_steps: usize,
    pub group_policy: GroupPolicy,
    pub grouping: GroupingParameters,
    /// Read and log chip error counters after each stage.
    pub report_chip_errors: bool,
    pub error_counters: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            events_per_point: 100,
            write_mode: WriteMode::default(),
            retry_policy: WriteRetryPolicy::default(),
            max_scan_steps: MAX_SCAN_STEPS,
            group_policy: GroupPolicy::default(),
            grouping: GroupingParameters::default(),
            report_chip_errors: true,
            error_counters: [
                "LOCKLOSS_CNT",
                "BITFLIP_WNG_CNT",
                "BITFLIP_ERR_CNT",
                "CMDERR_CNT",
                "SKIPPED_TRIGGER_CNT",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

impl EngineSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings = serde_json::from_str(json).map_err(anyhow::Error::from)?;
        Ok(settings)
    }

    pub fn writer(&self) -> RegisterWriter {
        RegisterWriter::new(self.retry_policy, self.write_mode)
    }

    /// Test groups over `base` following the configured policy and grouping.
    pub fn channel_groups(&self, base: ChannelGroup) -> Result<ChannelGroupHandler> {
        ChannelGroupHandler::new(base, self.group_policy, self.grouping).map_err(Into::into)
    }

    /// Clamp out-of-range values, reporting every adjustment.
    pub fn sanitize(&mut self) -> Vec<SanitizationChange> {
        let mut changes = vec![];
        let mut record = |field, original: String, sanitized: String, reason: &str| {
            changes.push(SanitizationChange {
                field,
                original,
                sanitized,
                reason: reason.to_string(),
            });
        };
        if self.events_per_point == 0 {
            self.events_per_point = 1;
            record("events_per_point", "0".into(), "1".into(), "Must be positive.");
        }
        if self.max_scan_steps == 0 || self.max_scan_steps > MAX_SCAN_STEPS {
            record(
                "max_scan_steps",
                self.max_scan_steps.to_string(),
                MAX_SCAN_STEPS.to_string(),
                "Must be within the range of a 16 bit register.",
            );
            self.max_scan_steps = MAX_SCAN_STEPS;
        }
        if let WriteRetryPolicy::Retry { max_attempts, .. } = &mut self.retry_policy
            && *max_attempts == 0
        {
            *max_attempts = 1;
            record(
                "retry_policy.max_attempts",
                "0".into(),
                "1".into(),
                "At least one attempt is made.",
            );
        }
        let grouping = [
            (
                "grouping.clusters_per_group",
                &mut self.grouping.clusters_per_group,
            ),
            (
                "grouping.cols_per_cluster",
                &mut self.grouping.cols_per_cluster,
            ),
            (
                "grouping.rows_per_cluster",
                &mut self.grouping.rows_per_cluster,
            ),
        ];
        for (field, value) in grouping {
            if *value == 0 {
                *value = 1;
                record(field, "0".into(), "1".into(), "Must be positive.");
            }
        }
        changes
    }
}
