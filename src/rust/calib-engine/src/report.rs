// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Chip error counters read after each stage.
//!
//! The counters are informative only: read failures are logged and a
//! non-zero counter never stops a calibration.

use calib_log::{info, warn};
use detector_container::DataContainer;
use indexmap::IndexMap;

use crate::EngineContext;

impl EngineContext<'_> {
    /// Read the configured error counters of every chip.
    ///
    /// Counters that cannot be read are missing from the chip's map.
    pub fn read_chip_errors(&mut self) -> DataContainer<IndexMap<String, u32>> {
        let counters = &self.settings.error_counters;
        let registers = &mut *self.registers;
        DataContainer::from_fn(self.topology, |key| {
            let mut values = IndexMap::new();
            for counter in counters {
                match registers.read(&key.address, counter) {
                    Ok(value) => {
                        values.insert(counter.clone(), value);
                    }
                    Err(err) => {
                        warn!("Cannot read {counter} of chip {}: {err}", key.address);
                    }
                }
            }
            values
        })
    }

    /// Log the error counters of every chip, if enabled in the settings.
    pub fn report_chip_errors(&mut self, stage: &str) {
        if !self.settings.report_chip_errors {
            return;
        }
        let errors = self.read_chip_errors();
        for (key, counters) in errors.leaves() {
            let summary = counters
                .iter()
                .map(|(name, value)| format!("{name} = {value}"))
                .collect::<Vec<_>>()
                .join(", ");
            info!("[{stage}] Error counters of chip {}: {summary}", key.address);
        }
    }
}
