// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use detector_container::DataContainer;

use crate::hardware::ChipResponse;
use crate::{EngineContext, Result};

impl EngineContext<'_> {
    /// Stimulate every test group once and merge the responses per chip.
    ///
    /// Each `Measurement` call advances the progress counter by one.
    pub fn measure(&mut self, events: u32) -> Result<DataContainer<ChipResponse>> {
        self.measure_round(events, true)
    }

    /// Like [`Self::measure`], without advancing the progress counter.
    pub fn refresh(&mut self, events: u32) -> Result<DataContainer<ChipResponse>> {
        self.measure_round(events, false)
    }

    fn measure_round(&mut self, events: u32, counted: bool) -> Result<DataContainer<ChipResponse>> {
        let groups = self.channel_groups;
        if groups.number_of_groups() == 1
            && let Some(test_group) = groups.iter().next()
        {
            let response = self.measurement.run(&test_group.channels, events)?;
            response.check_congruent(&DataContainer::build(self.topology))?;
            if counted {
                self.progress.add_current(1);
            }
            return Ok(response);
        }
        let mut collected: DataContainer<Vec<ChipResponse>> =
            DataContainer::with_payload(self.topology, vec![]);
        for test_group in groups.iter() {
            let response = self.measurement.run(&test_group.channels, events)?;
            if counted {
                self.progress.add_current(1);
            }
            collected.zip_mut_with(&response, |_, responses, r| responses.push(r.clone()))?;
        }
        Ok(collected.map(|_, responses| ChipResponse::average(responses)))
    }
}
