// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Completion accounting across calibration stages.
//!
//! The expected number of measurements is announced up front with
//! [`ProgressCounter::set_total`] or [`ProgressCounter::add_total`]; every
//! counted measurement then advances `current` by one. Stages repeated per
//! step of an outer stage compose with [`nested`], consecutive stages with
//! [`sequential`].

use std::sync::atomic::{AtomicU64, Ordering};

use calib_log::debug;

#[derive(Debug, Default)]
pub struct ProgressCounter {
    total: AtomicU64,
    current: AtomicU64,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Release);
    }

    pub fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::AcqRel);
    }

    pub fn add_current(&self, n: u64) {
        let current = self.current.fetch_add(n, Ordering::AcqRel) + n;
        let total = self.total();
        if current > total {
            debug!("Progress {current} exceeds announced total {total}");
        }
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Release);
        self.current.store(0, Ordering::Release);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// `current / total`, or 0 before any total was announced.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.current() as f64 / total as f64
    }

    pub fn is_complete(&self) -> bool {
        let total = self.total();
        total > 0 && self.current() >= total
    }
}

/// Work of a stage running `inner` measurements at each of `outer` steps.
pub fn nested(outer: u64, inner: u64) -> u64 {
    outer * inner
}

/// Work of stages running one after another.
pub fn sequential(stages: impl IntoIterator<Item = u64>) -> u64 {
    stages.into_iter().sum()
}
