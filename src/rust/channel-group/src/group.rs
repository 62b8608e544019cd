// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::ops::RangeInclusive;

use bitvec::prelude::*;

use crate::{Error, Result};

/// Pixel matrix rows of the readout chip.
pub const DEFAULT_ROWS: usize = 192;
/// Pixel matrix columns of the readout chip.
pub const DEFAULT_COLS: usize = 400;

/// Enabled/disabled state of every channel of a `rows` x `cols` matrix.
///
/// Bits are stored row-major.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelGroup {
    rows: usize,
    cols: usize,
    bits: BitVec<u64, Lsb0>,
}

impl Default for ChannelGroup {
    fn default() -> Self {
        ChannelGroup::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

impl ChannelGroup {
    /// Group with all channels enabled.
    pub fn new(rows: usize, cols: usize) -> Self {
        ChannelGroup {
            rows,
            cols,
            bits: BitVec::repeat(true, rows * cols),
        }
    }

    /// Group with all channels disabled.
    pub fn empty(rows: usize, cols: usize) -> Self {
        ChannelGroup {
            rows,
            cols,
            bits: BitVec::repeat(false, rows * cols),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn number_of_channels(&self) -> usize {
        self.bits.len()
    }

    fn position(&self, row: usize, col: usize) -> Result<usize> {
        if row >= self.rows || col >= self.cols {
            return Err(Error::ChannelOutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(row * self.cols + col)
    }

    pub fn is_enabled(&self, row: usize, col: usize) -> Result<bool> {
        let position = self.position(row, col)?;
        Ok(self.bits[position])
    }

    pub fn enable(&mut self, row: usize, col: usize) -> Result<()> {
        let position = self.position(row, col)?;
        self.bits.set(position, true);
        Ok(())
    }

    pub fn disable(&mut self, row: usize, col: usize) -> Result<()> {
        let position = self.position(row, col)?;
        self.bits.set(position, false);
        Ok(())
    }

    /// Enable the rectangle spanned by `rows` and `cols`.
    pub fn enable_region(
        &mut self,
        rows: RangeInclusive<usize>,
        cols: RangeInclusive<usize>,
    ) -> Result<()> {
        if rows.is_empty() || cols.is_empty() {
            return Ok(());
        }
        self.position(*rows.end(), *cols.end())?;
        for row in rows {
            let start = row * self.cols;
            self.bits[start + cols.start()..=start + cols.end()].fill(true);
        }
        Ok(())
    }

    pub fn enable_all(&mut self) {
        self.bits.fill(true);
    }

    pub fn disable_all(&mut self) {
        self.bits.fill(false);
    }

    pub fn flip_all(&mut self) {
        let bits = std::mem::take(&mut self.bits);
        self.bits = !bits;
    }

    pub fn all_enabled(&self) -> bool {
        self.bits.all()
    }

    pub fn number_of_enabled(&self) -> usize {
        self.bits.count_ones()
    }

    /// Number of channels enabled both here and in `mask`.
    pub fn number_of_enabled_in(&self, mask: &ChannelGroup) -> Result<usize> {
        self.check_geometry(mask)?;
        Ok(self
            .bits
            .iter()
            .by_vals()
            .zip(mask.bits.iter().by_vals())
            .filter(|(a, b)| *a && *b)
            .count())
    }

    /// Replace the whole bitmap with a row-major pattern.
    pub fn set_custom_pattern<I>(&mut self, pattern: I) -> Result<()>
    where
        I: IntoIterator<Item = bool>,
    {
        let bits: BitVec<u64, Lsb0> = pattern.into_iter().collect();
        if bits.len() != self.bits.len() {
            return Err(Error::PatternLength {
                expected: self.bits.len(),
                actual: bits.len(),
            });
        }
        self.bits = bits;
        Ok(())
    }

    /// Enabled channels as `(row, col)`, row-major.
    pub fn iter_enabled(&self) -> impl Iterator<Item = (usize, usize)> {
        let cols = self.cols;
        self.bits.iter_ones().map(move |i| (i / cols, i % cols))
    }

    pub fn union(&self, other: &ChannelGroup) -> Result<ChannelGroup> {
        self.combine(other, |a, b| a || b)
    }

    pub fn intersection(&self, other: &ChannelGroup) -> Result<ChannelGroup> {
        self.combine(other, |a, b| a && b)
    }

    fn combine(&self, other: &ChannelGroup, op: impl Fn(bool, bool) -> bool) -> Result<ChannelGroup> {
        self.check_geometry(other)?;
        let bits = self
            .bits
            .iter()
            .by_vals()
            .zip(other.bits.iter().by_vals())
            .map(|(a, b)| op(a, b))
            .collect();
        Ok(ChannelGroup {
            rows: self.rows,
            cols: self.cols,
            bits,
        })
    }

    fn check_geometry(&self, other: &ChannelGroup) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(Error::GeometryMismatch {
                left: format!("{}x{}", self.rows, self.cols),
                right: format!("{}x{}", other.rows, other.cols),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let group = ChannelGroup::default();
        assert_eq!(group.number_of_channels(), DEFAULT_ROWS * DEFAULT_COLS);
        assert!(group.all_enabled());
    }

    #[test]
    fn test_enable_disable() {
        let mut group = ChannelGroup::empty(4, 5);
        assert_eq!(group.number_of_enabled(), 0);
        group.enable(1, 2).unwrap();
        group.enable(3, 4).unwrap();
        assert!(group.is_enabled(1, 2).unwrap());
        assert!(!group.is_enabled(2, 1).unwrap());
        assert_eq!(group.iter_enabled().collect::<Vec<_>>(), vec![(1, 2), (3, 4)]);
        group.disable(1, 2).unwrap();
        assert_eq!(group.number_of_enabled(), 1);
        assert!(matches!(
            group.enable(4, 0),
            Err(Error::ChannelOutOfRange { row: 4, .. })
        ));
        assert!(group.is_enabled(0, 5).is_err());
    }

    #[test]
    fn test_enable_region() {
        let mut group = ChannelGroup::empty(6, 6);
        group.enable_region(1..=2, 3..=5).unwrap();
        assert_eq!(group.number_of_enabled(), 6);
        assert!(group.is_enabled(2, 5).unwrap());
        assert!(!group.is_enabled(3, 3).unwrap());
        assert!(group.enable_region(0..=6, 0..=0).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let empty = 4..=3;
        group.enable_region(0..=1, empty).unwrap();
        assert_eq!(group.number_of_enabled(), 6);
    }

    #[test]
    fn test_flip_and_all() {
        let mut group = ChannelGroup::new(3, 3);
        group.disable(0, 0).unwrap();
        assert!(!group.all_enabled());
        group.flip_all();
        assert_eq!(group.iter_enabled().collect::<Vec<_>>(), vec![(0, 0)]);
        group.enable_all();
        assert!(group.all_enabled());
        group.disable_all();
        assert_eq!(group.number_of_enabled(), 0);
    }

    #[test]
    fn test_enabled_in_mask() {
        let mut group = ChannelGroup::empty(2, 4);
        group.enable_region(0..=0, 0..=3).unwrap();
        let mut mask = ChannelGroup::empty(2, 4);
        mask.enable(0, 1).unwrap();
        mask.enable(1, 1).unwrap();
        assert_eq!(group.number_of_enabled_in(&mask).unwrap(), 1);
        assert!(group.number_of_enabled_in(&ChannelGroup::new(4, 2)).is_err());
    }

    #[test]
    fn test_custom_pattern() {
        let mut group = ChannelGroup::new(2, 2);
        group
            .set_custom_pattern([true, false, false, true])
            .unwrap();
        assert_eq!(group.iter_enabled().collect::<Vec<_>>(), vec![(0, 0), (1, 1)]);
        assert!(matches!(
            group.set_custom_pattern([true; 3]),
            Err(Error::PatternLength {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_union_intersection() {
        let mut a = ChannelGroup::empty(1, 4);
        a.enable(0, 0).unwrap();
        a.enable(0, 1).unwrap();
        let mut b = ChannelGroup::empty(1, 4);
        b.enable(0, 1).unwrap();
        b.enable(0, 3).unwrap();
        assert_eq!(a.union(&b).unwrap().number_of_enabled(), 3);
        assert_eq!(
            a.intersection(&b).unwrap().iter_enabled().collect::<Vec<_>>(),
            vec![(0, 1)]
        );
    }
}
