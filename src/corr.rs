// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Correlation-mode dispatch (§9 design note: "dynamic multi-dispatch on
//! correlation mode"). The source picks a kernel via runtime code
//! generation keyed on the correlation count; here we use a tagged enum
//! selected once at chunk entry, and every visibility/gain is carried
//! internally as a full 2x2 [`marlu::Jones`] with structurally-zero entries
//! standing in for correlations the mode doesn't have. This keeps exactly
//! one accumulation/inversion/apply code path instead of three, at the cost
//! of a few wasted multiplies on the `Scalar`/`Diag` paths -- a reasonable
//! trade for a 2,3 or 4-entry matrix this small.

use marlu::{c64, Jones};
use thiserror::Error;

/// The number of stored correlations per visibility (§3 invariant: `corr ∈
/// {1, 2, 4}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum CorrMode {
    /// A single unpolarised correlation. Calibration is scalar per antenna;
    /// both feeds are assumed identical, so the embedded matrix has equal
    /// diagonal entries.
    Scalar,
    /// Two correlations (XX, YY). Gains are diagonal; off-diagonal leakage
    /// terms are structurally absent, not just zero-valued.
    Diag,
    /// Four correlations (XX, XY, YX, YY), row-major. The general case.
    Full,
}

#[derive(Debug, Error)]
pub enum CorrError {
    #[error("unsupported correlation count {0}; expected 1, 2 or 4")]
    UnsupportedCount(usize),
}

impl CorrMode {
    pub fn from_count(n_corr: usize) -> Result<Self, CorrError> {
        match n_corr {
            1 => Ok(CorrMode::Scalar),
            2 => Ok(CorrMode::Diag),
            4 => Ok(CorrMode::Full),
            n => Err(CorrError::UnsupportedCount(n)),
        }
    }

    pub fn n_corr(self) -> usize {
        match self {
            CorrMode::Scalar => 1,
            CorrMode::Diag => 2,
            CorrMode::Full => 4,
        }
    }

    /// Pack `n_corr` stored complex values into a full 2x2 Jones matrix.
    pub fn pack(self, stored: &[c64]) -> Jones<f64> {
        match self {
            CorrMode::Scalar => Jones::from([stored[0], c64::default(), c64::default(), stored[0]]),
            CorrMode::Diag => Jones::from([stored[0], c64::default(), c64::default(), stored[1]]),
            CorrMode::Full => Jones::from([stored[0], stored[1], stored[2], stored[3]]),
        }
    }

    /// Inverse of [`CorrMode::pack`]: extract the stored correlations back
    /// out of a full Jones matrix.
    pub fn unpack(self, j: Jones<f64>) -> Vec<c64> {
        match self {
            CorrMode::Scalar => vec![j[0]],
            CorrMode::Diag => vec![j[0], j[3]],
            CorrMode::Full => vec![j[0], j[1], j[2], j[3]],
        }
    }
}

/// Per-visibility weights (§3: `weights` has shape `(row, chan, corr)`).
/// Stored as a fixed 4-slot array regardless of [`CorrMode`]; unused slots
/// are zero and ignored by `pack`/`unpack`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CorrWeights(pub [f64; 4]);

impl CorrWeights {
    pub fn zero() -> Self {
        CorrWeights([0.0; 4])
    }

    /// §3 invariant: a zero weight on any on-diagonal correlation is
    /// treated as implicitly flagged. `Scalar` mode only ever populates
    /// slot 0 (there's no second feed to carry a slot-3 weight), so it's
    /// checked on its own; `Diag`/`Full` need both feeds unflagged.
    pub fn implicitly_flagged(&self, corr_mode: CorrMode) -> bool {
        match corr_mode {
            CorrMode::Scalar => self.0[0] == 0.0,
            CorrMode::Diag | CorrMode::Full => self.0[0] == 0.0 || self.0[3] == 0.0,
        }
    }

    /// A single representative weight used to weight JᴴJ/JᴴR accumulation.
    /// We use the minimum of the on-diagonal weights, which is conservative:
    /// a visibility is only as trustworthy as its least-trusted correlation.
    pub fn scalar(&self) -> f64 {
        self.0[0].min(self.0[3])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_weight_with_unset_slot_three_is_not_flagged() {
        let w = CorrWeights([1.0, 0.0, 0.0, 0.0]);
        assert!(!w.implicitly_flagged(CorrMode::Scalar));
        assert!(w.implicitly_flagged(CorrMode::Diag));
        assert!(w.implicitly_flagged(CorrMode::Full));
    }

    #[test]
    fn scalar_weight_zeroed_in_slot_zero_is_flagged() {
        let w = CorrWeights([0.0, 0.0, 0.0, 0.0]);
        assert!(w.implicitly_flagged(CorrMode::Scalar));
    }

    #[test]
    fn diag_weight_needs_both_feeds_present() {
        let w = CorrWeights([1.0, 0.0, 0.0, 1.0]);
        assert!(!w.implicitly_flagged(CorrMode::Diag));
        let half_flagged = CorrWeights([1.0, 0.0, 0.0, 0.0]);
        assert!(half_flagged.implicitly_flagged(CorrMode::Diag));
    }
}
