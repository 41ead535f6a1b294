// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The per-chunk input tensors the solver is handed (§3, §6 solver input
//! contract). A [`Chunk`] is read-only for the duration of a solve; the
//! dispatcher (`crate::dispatch`) owns slicing the full dataset into these.

use marlu::{c64, Jones};
use ndarray::{Array1, Array2};

use crate::corr::{CorrMode, CorrWeights};

/// A contiguous (row-chunk, chan-chunk) slab of visibility data, ready to be
/// handed to the solver. Rows must cover whole unique timestamps (§4.2); this
/// is validated by the dispatcher, not here.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Observed visibilities, embedded as full 2x2 Jones matrices (§corr).
    /// Shape: `(row, chan)`.
    pub data: Array2<Jones<f64>>,

    /// Predicted visibilities per direction. Shape: `(row, chan, dir)`.
    pub model: ndarray::Array3<Jones<f64>>,

    /// Inverse-variance weights. Shape: `(row, chan)`.
    pub weights: Array2<CorrWeights>,

    /// Aggregate per-visibility flag; nonzero means skip. Shape: `(row, chan)`.
    pub flags: Array2<bool>,

    /// Antenna index of the first tile in each baseline. Shape: `(row,)`.
    pub ant1: Array1<usize>,

    /// Antenna index of the second tile in each baseline. Shape: `(row,)`.
    pub ant2: Array1<usize>,

    /// Time of each row, in arbitrary but consistent units (seconds).
    /// Shape: `(row,)`.
    pub time: Array1<f64>,

    /// Centre frequency of each channel \[Hz\]. Shape: `(chan,)`.
    pub chan_freq: Array1<f64>,

    /// Width of each channel \[Hz\]. Shape: `(chan,)`.
    pub chan_width: Array1<f64>,

    /// Number of antennas referenced by `ant1`/`ant2`. Not necessarily every
    /// antenna appears in every chunk.
    pub n_ant: usize,

    /// Number of sky-model directions (the `dir` axis of `model`).
    pub n_dir: usize,

    /// The correlation mode this chunk was ingested with.
    pub corr_mode: CorrMode,
}

impl Chunk {
    pub fn n_row(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn n_chan(&self) -> usize {
        self.data.shape()[1]
    }

    /// §3 invariant: `ant1[r] != ant2[r]` for every row.
    pub fn validate(&self) -> Result<(), String> {
        for (r, (&a1, &a2)) in self.ant1.iter().zip(self.ant2.iter()).enumerate() {
            if a1 == a2 {
                return Err(format!("row {r} has ant1 == ant2 == {a1}"));
            }
        }
        if self.model.shape()[2] != self.n_dir {
            return Err(format!(
                "model has {} directions but n_dir is {}",
                self.model.shape()[2],
                self.n_dir
            ));
        }
        Ok(())
    }

    /// Non-finite guard (§7 class 3): any data/weight cell containing
    /// NaN/Inf is treated as flagged before the solve begins.
    pub fn flag_non_finite(&mut self) {
        let n_row = self.n_row();
        let n_chan = self.n_chan();
        for r in 0..n_row {
            for f in 0..n_chan {
                let d = self.data[(r, f)];
                let w = self.weights[(r, f)];
                let bad = d.any_nan()
                    || d.to_float_array().iter().any(|x| x.is_infinite())
                    || w.0.iter().any(|x| !x.is_finite());
                if bad {
                    self.flags[(r, f)] = true;
                    self.weights[(r, f)] = CorrWeights::zero();
                }
            }
        }
    }
}

/// Convert a raw complex-valued slice into a full Jones matrix under the
/// given correlation mode. Convenience wrapper kept close to [`Chunk`] since
/// test/ingestion code constructs chunks visibility-by-visibility.
pub fn pack_vis(mode: CorrMode, stored: &[c64]) -> Jones<f64> {
    mode.pack(stored)
}
