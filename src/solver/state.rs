// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-term mutable solve state (§9 design note: "cyclic / mutable xarray
//! datasets carrying both config and result tensors" -> a read-only
//! [`crate::config::TermSpec`] plus a mutable [`TermRuntime`] owned by the
//! solver for one chunk's lifetime, never aliased across threads).

use marlu::Jones;
use ndarray::{Array4, Array5};

use crate::{
    chunk::Chunk,
    config::TermSpec,
    constants::SPEED_OF_LIGHT,
    flagging::{CellFlag, FlagIntermediaries},
    interval::{build_direction_map, build_freq_map, build_time_map},
};

/// Everything the solver needs to run one term's inner Gauss-Newton loop,
/// built once per chunk from a [`TermSpec`] and the chunk's row/channel
/// metadata.
pub struct TermRuntime {
    pub spec: TermSpec,
    /// `t_map[row] -> time-bin` (§4.1). Doubles as `tp_map`: this
    /// implementation's parameter-space maps always coincide with the gain
    /// maps (§4.1 ADD, resolved in DESIGN.md).
    pub t_map: Vec<usize>,
    pub f_map: Vec<usize>,
    /// `d_map[dir] -> gain-direction-slot` (§4.1).
    pub d_map: Vec<usize>,
    pub n_tint: usize,
    pub n_fint: usize,
    pub n_dir_out: usize,
    /// Mean channel frequency \[Hz\] of every frequency bin, used by
    /// parameterized terms (phase ramps, delay, rotation measure) that need
    /// a representative frequency per solution cell.
    pub bin_freq: Vec<f64>,
    /// `(c / bin_freq)^2`, the wavelength squared used by the
    /// rotation-measure term.
    pub bin_lambda_sq: Vec<f64>,
    /// The smallest nonzero `bin_freq`, ν_min (§4.3 numerical policy): the
    /// delay variants scale their derivative by ν/ν_min before forming
    /// JᴴJ to preserve conditioning, undoing it on the resulting update.
    /// Unused (and harmless) for every other variant.
    pub freq_min: f64,
    pub gain: Array4<Jones<f64>>,
    pub gain_flags: Array4<CellFlag>,
    pub param_flags: Array4<CellFlag>,
    /// `None` for unparameterized terms (Complex/SlowComplex), which solve
    /// the gain matrix directly.
    pub params: Option<Array5<f64>>,
    pub flag_imdry: FlagIntermediaries,
    pub iter_count: u32,
    pub converged_percentage: f64,
}

impl TermRuntime {
    pub fn new(chunk: &Chunk, spec: TermSpec) -> Result<Self, crate::interval::IntervalError> {
        let t_axis = build_time_map(chunk.time.as_slice().unwrap(), spec.time_interval)?;
        let f_axis = build_freq_map(
            chunk.chan_freq.as_slice().unwrap(),
            chunk.chan_width.as_slice().unwrap(),
            spec.freq_interval,
        )?;
        let n_dir_out = if spec.direction_dependent { chunk.n_dir } else { 1 };
        let d_map = build_direction_map(chunk.n_dir, spec.direction_dependent);

        let n_tint = t_axis.n_bins.max(1);
        let n_fint = f_axis.n_bins.max(1);
        let shape = (n_tint, n_fint, chunk.n_ant, n_dir_out);

        let gain = Array4::from_elem(shape, Jones::identity());
        let mut gain_flags = Array4::from_elem(shape, CellFlag::Ok);

        // §4.1 guarantee: every row/channel maps into exactly one bin.
        // A cell with zero occupancy (no row/chan/antenna combination maps
        // there) is "missing" (§4.3: "missing antenna -> set gain =
        // identity, flag = 1").
        let mut occupancy = ndarray::Array3::<u32>::zeros((n_tint, n_fint, chunk.n_ant));
        for r in 0..chunk.n_row() {
            let tb = t_axis.map[r];
            let a1 = chunk.ant1[r];
            let a2 = chunk.ant2[r];
            for f in 0..chunk.n_chan() {
                if chunk.flags[(r, f)] {
                    continue;
                }
                let fb = f_axis.map[f];
                occupancy[(tb, fb, a1)] += 1;
                occupancy[(tb, fb, a2)] += 1;
            }
        }
        for tb in 0..n_tint {
            for fb in 0..n_fint {
                for a in 0..chunk.n_ant {
                    if occupancy[(tb, fb, a)] == 0 {
                        for d in 0..n_dir_out {
                            gain_flags[(tb, fb, a, d)] = CellFlag::Missing;
                        }
                    }
                }
            }
        }

        let n_param = spec.variant.n_param(chunk.corr_mode);
        let params = spec
            .variant
            .is_parameterized()
            .then(|| Array5::<f64>::zeros((n_tint, n_fint, chunk.n_ant, n_dir_out, n_param)));

        let param_flags = gain_flags.clone();
        let flag_imdry = FlagIntermediaries::new(shape);

        let mut freq_sum = vec![0.0; n_fint];
        let mut freq_count = vec![0u32; n_fint];
        for f in 0..chunk.n_chan() {
            let fb = f_axis.map[f];
            freq_sum[fb] += chunk.chan_freq[f];
            freq_count[fb] += 1;
        }
        let bin_freq: Vec<f64> = freq_sum
            .iter()
            .zip(&freq_count)
            .map(|(&s, &c)| if c == 0 { 0.0 } else { s / c as f64 })
            .collect();
        let bin_lambda_sq: Vec<f64> = bin_freq
            .iter()
            .map(|&f| if f == 0.0 { 0.0 } else { (SPEED_OF_LIGHT / f).powi(2) })
            .collect();
        let freq_min = bin_freq
            .iter()
            .copied()
            .filter(|&f| f > 0.0)
            .fold(f64::INFINITY, f64::min);
        let freq_min = if freq_min.is_finite() { freq_min } else { 0.0 };

        Ok(TermRuntime {
            spec,
            t_map: t_axis.map,
            f_map: f_axis.map,
            d_map,
            n_tint,
            n_fint,
            n_dir_out,
            bin_freq,
            bin_lambda_sq,
            freq_min,
            gain,
            gain_flags,
            param_flags,
            params,
            flag_imdry,
            iter_count: 0,
            converged_percentage: 0.0,
        })
    }

    pub fn gain_at(&self, t_bin: usize, f_bin: usize, ant: usize, dir: usize) -> Jones<f64> {
        self.gain[(t_bin, f_bin, ant, self.d_map[dir])]
    }
}
