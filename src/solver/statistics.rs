// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Post-solve diagnostic statistics, not used by the solve loop itself.
//! `prior_gain_error` is a noise-to-signal estimate per solution cell,
//! grounded on `cubicalv2/statistics/statistics.py`'s `prior_gain_error`
//! computation -- including its "egregious fudge factor of four", which the
//! source leaves unexplained and which this crate reproduces rather than
//! derives (an Open Question in the source; see DESIGN.md).

use ndarray::Array4;

use crate::{chunk::Chunk, constants::PRIOR_GAIN_ERROR_FUDGE, solver::state::TermRuntime};

/// `sqrt(4 * sigma^2 / (n_eqs * avg_abs_model_sqrd))` per `(t_int, f_int,
/// ant, dir)` cell. `sigma^2` is estimated as the reciprocal of the mean
/// weight over the cell's equations (weights are inverse-variance); a cell
/// with zero equations or zero average model power yields `0.0` rather than
/// NaN, consistent with this crate's division policy (§7 class 3).
pub fn prior_gain_error(chunk: &Chunk, rt: &TermRuntime) -> Array4<f64> {
    let shape = rt.gain.dim();
    let mut weight_sum = Array4::<f64>::zeros(shape);
    let mut model_abs2_sum = Array4::<f64>::zeros(shape);
    let mut n_eqs = Array4::<u32>::zeros(shape);

    let n_row = chunk.n_row();
    let n_chan = chunk.n_chan();
    for r in 0..n_row {
        let a1 = chunk.ant1[r];
        let a2 = chunk.ant2[r];
        for f in 0..n_chan {
            if chunk.flags[(r, f)] {
                continue;
            }
            let w = chunk.weights[(r, f)];
            if w.implicitly_flagged(chunk.corr_mode) {
                continue;
            }
            let tb = rt.t_map[r];
            let fb = rt.f_map[f];
            for d in 0..chunk.n_dir {
                let d_out = rt.d_map[d];
                let model_abs2: f64 = chunk.model[(r, f, d)].norm_sqr().iter().sum();
                for a in [a1, a2] {
                    weight_sum[(tb, fb, a, d_out)] += w.scalar();
                    model_abs2_sum[(tb, fb, a, d_out)] += model_abs2;
                    n_eqs[(tb, fb, a, d_out)] += 1;
                }
            }
        }
    }

    Array4::from_shape_fn(shape, |idx| {
        let n = n_eqs[idx];
        let avg_model_abs2 = if n == 0 { 0.0 } else { model_abs2_sum[idx] / n as f64 };
        let avg_weight = if n == 0 { 0.0 } else { weight_sum[idx] / n as f64 };
        if avg_weight == 0.0 || avg_model_abs2 == 0.0 || n == 0 {
            return 0.0;
        }
        let sigma_sqrd = 1.0 / avg_weight;
        let noise_to_signal = PRIOR_GAIN_ERROR_FUDGE * sigma_sqrd / (n as f64 * avg_model_abs2);
        noise_to_signal.sqrt()
    })
}
