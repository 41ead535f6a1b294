// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! JᴴJ/JᴴR accumulation and the per-iteration update for one active term in
//! the chain (§4.3 steps 1-5). Grounded directly on the teacher's
//! `calibration_loop` ("André's calibrate": `(D J M^H) / (M J^H J M^H)`,
//! `src/calibrate/di.rs`), generalized three ways: (1) terms before/after the
//! active one in the chain are folded into an effective model/data pair via
//! the `Pre`/`Post` operators (§4.3 step 2's "L, R operators"), (2) multiple
//! sky-model directions accumulate per-direction with the usual
//! subtract-other-directions residual, (3) parameterized terms replace the
//! direct top/bot ratio with a real scalar Gauss-Newton step on the
//! parameter vector.

use marlu::Jones;
use ndarray::{Array4, Array5, Zip};

use crate::{
    chunk::Chunk,
    config::SolvePer,
    constants::UPDATE_DAMPING,
    corr::CorrWeights,
    solver::{
        invert::{invert_1x1, invert_jones},
        state::TermRuntime,
    },
};

fn term_gain(rt: &TermRuntime, r: usize, f: usize, ant: usize, d: usize) -> Jones<f64> {
    let tb = rt.t_map[r];
    let fb = rt.f_map[f];
    let dd = rt.d_map[d];
    rt.gain[(tb, fb, ant, dd)]
}

/// Product of the gains of every term in `range`, in chain order, for one
/// antenna/direction at one row/chan. Used to build the `Pre`/`Post`
/// operators of §4.3 step 2. The empty range (no terms before/after the
/// active one) naturally yields the identity.
fn chain_product(
    runtimes: &[TermRuntime],
    range: std::ops::Range<usize>,
    r: usize,
    f: usize,
    ant: usize,
    d: usize,
) -> Jones<f64> {
    let mut acc = Jones::identity();
    for j in range {
        acc = acc * term_gain(&runtimes[j], r, f, ant, d);
    }
    acc
}

/// Accumulated normal-equation buffers for one active term's inner
/// iteration. Unparameterized terms fill `top`/`bot` (the direct-ratio
/// equivalents of JᴴR/JᴴJ); parameterized terms fill `jhr`/`jhj` (one real
/// scalar pair per parameter, since the on-diagonal parameterization this
/// crate supports is block-diagonal across parameter slots).
struct Accumulator {
    top: Array4<Jones<f64>>,
    bot: Array4<Jones<f64>>,
    jhr: Array5<f64>,
    jhj: Array5<f64>,
}

impl Accumulator {
    fn new(shape: (usize, usize, usize, usize), n_param: usize) -> Self {
        Self {
            top: Array4::from_elem(shape, Jones::default()),
            bot: Array4::from_elem(shape, Jones::default()),
            jhr: Array5::zeros((shape.0, shape.1, shape.2, shape.3, n_param.max(1))),
            jhj: Array5::zeros((shape.0, shape.1, shape.2, shape.3, n_param.max(1))),
        }
    }
}

/// Sum of `Re(conj(a[c]) * b[c]) * w[c]` over all four stored Jones entries
/// (§4.3: "a 2x2 JᴴJ block per on-diagonal correlation per antenna" --
/// summing all four entries rather than just the two on-diagonal ones is
/// harmless here because every parameterized variant this crate implements
/// produces a structurally-zero off-diagonal `dgain_dparam`, except
/// [`crate::solver::term::TermVariant::ParallacticAngle`], for which the
/// off-diagonal terms genuinely carry signal).
fn weighted_real_inner(a: Jones<f64>, b: Jones<f64>, w: CorrWeights) -> f64 {
    a.to_float_array()
        .chunks_exact(2)
        .zip(b.to_float_array().chunks_exact(2))
        .zip(w.0.iter())
        .map(|((ac, bc), &wc)| (ac[0] * bc[0] + ac[1] * bc[1]) * wc)
        .sum()
}

/// Run one Gauss-Newton iteration for the active term `k`, accumulating
/// normal equations across every unflagged visibility in the chunk and
/// returning the updated gain (and, for parameterized terms, parameter)
/// arrays. `runtimes` is borrowed immutably for the whole chain so that
/// terms before/after `k` can be folded into the `Pre`/`Post` operators;
/// the caller is responsible for writing the result back into
/// `runtimes[k]` once this returns (no aliasing issue, since we never
/// mutate through the shared borrow).
pub fn run_iteration(
    chunk: &Chunk,
    flags: &ndarray::Array2<bool>,
    runtimes: &[TermRuntime],
    k: usize,
) -> (Array4<Jones<f64>>, Option<Array5<f64>>) {
    let active = &runtimes[k];
    let n_terms = runtimes.len();
    let shape = active.gain.dim();
    let n_param = active.params.as_ref().map_or(0, |p| p.dim().4);
    let mut acc = Accumulator::new(shape, n_param);

    let n_row = chunk.n_row();
    let n_chan = chunk.n_chan();

    for r in 0..n_row {
        let a1 = chunk.ant1[r];
        let a2 = chunk.ant2[r];
        for f in 0..n_chan {
            if flags[(r, f)] {
                continue;
            }
            let w = chunk.weights[(r, f)];
            if w.implicitly_flagged(chunk.corr_mode) {
                continue;
            }
            let d_data = chunk.data[(r, f)];

            // Full per-direction model estimate, needed to isolate each
            // direction's own residual (§4.3 step 1).
            let mut v_hat = Vec::with_capacity(chunk.n_dir);
            for d in 0..chunk.n_dir {
                let m_d = chunk.model[(r, f, d)];
                let pre_p = chain_product(runtimes, 0..k, r, f, a1, d);
                let pre_q = chain_product(runtimes, 0..k, r, f, a2, d);
                let post_p = chain_product(runtimes, (k + 1)..n_terms, r, f, a1, d);
                let post_q = chain_product(runtimes, (k + 1)..n_terms, r, f, a2, d);
                let gk_p = term_gain(active, r, f, a1, d);
                let gk_q = term_gain(active, r, f, a2, d);
                let estimate =
                    pre_p * gk_p * post_p * m_d * post_q.h() * gk_q.h() * pre_q.h();
                v_hat.push(estimate);
            }
            // R_total = D - sum_d(V_hat(d)) (§4.3 step 1).
            let sum_v = v_hat.iter().fold(Jones::default(), |a, &b| a + b);
            let r_total = d_data - sum_v;

            for d in 0..chunk.n_dir {
                let d_out = active.d_map[d];
                let m_d = chunk.model[(r, f, d)];
                let pre_p = chain_product(runtimes, 0..k, r, f, a1, d);
                let pre_q = chain_product(runtimes, 0..k, r, f, a2, d);
                let post_p = chain_product(runtimes, (k + 1)..n_terms, r, f, a1, d);
                let post_q = chain_product(runtimes, (k + 1)..n_terms, r, f, a2, d);
                let m_pp = post_p * m_d * post_q.h();

                let r_d = r_total + v_hat[d];
                let pre_p_inv = invert_jones(pre_p);
                let pre_q_inv = invert_jones(pre_q);
                let d_used = pre_p_inv * r_d * pre_q_inv.h();

                let gk_p = term_gain(active, r, f, a1, d);
                let gk_q = term_gain(active, r, f, a2, d);

                let tb_p = active.t_map[r];
                let fb_p = active.f_map[f];
                let tb_q = tb_p;
                let fb_q = fb_p;

                if active.params.is_none() {
                    // Unparameterized: direct-ratio MitchCal-style update,
                    // generalized with the chain-folded model/data above.
                    // §4.3 step 2 weights this the same way the parameterized
                    // branch below does (JᴴWJ/JᴴWR): the teacher's `di.rs`
                    // scales the model by the visibility weight before
                    // forming the numerator/denominator outer products
                    // ("Scale the model visibilities by weights"), which is
                    // equivalent to scaling top/bot by it directly here.
                    let wr = w.scalar();
                    let z_p = gk_q * m_pp.h();
                    acc.top[(tb_p, fb_p, a1, d_out)] += d_used * z_p * wr;
                    acc.bot[(tb_p, fb_p, a1, d_out)] += z_p.h() * z_p * wr;

                    let z_q = gk_p * m_pp;
                    acc.top[(tb_q, fb_q, a2, d_out)] += d_used.h() * z_q * wr;
                    acc.bot[(tb_q, fb_q, a2, d_out)] += z_q.h() * z_q * wr;
                } else {
                    let freq_hz = active.bin_freq[fb_p];
                    let lambda_sq = active.bin_lambda_sq[fb_p];
                    let corr_mode = chunk.corr_mode;
                    let params = active.params.as_ref().unwrap();

                    let z_p = gk_q * m_pp.h();
                    let z_q = gk_p * m_pp;
                    let resid_p = d_used - gk_p * z_p.h();
                    let resid_q = d_used.h() - gk_q * z_q.h();

                    for i in 0..n_param {
                        let params_p = params.slice(ndarray::s![tb_p, fb_p, a1, active.d_map[d], ..]);
                        let params_q = params.slice(ndarray::s![tb_q, fb_q, a2, active.d_map[d], ..]);
                        let dgp = active.spec.variant.dgain_dparam(
                            params_p.as_slice().unwrap(),
                            freq_hz,
                            lambda_sq,
                            corr_mode,
                            i,
                            active.freq_min,
                        );
                        let dgq = active.spec.variant.dgain_dparam(
                            params_q.as_slice().unwrap(),
                            freq_hz,
                            lambda_sq,
                            corr_mode,
                            i,
                            active.freq_min,
                        );

                        let j_p = dgp * z_p.h();
                        let j_q = dgq * z_q;

                        acc.jhj[(tb_p, fb_p, a1, d_out, i)] += weighted_real_inner(j_p, j_p, w);
                        acc.jhr[(tb_p, fb_p, a1, d_out, i)] += weighted_real_inner(j_p, resid_p, w);

                        acc.jhj[(tb_q, fb_q, a2, d_out, i)] += weighted_real_inner(j_q, j_q, w);
                        acc.jhr[(tb_q, fb_q, a2, d_out, i)] += weighted_real_inner(j_q, resid_q, w);
                    }
                }
            }
        }
    }

    if active.spec.solve_per == SolvePer::Array {
        reduce_over_antennas(&mut acc, active.params.is_some());
    }

    if active.params.is_none() {
        let mut new_gain = active.gain.clone();
        Zip::from(&mut new_gain)
            .and(&acc.top)
            .and(&acc.bot)
            .and(&active.gain_flags)
            .for_each(|g, &top, &bot, flag| {
                if flag.is_flagged() {
                    return;
                }
                let candidate = top * invert_jones(bot);
                if candidate.any_nan() {
                    return;
                }
                let update = *g - candidate;
                *g = *g - update * UPDATE_DAMPING;
            });
        (new_gain, None)
    } else {
        // §4.3 numerical policy: the delay variants accumulated JᴴJ/JᴴR
        // above against the ν/ν_min-scaled derivative, so the resulting
        // step is in scaled-parameter space; divide it back out before
        // adding to the real (unscaled) delay parameter. Every other
        // parameterized variant leaves `freq_min` unused, so this is a
        // no-op for them (`unscale == 1.0`).
        let unscale = if active.spec.variant.is_delay_like() && active.freq_min > 0.0 {
            1.0 / active.freq_min
        } else {
            1.0
        };
        let mut new_params = active.params.clone().unwrap();
        Zip::from(new_params.lanes_mut(ndarray::Axis(4)))
            .and(acc.jhj.lanes(ndarray::Axis(4)))
            .and(acc.jhr.lanes(ndarray::Axis(4)))
            .and(&active.param_flags)
            .for_each(|mut p, jhj, jhr, flag| {
                if flag.is_flagged() {
                    return;
                }
                for i in 0..p.len() {
                    let delta = invert_1x1(jhj[i]) * jhr[i] * unscale;
                    p[i] += delta * UPDATE_DAMPING;
                }
            });

        let mut new_gain = active.gain.clone();
        for ((tb, fb, a, d), g) in new_gain.indexed_iter_mut() {
            if active.gain_flags[(tb, fb, a, d)].is_flagged() {
                continue;
            }
            let freq_hz = active.bin_freq[fb];
            let lambda_sq = active.bin_lambda_sq[fb];
            let p = new_params.slice(ndarray::s![tb, fb, a, d, ..]);
            *g = active
                .spec
                .variant
                .params_to_gain(p.as_slice().unwrap(), freq_hz, lambda_sq, chunk.corr_mode);
        }

        (new_gain, Some(new_params))
    }
}

fn reduce_over_antennas(acc: &mut Accumulator, parameterized: bool) {
    let (n_tint, n_fint, n_ant, n_dir) = acc.top.dim();
    if parameterized {
        let n_param = acc.jhj.dim().4;
        for tb in 0..n_tint {
            for fb in 0..n_fint {
                for d in 0..n_dir {
                    for i in 0..n_param {
                        let mut jhj_sum = 0.0;
                        let mut jhr_sum = 0.0;
                        for a in 0..n_ant {
                            jhj_sum += acc.jhj[(tb, fb, a, d, i)];
                            jhr_sum += acc.jhr[(tb, fb, a, d, i)];
                        }
                        for a in 0..n_ant {
                            acc.jhj[(tb, fb, a, d, i)] = jhj_sum;
                            acc.jhr[(tb, fb, a, d, i)] = jhr_sum;
                        }
                    }
                }
            }
        }
    } else {
        for tb in 0..n_tint {
            for fb in 0..n_fint {
                for d in 0..n_dir {
                    let mut top_sum = Jones::default();
                    let mut bot_sum = Jones::default();
                    for a in 0..n_ant {
                        top_sum += acc.top[(tb, fb, a, d)];
                        bot_sum += acc.bot[(tb, fb, a, d)];
                    }
                    for a in 0..n_ant {
                        acc.top[(tb, fb, a, d)] = top_sum;
                        acc.bot[(tb, fb, a, d)] = bot_sum;
                    }
                }
            }
        }
    }
}
