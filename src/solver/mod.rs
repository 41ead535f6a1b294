// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The gain solver (§4.3): the outer round-robin loop over a chain's terms,
//! each driving `accumulate::run_iteration` through its own inner
//! Gauss-Newton loop and the §4.4a flagging state machine, until it
//! converges, hits `max_iters`, or exhausts its iteration budget. Grounded
//! on the teacher's `calibrate()` function in `src/calibrate/di.rs`, which
//! drives the same accumulate/invert/update/flag loop for a single
//! direction-independent term; this generalizes it to a chain of
//! heterogeneous terms (§4.3's "terms are solved round-robin").

pub mod accumulate;
pub mod initial_estimate;
pub mod invert;
pub mod state;
pub mod statistics;
pub mod term;

use marlu::Jones;
use ndarray::{Array2, Array4, Array5};

use crate::{
    chunk::Chunk,
    config::ChainSpec,
    constants::MAX_MAD_ROUNDS,
    error::CalibrationError,
    flagging::{self, CellFlag},
    solver::state::TermRuntime,
};

/// Solved output for one term in the chain (§6 solver output contract).
/// Carries the interval mapping tables alongside the solved tensors so a
/// downstream collaborator (the dispatcher's output stage, §4.5) can index
/// into `gains`/`gain_flags` per visibility without re-deriving the maps.
#[derive(Debug, Clone)]
pub struct TermOutput {
    pub name: String,
    pub direction_dependent: bool,
    pub gains: Array4<Jones<f64>>,
    pub gain_flags: Array4<CellFlag>,
    pub params: Option<Array5<f64>>,
    pub t_map: Vec<usize>,
    pub f_map: Vec<usize>,
    pub d_map: Vec<usize>,
    pub iter_count: u32,
    pub converged_percentage: f64,
    /// Post-solve noise-to-signal diagnostic per solution cell
    /// (`crate::solver::statistics::prior_gain_error`), not consumed by the
    /// solve loop itself; exposed for a caller reporting per-term solution
    /// quality alongside the gains.
    pub prior_gain_error: Array4<f64>,
}

impl TermOutput {
    /// The solved gain at visibility `(row, chan)`, antenna `ant`, source
    /// direction `dir` (indexed through `d_map`, not the output direction
    /// axis directly).
    pub fn gain_at(&self, row: usize, chan: usize, ant: usize, dir: usize) -> Jones<f64> {
        self.gains[(self.t_map[row], self.f_map[chan], ant, self.d_map[dir])]
    }

    pub fn is_flagged_at(&self, row: usize, chan: usize, ant: usize, dir: usize) -> bool {
        self.gain_flags[(self.t_map[row], self.f_map[chan], ant, self.d_map[dir])].is_flagged()
    }
}

/// The full per-chunk solve output: one [`TermOutput`] per term, in chain
/// order, plus the final per-visibility data flag column (§4.4b: "new flags
/// are OR-ed into the data flag column"), which may carry extra flags the
/// post-solve MAD flagger added beyond `chunk.flags` -- the caller (an
/// ingestion/output collaborator) is responsible for writing these back.
#[derive(Debug, Clone)]
pub struct SolveOutput {
    pub terms: Vec<TermOutput>,
    pub data_flags: Array2<bool>,
}

/// Solve every term in `chain` against `chunk`, round-robin, one full sweep
/// of the chain (§4.3 "outer loop"), then run the §4.4b post-solve residual
/// MAD flagger and, as long as it keeps adding flags, re-solve the whole
/// chain against the growing flag set (§1: "the iterative outlier-flagging
/// loop that gates convergence"). Term order is fixed by `chain` and must
/// not be reordered: the observation model depends on it (§5).
///
/// Per-cell data degeneracies (missing antennas, non-finite input, singular
/// normal equations) are absorbed locally by the flagging controller and
/// never surface here (§7); only configuration/shape mismatches between
/// `chunk` and `chain` do.
pub fn solve_chunk(chunk: &Chunk, chain: &ChainSpec) -> Result<SolveOutput, CalibrationError> {
    chunk.validate().map_err(CalibrationError::ShapeMismatch)?;

    let mut data_flags = chunk.flags.clone();
    let mut terms = run_chain(chunk, chain, &data_flags)?;

    if chain.mad_flags.enable {
        for _ in 0..MAX_MAD_ROUNDS {
            let vis = crate::output::compute(chunk, &terms);
            let before = data_flags.clone();
            flagging::mad_flag(
                &vis.residual,
                &chunk.weights,
                &mut data_flags,
                &chunk.ant1,
                &chunk.ant2,
                &chain.mad_flags,
            );
            if data_flags == before {
                break;
            }
            terms = run_chain(chunk, chain, &data_flags)?;
        }
    }

    Ok(SolveOutput { terms, data_flags })
}

/// One full round-robin sweep of `chain` against `chunk`, starting every
/// term's aggregate flag buffer from `data_flags` (§4.3 "outer loop").
/// Factored out of [`solve_chunk`] so the MAD re-flagging loop can re-run it
/// against a growing flag set without re-deriving anything else.
fn run_chain(
    chunk: &Chunk,
    chain: &ChainSpec,
    data_flags: &Array2<bool>,
) -> Result<Vec<TermOutput>, CalibrationError> {
    let mut runtimes: Vec<TermRuntime> = chain
        .terms
        .iter()
        .map(|spec| TermRuntime::new(chunk, spec.clone()))
        .collect::<Result<Vec<TermRuntime>, crate::interval::IntervalError>>()?;

    // Aggregate per-visibility flags, mutated as direction-independent terms
    // finalize so that later terms in the chain see consistent masking
    // (§4.3 "Finalization per term").
    let mut agg_flags = data_flags.clone();

    for k in 0..runtimes.len() {
        initial_estimate::maybe_seed_delay(chunk, &mut runtimes[k]);
        run_term(chunk, &mut agg_flags, &mut runtimes, k);
    }

    Ok(runtimes
        .into_iter()
        .map(|rt| {
            let prior_gain_error = statistics::prior_gain_error(chunk, &rt);
            TermOutput {
                name: rt.spec.name.clone(),
                direction_dependent: rt.spec.direction_dependent,
                gains: rt.gain,
                gain_flags: rt.gain_flags,
                params: rt.params,
                t_map: rt.t_map,
                f_map: rt.f_map,
                d_map: rt.d_map,
                iter_count: rt.iter_count,
                converged_percentage: rt.converged_percentage,
                prior_gain_error,
            }
        })
        .collect())
}

/// Drive one term's inner Gauss-Newton loop to convergence, max iterations,
/// or the configured stop fraction (§4.3 steps 1-7, state machine), then run
/// finalization (§4.3 "Finalization per term", §4.4a finalization).
fn run_term(chunk: &Chunk, agg_flags: &mut Array2<bool>, runtimes: &mut [TermRuntime], k: usize) {
    let max_iters = runtimes[k].spec.iters;
    let stop_frac = runtimes[k].spec.stop_frac;
    let stop_crit = runtimes[k].spec.stop_crit;

    let mut iter_count = 0u32;
    let mut conv_perc = 0.0f64;

    for i in 0..max_iters {
        iter_count = i + 1;
        let (new_gain, new_params) = accumulate::run_iteration(chunk, agg_flags, runtimes, k);

        let rt = &mut runtimes[k];
        rt.gain = new_gain;
        if new_params.is_some() {
            rt.params = new_params;
        }
        conv_perc = flagging::update_gain_flags(&rt.gain, &mut rt.gain_flags, &mut rt.flag_imdry, stop_crit);

        if conv_perc > stop_frac {
            break;
        }
    }

    let rt = &mut runtimes[k];
    rt.iter_count = iter_count;
    rt.converged_percentage = conv_perc;

    // §4.4a finalization: soft -> hard flag promotion, gain reset to
    // identity at hard/missing cells.
    flagging::finalize_gain_flags(&mut rt.gain, &mut rt.gain_flags, &rt.flag_imdry);

    // Copy gain flags onto parameter flags via the term's t_map/f_map
    // (§4.3 "Finalization per term"). This implementation's parameter-space
    // maps always coincide with the gain maps (§4.1 ADD, DESIGN.md), so the
    // copy is a direct clone rather than a re-indexed scatter.
    rt.param_flags = rt.gain_flags.clone();

    // If the active term is direction-independent, propagate its finalized
    // gain flags onto the aggregate per-visibility flag buffer so later
    // terms in the chain mask consistently.
    if !rt.spec.direction_dependent {
        propagate_flags_to_aggregate(chunk, rt, agg_flags);
    }
}

/// OR a direction-independent term's hard/missing solution-cell flags into
/// the chunk-wide aggregate visibility flag buffer (§4.3 "Finalization per
/// term"). Since the term is direction-independent, every direction maps to
/// gain-direction slot 0.
fn propagate_flags_to_aggregate(chunk: &Chunk, rt: &TermRuntime, agg_flags: &mut Array2<bool>) {
    for r in 0..chunk.n_row() {
        let tb = rt.t_map[r];
        let a1 = chunk.ant1[r];
        let a2 = chunk.ant2[r];
        for f in 0..chunk.n_chan() {
            if agg_flags[(r, f)] {
                continue;
            }
            let fb = rt.f_map[f];
            let flagged =
                rt.gain_flags[(tb, fb, a1, 0)].is_flagged() || rt.gain_flags[(tb, fb, a2, 0)].is_flagged();
            if flagged {
                agg_flags[(r, f)] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{SolvePer, TermSpec},
        corr::{CorrMode, CorrWeights},
        interval::IntervalSize,
        solver::term::TermVariant,
    };
    use marlu::c64;
    use ndarray::{Array1, Array2, Array3};

    fn identity_chunk() -> Chunk {
        let n_row = 3;
        let n_chan = 2;
        let model_vis = Jones::identity();
        Chunk {
            data: Array2::from_elem((n_row, n_chan), model_vis),
            model: Array3::from_elem((n_row, n_chan, 1), model_vis),
            weights: Array2::from_elem((n_row, n_chan), CorrWeights([1.0, 0.0, 0.0, 1.0])),
            flags: Array2::from_elem((n_row, n_chan), false),
            ant1: Array1::from_vec(vec![0, 0, 1]),
            ant2: Array1::from_vec(vec![1, 2, 2]),
            time: Array1::from_elem(n_row, 0.0),
            chan_freq: Array1::from_vec(vec![150e6, 151e6]),
            chan_width: Array1::from_elem(n_chan, 1e6),
            n_ant: 3,
            n_dir: 1,
            corr_mode: CorrMode::Full,
        }
    }

    fn complex_term_spec() -> TermSpec {
        TermSpec {
            name: "g".to_string(),
            variant: TermVariant::Complex,
            time_interval: IntervalSize::WholeChunk,
            freq_interval: IntervalSize::WholeChunk,
            direction_dependent: false,
            iters: 1,
            solve_per: SolvePer::Antenna,
            stop_frac: 0.99,
            stop_crit: 1e-8,
            initial_estimate: false,
            reference_antenna: None,
        }
    }

    /// §8 scenario 1: identity solve. `data == model`, one `complex` term,
    /// one iteration. Expect gains ~= I and full convergence.
    #[test]
    fn identity_solve_converges_to_identity_gains() {
        let chunk = identity_chunk();
        let chain = ChainSpec {
            terms: vec1::vec1![complex_term_spec()],
            mad_flags: crate::config::MadFlagConfig::default(),
        };
        let out = solve_chunk(&chunk, &chain).unwrap();
        assert_eq!(out.terms.len(), 1);
        let term = &out.terms[0];
        assert_eq!(term.converged_percentage, 1.0);
        for g in term.gains.iter() {
            assert!((g[0] - c64::new(1.0, 0.0)).norm() < 1e-6);
            assert!((g[3] - c64::new(1.0, 0.0)).norm() < 1e-6);
        }
    }

    /// §8 invariant 2: `gain_flags[k] != 0` implies `gains[k] == identity`.
    #[test]
    fn flagged_cells_are_identity() {
        let mut chunk = identity_chunk();
        // Flag every visibility touching antenna 2 so its solution cell is
        // missing.
        for r in 0..chunk.n_row() {
            if chunk.ant1[r] == 2 || chunk.ant2[r] == 2 {
                for f in 0..chunk.n_chan() {
                    chunk.flags[(r, f)] = true;
                    chunk.weights[(r, f)] = CorrWeights::zero();
                }
            }
        }
        let chain = ChainSpec {
            terms: vec1::vec1![complex_term_spec()],
            mad_flags: crate::config::MadFlagConfig::default(),
        };
        let out = solve_chunk(&chunk, &chain).unwrap();
        let term = &out.terms[0];
        for ((_, _, ant, _), flag) in term.gain_flags.indexed_iter() {
            if ant == 2 {
                assert!(flag.is_flagged());
            }
        }
        for ((_, _, ant, _), g) in term.gains.indexed_iter() {
            if ant == 2 {
                assert_eq!(*g, Jones::identity());
            }
        }
    }

    /// Mixed dependence is refused at config time, not here; a chain solve
    /// with a single direction-independent term should leave the aggregate
    /// flag buffer untouched when nothing is flagged.
    #[test]
    fn unflagged_chunk_propagates_no_new_flags() {
        let chunk = identity_chunk();
        let chain = ChainSpec {
            terms: vec1::vec1![complex_term_spec()],
            mad_flags: crate::config::MadFlagConfig::default(),
        };
        let out = solve_chunk(&chunk, &chain).unwrap();
        assert_eq!(out.terms[0].iter_count, 1);
    }
}
