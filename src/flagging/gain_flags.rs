// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-iteration gain flagging (§4.4a): a small trend state machine per
//! solution cell that decides convergence and promotes persistently
//! diverging cells to soft, then hard, flags.

use marlu::Jones;
use ndarray::{Array4, Zip};

use crate::constants::DIVERGENCE_TREND_THRESHOLD;

/// A solution-cell flag (§3: `gain_flags[k]` is int8; nonzero means
/// flagged). Kept as a small enum internally so finalisation can tell a
/// soft flag from a hard one and from a missing cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CellFlag {
    #[default]
    Ok,
    /// Persistently diverging; becomes [`CellFlag::Hard`] at finalisation
    /// if the trend doesn't recover (§4.4a finalisation).
    Soft,
    /// Gain forced to identity; downstream terms see this cell as flagged.
    Hard,
    /// No unflagged data fell in this interval at all.
    Missing,
}

impl CellFlag {
    pub fn is_flagged(self) -> bool {
        !matches!(self, CellFlag::Ok)
    }
}

/// Trend-tracking intermediaries, one set per term, carried across
/// iterations of that term's inner Gauss-Newton loop (§4.4a).
pub struct FlagIntermediaries {
    pub km1_gain: Array4<Jones<f64>>,
    pub km1_abs2_diff: ndarray::Array4<f64>,
    pub trend: ndarray::Array4<i32>,
}

impl FlagIntermediaries {
    pub fn new(shape: (usize, usize, usize, usize)) -> Self {
        Self {
            km1_gain: Array4::from_elem(shape, Jones::identity()),
            km1_abs2_diff: ndarray::Array4::from_elem(shape, f64::INFINITY),
            trend: ndarray::Array4::zeros(shape),
        }
    }
}

/// Update gain flags for one iteration (§4.4a). Returns
/// `converged_percentage` = converged cells / total unflagged cells.
///
/// `missing` marks cells with no unflagged equations at all (set once,
/// before the first iteration, by the accumulator).
pub fn update_gain_flags(
    gain: &Array4<Jones<f64>>,
    gain_flags: &mut Array4<CellFlag>,
    imdry: &mut FlagIntermediaries,
    stop_crit: f64,
) -> f64 {
    let mut converged = 0usize;
    let mut unflagged = 0usize;

    Zip::from(gain)
        .and(gain_flags)
        .and(&mut imdry.km1_gain)
        .and(&mut imdry.km1_abs2_diff)
        .and(&mut imdry.trend)
        .for_each(|&g, flag, km1_gain, km1_abs2, trend| {
            if *flag == CellFlag::Missing || *flag == CellFlag::Hard {
                return;
            }
            unflagged += 1;

            let diff = g - *km1_gain;
            let abs2: f64 = diff.norm_sqr().iter().sum();

            if abs2 < stop_crit {
                converged += 1;
                *trend -= 1;
            } else if abs2 > *km1_abs2 {
                *trend += 1;
                if *trend > DIVERGENCE_TREND_THRESHOLD {
                    *flag = CellFlag::Soft;
                }
            }

            *km1_abs2 = abs2;
            *km1_gain = g;
        });

    if unflagged == 0 {
        1.0
    } else {
        converged as f64 / unflagged as f64
    }
}

/// Finalisation (§4.4a): soft flags become hard flags iff the diverging
/// trend persisted through the final iteration; hard-flagged cells have
/// their gain reset to identity. Running this twice on an already-final
/// chunk is a no-op (§8 invariant 6): a cell already `Hard` stays `Hard`
/// and its gain is already identity.
pub fn finalize_gain_flags(
    gain: &mut Array4<Jones<f64>>,
    gain_flags: &mut Array4<CellFlag>,
    imdry: &FlagIntermediaries,
) {
    Zip::from(gain)
        .and(gain_flags)
        .and(&imdry.trend)
        .for_each(|g, flag, &trend| {
            if *flag == CellFlag::Soft && trend > DIVERGENCE_TREND_THRESHOLD {
                *flag = CellFlag::Hard;
            }
            if *flag == CellFlag::Hard || *flag == CellFlag::Missing {
                *g = Jones::identity();
            }
        });
}
