// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Compile-time constants used throughout the solver.

/// Trend threshold above which a diverging solution-cell gets a soft flag
/// (§4.4a). The source code calls this value unexplained; it is reproduced
/// verbatim rather than re-derived.
pub(crate) const DIVERGENCE_TREND_THRESHOLD: i32 = 2;

/// Default damping factor applied to every Gauss-Newton update (§4.3 step 5).
/// Empirically stable for this observation model; not derived from theory.
pub(crate) const UPDATE_DAMPING: f64 = 0.5;

/// Default MAD flagger thresholds (§4.4b), used when a [`crate::config::Config`]
/// does not override them.
pub(crate) const DEFAULT_MAD_THRESHOLD_BL: f64 = 5.0;
pub(crate) const DEFAULT_MAD_THRESHOLD_GLOBAL: f64 = 5.0;
pub(crate) const DEFAULT_MAD_MAX_DEVIATION: f64 = 10.0;

/// `1.4826` converts a median absolute deviation into an estimate of a
/// Gaussian standard deviation.
pub(crate) const MAD_TO_SIGMA: f64 = 1.4826;

/// Speed of light \[m/s\], used to convert channel frequency to wavelength
/// for the rotation-measure term.
pub(crate) const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Maximum number of flag/resolve rounds the MAD flagger is allowed to drive
/// (§4.4b, §1 "iterative outlier-flagging loop that gates convergence"): each
/// round re-solves the whole chain against the newly-flagged data, since a
/// flagged visibility changes the normal equations every later term sees.
/// Stops early as soon as a round adds no new flags.
pub(crate) const MAX_MAD_ROUNDS: u32 = 3;

/// The "egregious fudge factor of four" in the prior-gain-error diagnostic
/// (`sqrt(4 * sigma^2 / (n_eqs * avg_abs_model_sqrd))`). The source notes
/// this was kept only for consistency with an older version that didn't
/// count correlations properly, and flags it as unresolved; reproduced
/// verbatim, not derived.
pub(crate) const PRIOR_GAIN_ERROR_FUDGE: f64 = 4.0;
