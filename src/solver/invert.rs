// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Closed-form inversion of the small dense JᴴJ blocks (§4.3 step 4).
//! Unparameterized terms invert a full complex 2x2 Jones matrix (reusing
//! `marlu::Jones::inv`, which is exactly the "4x4 real via blockwise
//! inversion" the spec describes, expressed in complex arithmetic);
//! parameterized terms invert a plain real scalar, since every
//! parameterized variant this crate implements has a block-diagonal JᴴJ
//! (see [`invert_1x1`]). Every division-by-zero path returns 0 rather than
//! NaN (§7 class 3).

use marlu::Jones;

/// Safe reciprocal: `0/0` and `x/0` both yield `0`, never NaN or Inf.
pub fn safe_div(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Invert a 2x2 complex Jones matrix, mapping a singular (zero-determinant)
/// input to the zero matrix instead of NaN (§4.3 numerical policy).
pub fn invert_jones(j: Jones<f64>) -> Jones<f64> {
    let det = j[0] * j[3] - j[1] * j[2];
    if det.norm_sqr() == 0.0 {
        return Jones::default();
    }
    let inv = j.inv();
    if inv.any_nan() {
        Jones::default()
    } else {
        inv
    }
}

/// Invert a 1x1 "matrix" (plain reciprocal with the zero-safe policy). Every
/// parameterized variant this crate implements produces a structurally
/// block-diagonal per-parameter JᴴJ (`accumulate::run_iteration`'s
/// `dgain_dparam` calls never mix two parameter slots into the same Jones
/// entry), so each parameter's normal equation inverts independently as a
/// 1x1, never needing the general `n_param x n_param` block inversion §4.3
/// step 4 allows for.
pub fn invert_1x1(m: f64) -> f64 {
    safe_div(1.0, m)
}
