// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all calibration-core errors. This should be the *only*
//! error enum that is publicly visible.

use thiserror::Error;

use crate::{config::ConfigError, dispatch::DispatchError, interval::IntervalError};

/// The *only* publicly visible error from this crate.
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// A configuration or chain-assembly error (§7, class 1). These are
    /// fail-fast: they're detected before any chunk is dispatched.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An error building the per-term interval mapping tables (§4.1).
    #[error("interval mapping error: {0}")]
    Interval(#[from] IntervalError),

    /// An error partitioning the dataset into chunks (§4.2).
    #[error("chunk dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// A shape mismatch between two tensors that should agree. This is a
    /// programming-contract violation at the solver boundary (§6), not a
    /// per-cell data issue, so it surfaces rather than being absorbed.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}
