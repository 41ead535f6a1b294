// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Core Gauss-Newton gain solver for radio-interferometric
//! direction-(in)dependent calibration.
//!
//! This crate is the hard core of a calibration pipeline: the per-chunk
//! complex Gauss-Newton/LM solver (`solver`), the interval mapper
//! (`interval`) and chunk dispatcher (`dispatch`) that feed it, the
//! flagging controller (`flagging`) that gates its convergence, and the
//! blockwise visibility output (`output`) that applies a solved chain back
//! to data. Ingestion (measurement-set I/O, sky-model assembly, on-disk
//! solution formats) is an external collaborator and is out of scope.

pub mod chunk;
pub mod cli;
pub mod config;
pub(crate) mod constants;
pub mod corr;
pub mod dispatch;
pub mod error;
pub mod flagging;
pub mod interval;
pub mod logging;
pub mod output;
pub mod solver;

pub use cli::Cli;
pub use config::{ChainSpec, Config, RawConfig, TermSpec};
pub use error::CalibrationError;
