// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Thin CLI wrapper around [`crate::config::Config`] (§4.6 ADD). Grounded on
//! the teacher's `CalibrateUserArgs` in `calibrate/args.rs` -- "arguments
//! that are exposed to users, all optional" -- but expressed with `clap`'s
//! derive API rather than `structopt` (the teacher's own dependency list
//! carries both across its history; this crate standardises on `clap`
//! since it is the actively maintained successor and the only one of the
//! two this crate actually needs).
//!
//! This binary-facing layer does not touch measurement sets or any other
//! ingestion concern (§1 Non-goals); it only loads and validates a
//! [`RawConfig`](crate::config::RawConfig) file and reports the resulting
//! [`ChainSpec`](crate::config::ChainSpec), the way a real pipeline's outer
//! binary would before handing the validated chain to the ingestion
//! collaborator and the dispatcher.

use std::path::PathBuf;

use clap::Parser;

use crate::{
    config::{ChainSpec, Config},
    error::CalibrationError,
};

/// Command-line arguments for the calibration-core CLI. All arguments
/// except `config` are optional, following the teacher's "all arguments
/// should be optional" convention.
#[derive(Parser, Debug)]
#[clap(
    name = "hyperdrive-calibrate-core",
    about = "Validate and report a gain-term chain configuration",
    version
)]
pub struct Cli {
    /// Path to a YAML or TOML configuration file (§4.6, §6 configuration
    /// surface).
    #[clap(short, long, parse(from_os_str))]
    pub config: PathBuf,

    /// Increase logging verbosity; may be specified more than once.
    #[clap(short, long, parse(from_occurrences))]
    pub verbose: u8,

    /// Override `solver.reference_antenna` for every term that doesn't set
    /// its own.
    #[clap(long)]
    pub reference_antenna: Option<usize>,

    /// Suppress the `indicatif` progress bar (useful for headless runs and
    /// CI logs).
    #[clap(long)]
    pub no_progress_bar: bool,
}

impl Cli {
    /// Load, override, and validate the configuration named on the command
    /// line, returning the validated [`ChainSpec`] a dispatcher consumes.
    pub fn load_chain(&self) -> Result<ChainSpec, CalibrationError> {
        let mut config = Config::load(&self.config)?;
        if let Some(reference_antenna) = self.reference_antenna {
            config.0.reference_antenna = Some(reference_antenna);
        }
        Ok(config.validate()?)
    }
}
