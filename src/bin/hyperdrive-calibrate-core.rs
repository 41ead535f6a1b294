// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Thin binary entry point (§1, §4.6/§4.7 ADD). This program does not read
//! measurement sets or run a solve itself -- that needs the external
//! ingestion collaborator (§2 Non-goals) -- it only loads, overrides, and
//! validates a gain-term chain configuration and reports it, the way an
//! outer pipeline binary would before handing the validated
//! [`ChainSpec`](hyperdrive_calibrate_core::ChainSpec) to a real dispatcher.

use clap::Parser;
use console::style;
use hyperdrive_calibrate_core::Cli;
use log::info;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = hyperdrive_calibrate_core::logging::init(cli.verbose) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(1);
    }

    match cli.load_chain() {
        Ok(chain) => {
            info!(
                "validated chain: {} term(s), mad_flags.enable={}",
                chain.terms.len(),
                chain.mad_flags.enable
            );
            for term in chain.terms.iter() {
                info!(
                    "  {}: variant={:?} dd={} solve_per={:?} iters={}",
                    term.name, term.variant, term.direction_dependent, term.solve_per, term.iters
                );
            }
        }
        Err(e) => {
            eprintln!("{} {e}", style("error:").red().bold());
            std::process::exit(1);
        }
    }
}
