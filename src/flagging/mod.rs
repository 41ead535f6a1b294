// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The flagging controller (§4.4): per-iteration gain-flag trend tracking
//! (§4.4a) and post-solve residual MAD flagging (§4.4b).

pub mod gain_flags;
pub mod mad;

pub use gain_flags::{finalize_gain_flags, update_gain_flags, CellFlag, FlagIntermediaries};
pub use mad::mad_flag;
