// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The chunk dispatcher (§4.2): partitions a full dataset along the row
//! (time) and channel axes into independent (row-chunk, chan-chunk) tasks
//! and runs the solver over each in parallel. Grounded on the teacher's
//! `di_calibrate::calibrate_timeblocks` / `calibrate_timeblock`
//! (`src/di_calibrate/mod.rs`), which does the same row(time)/chan(chanblock)
//! partitioning and dispatches chanblocks on a `rayon` `par_iter`; this
//! crate generalizes that to an explicit 2-D (row, chan) tile grid since the
//! solver contract (§6) chunks on both axes, not just frequency.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{s, Array1, Array2, Array3};
use rayon::prelude::*;
use thiserror::Error;

use crate::{
    chunk::Chunk,
    config::ChainSpec,
    corr::{CorrMode, CorrWeights},
    error::CalibrationError,
    solver::{self, SolveOutput},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("row-chunk boundary at row {0} splits a unique timestamp; ingestion contract violated (§6)")]
    SplitTimestamp(usize),

    #[error("dataset has no rows")]
    EmptyDataset,
}

/// The full dataset handed to the dispatcher, analogous to [`Chunk`] but
/// spanning every row and channel the caller wants calibrated (§6 upstream
/// collaborator contract: "xds-like records exposing the columns above").
#[derive(Debug, Clone)]
pub struct Dataset {
    pub data: Array2<marlu::Jones<f64>>,
    pub model: Array3<marlu::Jones<f64>>,
    pub weights: Array2<CorrWeights>,
    pub flags: Array2<bool>,
    pub ant1: Array1<usize>,
    pub ant2: Array1<usize>,
    pub time: Array1<f64>,
    pub chan_freq: Array1<f64>,
    pub chan_width: Array1<f64>,
    pub n_ant: usize,
    pub n_dir: usize,
    pub corr_mode: CorrMode,
}

impl Dataset {
    pub fn n_row(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn n_chan(&self) -> usize {
        self.data.shape()[1]
    }
}

/// The output of one (row-chunk, chan-chunk) task, tagged with its tile
/// coordinates so a downstream collaborator can reassemble the full grid.
#[derive(Debug)]
pub struct ChunkResult {
    pub row_chunk: usize,
    pub chan_chunk: usize,
    pub row_range: std::ops::Range<usize>,
    pub chan_range: std::ops::Range<usize>,
    pub solve: SolveOutput,
}

/// Row-chunk boundaries: contiguous row ranges, each covering whole unique
/// timestamps, grouping `timestamps_per_chunk` unique times per chunk (§4.2:
/// "a contiguous slab of rows covering one or more whole unique times").
fn row_chunk_boundaries(time: &Array1<f64>, timestamps_per_chunk: usize) -> Vec<std::ops::Range<usize>> {
    let n_row = time.len();
    if n_row == 0 {
        return Vec::new();
    }
    let mut boundaries = Vec::new();
    let mut chunk_start = 0usize;
    let mut last_time = time[0];
    let mut unique_seen = 1usize;
    for r in 1..n_row {
        if time[r] != last_time {
            unique_seen += 1;
            last_time = time[r];
            if unique_seen > timestamps_per_chunk {
                boundaries.push(chunk_start..r);
                chunk_start = r;
                unique_seen = 1;
            }
        }
    }
    boundaries.push(chunk_start..n_row);
    boundaries
}

/// Channel-chunk boundaries: contiguous channel ranges of `chan_per_chunk`
/// channels each, with the final chunk retained even if short.
fn chan_chunk_boundaries(n_chan: usize, chan_per_chunk: usize) -> Vec<std::ops::Range<usize>> {
    if n_chan == 0 {
        return Vec::new();
    }
    let chan_per_chunk = chan_per_chunk.max(1);
    (0..n_chan)
        .step_by(chan_per_chunk)
        .map(|start| start..(start + chan_per_chunk).min(n_chan))
        .collect()
}

/// Defensively check that a row-chunk boundary never splits a unique
/// timestamp (§4.2 ADD): a silent violation would corrupt the interval
/// mapper's bins in every chunk downstream.
fn validate_row_boundaries(
    time: &Array1<f64>,
    boundaries: &[std::ops::Range<usize>],
) -> Result<(), DispatchError> {
    for w in boundaries.windows(2) {
        let boundary_row = w[1].start;
        if time[boundary_row - 1] == time[boundary_row] {
            return Err(DispatchError::SplitTimestamp(boundary_row));
        }
    }
    Ok(())
}

fn slice_chunk(
    dataset: &Dataset,
    rows: std::ops::Range<usize>,
    chans: std::ops::Range<usize>,
) -> Chunk {
    Chunk {
        data: dataset.data.slice(s![rows.clone(), chans.clone()]).to_owned(),
        model: dataset
            .model
            .slice(s![rows.clone(), chans.clone(), ..])
            .to_owned(),
        weights: dataset.weights.slice(s![rows.clone(), chans.clone()]).to_owned(),
        flags: dataset.flags.slice(s![rows.clone(), chans.clone()]).to_owned(),
        ant1: dataset.ant1.slice(s![rows.clone()]).to_owned(),
        ant2: dataset.ant2.slice(s![rows.clone()]).to_owned(),
        time: dataset.time.slice(s![rows]).to_owned(),
        chan_freq: dataset.chan_freq.slice(s![chans.clone()]).to_owned(),
        chan_width: dataset.chan_width.slice(s![chans]).to_owned(),
        n_ant: dataset.n_ant,
        n_dir: dataset.n_dir,
        corr_mode: dataset.corr_mode,
    }
}

/// Partition `dataset` into (row-chunk, chan-chunk) tiles and solve every
/// tile independently in parallel on the `rayon` global thread pool (§4.2,
/// §5: "parallel tasks at chunk granularity ... no shared mutable state").
/// Ordering between tasks is irrelevant; `draw_progress_bar` mirrors the
/// teacher's `make_calibration_progress_bar` gate so headless/test runs stay
/// quiet.
pub fn dispatch_chunks(
    dataset: &Dataset,
    chain: &ChainSpec,
    timestamps_per_chunk: usize,
    chan_per_chunk: usize,
    draw_progress_bar: bool,
) -> Result<Vec<ChunkResult>, CalibrationError> {
    if dataset.n_row() == 0 {
        return Err(DispatchError::EmptyDataset.into());
    }

    let row_chunks = row_chunk_boundaries(&dataset.time, timestamps_per_chunk);
    validate_row_boundaries(&dataset.time, &row_chunks)?;
    let chan_chunks = chan_chunk_boundaries(dataset.n_chan(), chan_per_chunk);

    let row_chunks = &row_chunks;
    let chan_chunks = &chan_chunks;

    let tasks: Vec<(usize, usize)> = (0..row_chunks.len())
        .flat_map(|rc| (0..chan_chunks.len()).map(move |cc| (rc, cc)))
        .collect();

    let progress = ProgressBar::with_draw_target(
        Some(tasks.len() as u64),
        if draw_progress_bar {
            ProgressDrawTarget::stdout()
        } else {
            ProgressDrawTarget::hidden()
        },
    )
    .with_style(
        ProgressStyle::default_bar()
            .template("{msg}: [{wide_bar:.blue}] {pos:3}/{len:3} chunks ({elapsed_precise}<{eta_precise})")
            .unwrap()
            .progress_chars("=> "),
    )
    .with_message("Calibrating");

    let results: Result<Vec<ChunkResult>, CalibrationError> = tasks
        .into_par_iter()
        .map(|(rc, cc)| {
            let rows = row_chunks[rc].clone();
            let chans = chan_chunks[cc].clone();
            let mut chunk = slice_chunk(dataset, rows.clone(), chans.clone());
            chunk.flag_non_finite();
            let solve = solver::solve_chunk(&chunk, chain)?;
            progress.inc(1);
            Ok(ChunkResult {
                row_chunk: rc,
                chan_chunk: cc,
                row_range: rows,
                chan_range: chans,
                solve,
            })
        })
        .collect();

    match &results {
        Ok(_) => progress.abandon_with_message("Calibration complete"),
        Err(_) => progress.abandon_with_message("Calibration failed"),
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_chunks_group_whole_timestamps() {
        let time = Array1::from(vec![0.0, 0.0, 1.0, 2.0, 2.0, 3.0]);
        let chunks = row_chunk_boundaries(&time, 2);
        assert_eq!(chunks, vec![0..3, 3..6]);
        assert!(validate_row_boundaries(&time, &chunks).is_ok());
    }

    #[test]
    fn chan_chunks_retain_short_final_chunk() {
        let chunks = chan_chunk_boundaries(5, 2);
        assert_eq!(chunks, vec![0..2, 2..4, 4..5]);
    }

    #[test]
    fn row_chunk_splitting_a_timestamp_is_detected() {
        // Construct boundaries by hand that violate the contract.
        let time = Array1::from(vec![0.0, 1.0, 1.0, 2.0]);
        let bad = vec![0..2, 2..4];
        assert!(matches!(
            validate_row_boundaries(&time, &bad),
            Err(DispatchError::SplitTimestamp(2))
        ));
    }
}
