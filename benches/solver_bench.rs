// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::*;

use hyperdrive_calibrate_core::{
    chunk::Chunk,
    config::{ChainSpec, MadFlagConfig, SolvePer, TermSpec},
    corr::{CorrMode, CorrWeights},
    interval::IntervalSize,
    solver::{solve_chunk, term::TermVariant},
};
use marlu::Jones;
use ndarray::{Array1, Array2, Array3};

fn identity_chunk(n_ant: usize, n_chan: usize) -> Chunk {
    let mut ant1 = Vec::new();
    let mut ant2 = Vec::new();
    for a in 0..n_ant {
        for b in (a + 1)..n_ant {
            ant1.push(a);
            ant2.push(b);
        }
    }
    let n_row = ant1.len();
    let model_vis = Jones::identity();
    Chunk {
        data: Array2::from_elem((n_row, n_chan), model_vis),
        model: Array3::from_elem((n_row, n_chan, 1), model_vis),
        weights: Array2::from_elem((n_row, n_chan), CorrWeights([1.0, 0.0, 0.0, 1.0])),
        flags: Array2::from_elem((n_row, n_chan), false),
        ant1: Array1::from_vec(ant1),
        ant2: Array1::from_vec(ant2),
        time: Array1::from_elem(n_row, 0.0),
        chan_freq: Array1::from_shape_fn(n_chan, |f| 150e6 + f as f64 * 1e5),
        chan_width: Array1::from_elem(n_chan, 1e5),
        n_ant,
        n_dir: 1,
        corr_mode: CorrMode::Full,
    }
}

fn complex_chain() -> ChainSpec {
    ChainSpec {
        terms: vec1::vec1![TermSpec {
            name: "g".to_string(),
            variant: TermVariant::Complex,
            time_interval: IntervalSize::WholeChunk,
            freq_interval: IntervalSize::WholeChunk,
            direction_dependent: false,
            iters: 20,
            solve_per: SolvePer::Antenna,
            stop_frac: 0.99,
            stop_crit: 1e-8,
            initial_estimate: false,
            reference_antenna: None,
        }],
        mad_flags: MadFlagConfig::default(),
    }
}

fn solve_one_chunk(c: &mut Criterion) {
    let chunk = identity_chunk(128, 24);
    let chain = complex_chain();

    c.bench_function("solve a 128-antenna, 24-channel identity chunk", |b| {
        b.iter(|| {
            solve_chunk(black_box(&chunk), black_box(&chain)).unwrap();
        })
    });
}

criterion_group!(benches, solve_one_chunk);
criterion_main!(benches);
