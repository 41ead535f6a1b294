// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The interval mapper (§4.1): turns per-row times, per-channel
//! frequencies, and a term's requested interval size into `t_map`/`f_map`
//! lookup tables, plus the coarser parameter-space `tp_map`/`fp_map` pair
//! used by parameterized terms (§4.1 ADD).

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IntervalError {
    #[error("interval size must be positive or zero (whole chunk), got {0}")]
    NonPositive(f64),
}

/// A term's requested interval size, as accepted from the configuration
/// surface (§6): an integer count of unique keys, a floating-point duration,
/// or "the whole chunk".
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntervalSize {
    Count(usize),
    Duration(f64),
    WholeChunk,
}

impl IntervalSize {
    pub fn validate(self) -> Result<(), IntervalError> {
        match self {
            IntervalSize::Count(0) => Err(IntervalError::NonPositive(0.0)),
            IntervalSize::Duration(d) if d <= 0.0 => Err(IntervalError::NonPositive(d)),
            _ => Ok(()),
        }
    }
}

/// The mapping tables produced for one axis (time or frequency) of one term.
#[derive(Debug, Clone)]
pub struct AxisMap {
    /// `map[row_or_chan] -> bin`. Guarantee: every input maps into exactly
    /// one bin; bins are contiguous and non-decreasing along sorted input.
    pub map: Vec<usize>,
    pub n_bins: usize,
}

/// Bin a sequence of sorted unique keys (unique times, or channels in
/// frequency order) with associated widths, per §4.1:
/// - `Count(n)`: accumulate until `n` keys have been grouped.
/// - `Duration(d)`: accumulate cumulative width until it meets/exceeds `d`.
/// - `WholeChunk`: a single bin.
/// The final partial bin is retained even if short.
fn bin_keys(widths: &[f64], interval: IntervalSize) -> Vec<usize> {
    let n = widths.len();
    if n == 0 {
        return Vec::new();
    }
    match interval {
        IntervalSize::WholeChunk => vec![0; n],
        IntervalSize::Count(count) => (0..n).map(|i| i / count).collect(),
        IntervalSize::Duration(dur) => {
            let mut bins = Vec::with_capacity(n);
            let mut bin = 0usize;
            let mut acc = 0.0;
            for &w in widths {
                if acc >= dur && acc > 0.0 {
                    bin += 1;
                    acc = 0.0;
                }
                bins.push(bin);
                acc += w;
            }
            bins
        }
    }
}

/// Build `t_map[row] -> time-bin` for one term, given the per-row times of
/// the chunk. Times need not be sorted or unique in `times`; this function
/// derives the sorted-unique set itself (§4.1: "consecutive unique times
/// accumulate").
pub fn build_time_map(
    times: &[f64],
    interval: IntervalSize,
) -> Result<AxisMap, IntervalError> {
    interval.validate()?;

    // Sorted unique times -> their index in the sorted-unique sequence.
    let mut seen: BTreeMap<u64, ()> = BTreeMap::new();
    let mut sorted_unique = Vec::new();
    for &t in times {
        let key = float_key(t);
        if seen.insert(key, ()).is_none() {
            sorted_unique.push(t);
        }
    }
    sorted_unique.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mut index_of = BTreeMap::new();
    for (i, &t) in sorted_unique.iter().enumerate() {
        index_of.insert(float_key(t), i);
    }

    // Consecutive unique times accumulate; "duration" intervals need a
    // width per unique time. Since timestamps don't carry an intrinsic
    // width, we use the gap to the next unique time (last bin reuses the
    // previous gap), which is the natural analogue of a channel width.
    let widths = gaps(&sorted_unique);
    let unique_bins = bin_keys(&widths, interval);

    let map = times
        .iter()
        .map(|&t| {
            let idx = *index_of.get(&float_key(t)).unwrap();
            unique_bins[idx]
        })
        .collect();

    let n_bins = unique_bins.last().map_or(0, |&b| b + 1);
    Ok(AxisMap { map, n_bins })
}

/// Build `f_map[chan] -> freq-bin` for one term, given per-channel
/// frequency and width (§4.1: "frequency mapping is analogous").
pub fn build_freq_map(
    chan_freq: &[f64],
    chan_width: &[f64],
    interval: IntervalSize,
) -> Result<AxisMap, IntervalError> {
    interval.validate()?;
    debug_assert_eq!(chan_freq.len(), chan_width.len());
    let map = bin_keys(chan_width, interval);
    let n_bins = map.last().map_or(0, |&b| b + 1);
    Ok(AxisMap { map, n_bins })
}

/// Direction mapping (§4.1): `d_map[k, d] = d` if direction-dependent, else
/// every direction collapses onto gain-direction 0.
pub fn build_direction_map(n_dir: usize, direction_dependent: bool) -> Vec<usize> {
    if direction_dependent {
        (0..n_dir).collect()
    } else {
        vec![0; n_dir]
    }
}

fn gaps(sorted_unique: &[f64]) -> Vec<f64> {
    let n = sorted_unique.len();
    let mut widths = Vec::with_capacity(n);
    for i in 0..n {
        let w = if i + 1 < n {
            sorted_unique[i + 1] - sorted_unique[i]
        } else if i > 0 {
            sorted_unique[i] - sorted_unique[i - 1]
        } else {
            1.0
        };
        widths.push(w.max(f64::EPSILON));
    }
    widths
}

/// Bit-pattern key for `f64`, sufficient for exact-match lookups of
/// timestamps that originate from the same upstream source (no NaN
/// handling needed: non-finite rows are flagged out before mapping, §3).
fn float_key(x: f64) -> u64 {
    x.to_bits()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_chunk_is_one_bin() {
        let times = vec![1.0, 1.0, 2.0, 3.0, 3.0];
        let m = build_time_map(&times, IntervalSize::WholeChunk).unwrap();
        assert_eq!(m.n_bins, 1);
        assert!(m.map.iter().all(|&b| b == 0));
    }

    #[test]
    fn count_groups_unique_times() {
        // Four unique times, interval of 2 -> two bins of two unique times each.
        let times = vec![0.0, 0.0, 1.0, 2.0, 2.0, 3.0];
        let m = build_time_map(&times, IntervalSize::Count(2)).unwrap();
        assert_eq!(m.n_bins, 2);
        assert_eq!(m.map, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn count_keeps_short_final_bin() {
        let times = vec![0.0, 1.0, 2.0];
        let m = build_time_map(&times, IntervalSize::Count(2)).unwrap();
        // Bin 0: times 0,1. Bin 1: time 2 only (short final bin retained).
        assert_eq!(m.n_bins, 2);
        assert_eq!(m.map, vec![0, 0, 1]);
    }

    #[test]
    fn freq_duration_accumulates_widths() {
        let freqs = vec![100.0, 101.0, 102.0, 103.0];
        let widths = vec![1.0, 1.0, 1.0, 1.0];
        let m = build_freq_map(&freqs, &widths, IntervalSize::Duration(2.0)).unwrap();
        assert_eq!(m.n_bins, 2);
        assert_eq!(m.map, vec![0, 0, 1, 1]);
    }

    #[test]
    fn direction_map_collapses_when_not_dd() {
        assert_eq!(build_direction_map(3, false), vec![0, 0, 0]);
        assert_eq!(build_direction_map(3, true), vec![0, 1, 2]);
    }

    #[test]
    fn rejects_non_positive_interval() {
        assert!(build_time_map(&[1.0], IntervalSize::Count(0)).is_err());
        assert!(build_freq_map(&[1.0], &[1.0], IntervalSize::Duration(0.0)).is_err());
    }
}
