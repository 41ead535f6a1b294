// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Post-solve residual MAD flagging (§4.4b): a robust outlier flagger over
//! the chi-squared of the residual, run once per chunk after the gain
//! solve. New flags are OR-ed into the data flag column -- this flagger
//! only ever adds flags (§8 invariant 7).

use std::collections::HashMap;

use marlu::Jones;
use ndarray::{Array1, Array2};

use crate::{config::MadFlagConfig, constants::MAD_TO_SIGMA, corr::CorrWeights};

/// Per-visibility chi-squared `|R|^2 . W`, summed over the stored
/// correlations (§4.4b).
fn chi_squared(residual: &Array2<Jones<f64>>, weights: &Array2<CorrWeights>) -> Array2<f64> {
    Array2::from_shape_fn(residual.dim(), |idx| {
        let r = residual[idx];
        let w = weights[idx];
        r.norm_sqr().iter().zip(w.0.iter()).map(|(n, w)| n * w).sum()
    })
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Median absolute deviation, scaled by [`MAD_TO_SIGMA`] to approximate a
/// Gaussian standard deviation, following common robust-statistics
/// practice for this kind of outlier flagger.
fn mad_sigma(values: &[f64], center: f64) -> f64 {
    let mut abs_dev: Vec<f64> = values.iter().map(|&v| (v - center).abs()).collect();
    median(&mut abs_dev) * MAD_TO_SIGMA
}

/// Run the MAD flagger over one chunk's residual (§4.4b). `ant1`/`ant2`
/// give the baseline of each row; `flags` is updated in place (OR-ed, never
/// cleared).
pub fn mad_flag(
    residual: &Array2<Jones<f64>>,
    weights: &Array2<CorrWeights>,
    flags: &mut Array2<bool>,
    ant1: &Array1<usize>,
    ant2: &Array1<usize>,
    config: &MadFlagConfig,
) {
    if !config.enable {
        return;
    }

    let chi2 = chi_squared(residual, weights);
    let (n_row, n_chan) = chi2.dim();

    // Per-baseline buckets of unflagged chi-squared values.
    let mut per_bl: HashMap<(usize, usize), Vec<f64>> = HashMap::new();
    let mut all_unflagged = Vec::with_capacity(n_row * n_chan);

    for r in 0..n_row {
        let bl = (ant1[r], ant2[r]);
        for f in 0..n_chan {
            if flags[(r, f)] {
                continue;
            }
            let v = chi2[(r, f)];
            per_bl.entry(bl).or_default().push(v);
            all_unflagged.push(v);
        }
    }

    let global_median = median(&mut all_unflagged.clone());
    let global_mad = mad_sigma(&all_unflagged, global_median);

    let mut bl_stats: HashMap<(usize, usize), (f64, f64)> = HashMap::new();
    for (bl, vals) in &per_bl {
        let med = median(&mut vals.clone());
        let mad = mad_sigma(vals, med);
        bl_stats.insert(*bl, (med, mad));
    }

    for r in 0..n_row {
        let bl = (ant1[r], ant2[r]);
        let (bl_median, bl_mad) = bl_stats.get(&bl).copied().unwrap_or((0.0, 0.0));
        for f in 0..n_chan {
            if flags[(r, f)] {
                continue;
            }
            let v = chi2[(r, f)];

            let bl_outlier = bl_mad > 0.0 && (v - bl_median).abs() > config.threshold_bl * bl_mad;
            let gbl_outlier =
                global_mad > 0.0 && (v - global_median).abs() > config.threshold_global * global_mad;
            let unconditional =
                global_mad > 0.0 && (v - global_median).abs() > config.max_deviation * global_mad;

            if bl_outlier || gbl_outlier || unconditional {
                flags[(r, f)] = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marlu::c64;
    use ndarray::array;

    fn default_config() -> MadFlagConfig {
        MadFlagConfig {
            enable: true,
            threshold_bl: 5.0,
            threshold_global: 5.0,
            max_deviation: 10.0,
        }
    }

    #[test]
    fn flags_injected_outliers_and_nothing_else() {
        let n_row = 20;
        let n_chan = 1;
        let mut residual = Array2::from_elem((n_row, n_chan), Jones::default());
        // Quiet background, all baselines (0,1).
        for r in 0..n_row {
            residual[(r, 0)] = Jones::from([c64::new(0.01, 0.0), c64::default(), c64::default(), c64::new(0.01, 0.0)]);
        }
        let outlier_rows = [2, 5, 9, 13, 17];
        for &r in &outlier_rows {
            residual[(r, 0)] = Jones::from([c64::new(10.0, 0.0), c64::default(), c64::default(), c64::new(10.0, 0.0)]);
        }
        let weights = Array2::from_elem((n_row, n_chan), CorrWeights([1.0, 0.0, 0.0, 1.0]));
        let mut flags = Array2::from_elem((n_row, n_chan), false);
        let ant1 = Array1::from_elem(n_row, 0usize);
        let ant2 = Array1::from_elem(n_row, 1usize);

        mad_flag(&residual, &weights, &mut flags, &ant1, &ant2, &default_config());

        for r in 0..n_row {
            let expected = outlier_rows.contains(&r);
            assert_eq!(flags[(r, 0)], expected, "row {r}");
        }
    }

    #[test]
    fn disabled_flagger_does_nothing() {
        let residual = array![[Jones::default()]];
        let weights = array![[CorrWeights::zero()]];
        let mut flags = array![[false]];
        let ant1 = Array1::from_elem(1, 0usize);
        let ant2 = Array1::from_elem(1, 1usize);
        let mut cfg = default_config();
        cfg.enable = false;
        mad_flag(&residual, &weights, &mut flags, &ant1, &ant2, &cfg);
        assert!(!flags[(0, 0)]);
    }
}
