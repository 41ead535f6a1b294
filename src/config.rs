// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration surface (§6, §4.6). Mirrors the teacher's two-stage
//! pattern in `calibrate/args.rs` + `calibrate/params`: a raw, all-optional,
//! serde-deserializable record (`RawConfig`) is validated into a
//! `ChainSpec` the solver actually consumes. Validation failures are
//! configuration-class errors (§7, class 1) and happen before any chunk is
//! dispatched.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vec1::Vec1;

use crate::{interval::IntervalSize, solver::term::TermVariant};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown term type '{0}', expected one of: {1}")]
    UnknownTermType(String, String),

    #[error("term '{0}': time_interval/freq_interval must be > 0, or 0 for whole chunk")]
    NonPositiveInterval(String),

    #[error("term '{0}': iters must be > 0")]
    NonPositiveIters(String),

    #[error("term '{0}': convergence_fraction must be in (0, 1]")]
    InvalidConvergenceFraction(String),

    #[error("solver.terms references unknown term '{0}'")]
    UnknownTermName(String),

    #[error(
        "chain mixes direction-dependent and direction-independent terms; this is refused \
        rather than guessed at (see DESIGN.md open question)"
    )]
    MixedDirectionDependence,

    #[error("solve_per must be 'array' or 'antenna', got '{0}'")]
    UnknownSolvePer(String),

    #[error("solver.terms is empty; a chain needs at least one term")]
    EmptyChain,

    #[error("failed to parse configuration file {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("failed to parse configuration file {path}: {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },

    #[error("failed to read configuration file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("configuration file {0} has no recognised extension (expected .yaml, .yml or .toml)")]
    UnknownFileType(String),
}

/// Whether a term's per-interval update is solved independently per antenna,
/// or collapsed into one shared per-array update (§4.3 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolvePer {
    Array,
    Antenna,
}

/// Raw, user-facing configuration for a single gain term. All fields
/// optional except `type_`, following the teacher's "all arguments should
/// be optional" convention for the fields that have sane defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTermConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub time_interval: Option<f64>,
    #[serde(default)]
    pub freq_interval: Option<f64>,
    #[serde(default)]
    pub direction_dependent: bool,
    #[serde(default = "default_iters")]
    pub iters: u32,
    #[serde(default = "default_convergence_fraction")]
    pub convergence_fraction: f64,
    #[serde(default = "default_convergence_criteria")]
    pub convergence_criteria: f64,
    #[serde(default)]
    pub solve_per: Option<String>,
    #[serde(default)]
    pub initial_estimate: bool,
    #[serde(default)]
    pub reference_antenna: Option<usize>,
}

fn default_iters() -> u32 {
    20
}
fn default_convergence_fraction() -> f64 {
    0.99
}
fn default_convergence_criteria() -> f64 {
    1e-6
}

/// Raw MAD-flagger configuration (§4.4b / §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MadFlagConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default = "default_bl_thresh")]
    pub threshold_bl: f64,
    #[serde(default = "default_global_thresh")]
    pub threshold_global: f64,
    #[serde(default = "default_max_deviation")]
    pub max_deviation: f64,
}

fn default_bl_thresh() -> f64 {
    crate::constants::DEFAULT_MAD_THRESHOLD_BL
}
fn default_global_thresh() -> f64 {
    crate::constants::DEFAULT_MAD_THRESHOLD_GLOBAL
}
fn default_max_deviation() -> f64 {
    crate::constants::DEFAULT_MAD_MAX_DEVIATION
}

impl Default for MadFlagConfig {
    fn default() -> Self {
        Self {
            enable: false,
            threshold_bl: default_bl_thresh(),
            threshold_global: default_global_thresh(),
            max_deviation: default_max_deviation(),
        }
    }
}

/// The raw, user-facing top-level configuration record (§6 configuration
/// surface). Deserializable from YAML or TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawConfig {
    pub terms: Vec<String>,
    #[serde(flatten)]
    pub term_configs: std::collections::BTreeMap<String, RawTermConfig>,
    #[serde(default)]
    pub mad_flags: MadFlagConfig,
    #[serde(default)]
    pub reference_antenna: Option<usize>,
}

/// Top-level entry point for the configuration surface (§4.6 ADD): loads a
/// [`RawConfig`] from a YAML or TOML file on disk, following the teacher's
/// two-stage `CalibrateUserArgs` (raw, file-backed) -> `CalibrateParams`
/// (validated) split. `Config::load` is the only place this crate touches
/// the filesystem for configuration; everything downstream works with the
/// in-memory [`ChainSpec`].
#[derive(Debug, Clone)]
pub struct Config(pub RawConfig);

impl Config {
    /// Load and parse a configuration file, dispatching on its extension.
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let path_str = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path_str.clone(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&text, &path_str),
            Some("toml") => Self::from_toml_str(&text, &path_str),
            _ => Err(ConfigError::UnknownFileType(path_str)),
        }
    }

    pub fn from_yaml_str(text: &str, path: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text)
            .map(Config)
            .map_err(|source| ConfigError::Yaml {
                path: path.to_string(),
                source,
            })
    }

    pub fn from_toml_str(text: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str(text)
            .map(Config)
            .map_err(|source| ConfigError::Toml {
                path: path.to_string(),
                source,
            })
    }

    /// Validate the wrapped [`RawConfig`] into a [`ChainSpec`] (§7 class 1:
    /// fails fast, before any chunk is dispatched).
    pub fn validate(&self) -> Result<ChainSpec, ConfigError> {
        ChainSpec::from_raw(&self.0)
    }
}

/// A single validated term specification, as consumed by the solver (§6
/// chain spec).
#[derive(Debug, Clone)]
pub struct TermSpec {
    pub name: String,
    pub variant: TermVariant,
    pub time_interval: IntervalSize,
    pub freq_interval: IntervalSize,
    pub direction_dependent: bool,
    pub iters: u32,
    pub solve_per: SolvePer,
    pub stop_frac: f64,
    pub stop_crit: f64,
    pub initial_estimate: bool,
    pub reference_antenna: Option<usize>,
}

/// The validated, ordered chain the solver consumes (§6). `terms` is
/// guaranteed non-empty (mirrors the teacher's `Vec1<Timeblock>` pattern for
/// "at least one of these must exist or nothing downstream makes sense").
#[derive(Debug, Clone)]
pub struct ChainSpec {
    pub terms: Vec1<TermSpec>,
    pub mad_flags: MadFlagConfig,
}

fn parse_interval(raw: Option<f64>, term_name: &str) -> Result<IntervalSize, ConfigError> {
    match raw {
        None | Some(0.0) => Ok(IntervalSize::WholeChunk),
        Some(v) if v > 0.0 => {
            if v.fract() == 0.0 {
                Ok(IntervalSize::Count(v as usize))
            } else {
                Ok(IntervalSize::Duration(v))
            }
        }
        Some(v) => {
            let _ = v;
            Err(ConfigError::NonPositiveInterval(term_name.to_string()))
        }
    }
}

impl ChainSpec {
    /// Validate a [`RawConfig`] into a [`ChainSpec`] (§4.6, §7 class 1:
    /// fails fast, before any chunk is dispatched).
    pub fn from_raw(raw: &RawConfig) -> Result<Self, ConfigError> {
        let mut terms = Vec::with_capacity(raw.terms.len());
        let mut any_dd = false;
        let mut any_di = false;

        for name in &raw.terms {
            let tc = raw
                .term_configs
                .get(name)
                .ok_or_else(|| ConfigError::UnknownTermName(name.clone()))?;

            let variant = TermVariant::from_str(&tc.type_).ok_or_else(|| {
                ConfigError::UnknownTermType(tc.type_.clone(), TermVariant::all_names().join(", "))
            })?;

            if tc.iters == 0 {
                return Err(ConfigError::NonPositiveIters(name.clone()));
            }
            if !(tc.convergence_fraction > 0.0 && tc.convergence_fraction <= 1.0) {
                return Err(ConfigError::InvalidConvergenceFraction(name.clone()));
            }

            let solve_per = match tc.solve_per.as_deref() {
                None | Some("antenna") => SolvePer::Antenna,
                Some("array") => SolvePer::Array,
                Some(other) => return Err(ConfigError::UnknownSolvePer(other.to_string())),
            };

            let time_interval = parse_interval(tc.time_interval, name)?;
            let freq_interval = parse_interval(tc.freq_interval, name)?;

            if tc.direction_dependent {
                any_dd = true;
            } else {
                any_di = true;
            }

            terms.push(TermSpec {
                name: name.clone(),
                variant,
                time_interval,
                freq_interval,
                direction_dependent: tc.direction_dependent,
                iters: tc.iters,
                solve_per,
                stop_frac: tc.convergence_fraction,
                stop_crit: tc.convergence_criteria,
                initial_estimate: tc.initial_estimate,
                reference_antenna: tc.reference_antenna.or(raw.reference_antenna),
            });
        }

        // Open question resolved in DESIGN.md: refuse mixed dependence
        // rather than guess a policy, when more than one direction exists
        // downstream. We can't know `n_dir` here (that's per-chunk), so we
        // only refuse the unambiguous case: more than one term and not all
        // agreeing on direction-dependence.
        if any_dd && any_di && terms.len() > 1 {
            return Err(ConfigError::MixedDirectionDependence);
        }

        let terms = Vec1::try_from_vec(terms).map_err(|_| ConfigError::EmptyChain)?;

        Ok(ChainSpec {
            terms,
            mad_flags: raw.mad_flags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_raw(term_type: &str) -> RawConfig {
        let mut term_configs = std::collections::BTreeMap::new();
        term_configs.insert(
            "g".to_string(),
            RawTermConfig {
                type_: term_type.to_string(),
                time_interval: None,
                freq_interval: None,
                direction_dependent: false,
                iters: 10,
                convergence_fraction: 0.99,
                convergence_criteria: 1e-6,
                solve_per: None,
                initial_estimate: false,
                reference_antenna: None,
            },
        );
        RawConfig {
            terms: vec!["g".to_string()],
            term_configs,
            mad_flags: MadFlagConfig::default(),
            reference_antenna: None,
        }
    }

    #[test]
    fn valid_chain_parses() {
        let raw = minimal_raw("complex");
        let chain = ChainSpec::from_raw(&raw).unwrap();
        assert_eq!(chain.terms.len(), 1);
        assert_eq!(chain.terms[0].time_interval, IntervalSize::WholeChunk);
    }

    #[test]
    fn unknown_term_type_is_rejected() {
        let raw = minimal_raw("not_a_real_variant");
        assert!(matches!(
            ChainSpec::from_raw(&raw),
            Err(ConfigError::UnknownTermType(..))
        ));
    }

    #[test]
    fn unknown_term_name_in_terms_list_is_rejected() {
        let mut raw = minimal_raw("complex");
        raw.terms.push("missing".to_string());
        assert!(matches!(
            ChainSpec::from_raw(&raw),
            Err(ConfigError::UnknownTermName(_))
        ));
    }

    #[test]
    fn zero_iters_is_rejected() {
        let mut raw = minimal_raw("complex");
        raw.term_configs.get_mut("g").unwrap().iters = 0;
        assert!(matches!(
            ChainSpec::from_raw(&raw),
            Err(ConfigError::NonPositiveIters(_))
        ));
    }

    #[test]
    fn empty_terms_list_is_rejected() {
        let mut raw = minimal_raw("complex");
        raw.terms.clear();
        assert!(matches!(
            ChainSpec::from_raw(&raw),
            Err(ConfigError::EmptyChain)
        ));
    }

    #[test]
    fn mixed_direction_dependence_is_refused() {
        let mut raw = minimal_raw("complex");
        let mut b = raw.term_configs.get("g").unwrap().clone();
        b.direction_dependent = true;
        raw.term_configs.insert("b".to_string(), b);
        raw.terms.push("b".to_string());
        assert!(matches!(
            ChainSpec::from_raw(&raw),
            Err(ConfigError::MixedDirectionDependence)
        ));
    }

    #[test]
    fn config_loads_from_yaml_text() {
        let yaml = indoc::indoc! {"
            terms: [g]
            g:
              type: complex
              iters: 15
        "};
        let cfg = Config::from_yaml_str(yaml, "<test>").unwrap();
        let chain = cfg.validate().unwrap();
        assert_eq!(chain.terms.len(), 1);
        assert_eq!(chain.terms[0].iters, 15);
    }

    #[test]
    fn config_loads_from_toml_text() {
        let toml_text = indoc::indoc! {r#"
            terms = ["g"]
            [g]
            type = "phase"
        "#};
        let cfg = Config::from_toml_str(toml_text, "<test>").unwrap();
        let chain = cfg.validate().unwrap();
        assert_eq!(chain.terms.len(), 1);
        assert_eq!(chain.terms[0].variant, TermVariant::Phase);
    }

    #[test]
    fn malformed_yaml_surfaces_as_config_error() {
        let err = Config::from_yaml_str("not: valid: yaml: [", "<test>").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }
}
