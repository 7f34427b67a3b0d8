//! JSON configuration model and validation (`SPEC_FULL.md` §6, §10).
//!
//! Structs mirror the shape serde expects straight out of
//! `serde_json::from_str`; `Config::validate` applies the cross-field
//! rules the schema alone can't express and turns the raw config into a
//! [`ValidatedConfig`] ready to build sketches from.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::bank::SketchEntry;
use crate::buffer::fd_producing_codes;
use crate::cms::Cms;
use crate::error::PluginError;
use crate::profile::{parse_profile, profile_uses_fd_selector, Token};

fn default_n_sketches() -> usize {
    1
}

fn default_gamma() -> f64 {
    0.01
}

fn default_eps() -> f64 {
    0.001
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RootConfig {
    #[serde(default)]
    pub count_min_sketch: CountMinSketchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountMinSketchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_n_sketches")]
    pub n_sketches: usize,
    #[serde(default)]
    pub gamma_eps: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    pub rows_cols: Option<Vec<(usize, usize)>>,
    #[serde(default)]
    pub behavior_profiles: Vec<BehaviorProfileConfig>,
}

impl Default for CountMinSketchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            n_sketches: default_n_sketches(),
            gamma_eps: None,
            rows_cols: None,
            behavior_profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BehaviorProfileConfig {
    pub fields: String,
    pub event_codes: Vec<i32>,
    #[serde(default)]
    pub reset_timer_ms: u64,
}

/// A profile plus its already-built sketch, the product of validating
/// one array slot of the raw config.
pub struct ValidatedSketch {
    pub cms: Cms,
    pub tokens: Vec<Token>,
    pub event_codes: HashSet<i32>,
    pub reset_timer_ms: u64,
}

pub struct ValidatedConfig {
    pub enabled: bool,
    pub sketches: Vec<ValidatedSketch>,
}

impl ValidatedConfig {
    /// Consume this validated config into bank-ready entries.
    pub fn into_sketch_entries(self) -> Vec<SketchEntry> {
        self.sketches
            .into_iter()
            .map(|s| SketchEntry::new(s.cms, s.tokens, s.event_codes, s.reset_timer_ms))
            .collect()
    }
}

impl RootConfig {
    pub fn validate(self) -> Result<ValidatedConfig, PluginError> {
        self.count_min_sketch.validate()
    }
}

impl CountMinSketchConfig {
    pub fn validate(self) -> Result<ValidatedConfig, PluginError> {
        if !self.enabled {
            return Ok(ValidatedConfig { enabled: false, sketches: Vec::new() });
        }

        if self.n_sketches == 0 {
            return Err(PluginError::ConfigInvalid("n_sketches must be >= 1".into()));
        }
        if self.behavior_profiles.len() != self.n_sketches {
            return Err(PluginError::ConfigInvalid(format!(
                "behavior_profiles has {} entries, expected {}",
                self.behavior_profiles.len(),
                self.n_sketches
            )));
        }
        if let Some(ge) = &self.gamma_eps {
            if ge.len() != self.n_sketches {
                return Err(PluginError::ConfigInvalid(format!(
                    "gamma_eps has {} entries, expected {}",
                    ge.len(),
                    self.n_sketches
                )));
            }
        }
        if let Some(rc) = &self.rows_cols {
            if rc.len() != self.n_sketches {
                return Err(PluginError::ConfigInvalid(format!(
                    "rows_cols has {} entries, expected {}",
                    rc.len(),
                    self.n_sketches
                )));
            }
        }

        let mut sketches = Vec::with_capacity(self.n_sketches);
        for i in 0..self.n_sketches {
            let profile = &self.behavior_profiles[i];
            let tokens = parse_profile(&profile.fields);
            let event_codes: HashSet<i32> = profile.event_codes.iter().copied().collect();

            if profile_uses_fd_selector(&tokens) {
                let fd_codes: HashSet<i32> = fd_producing_codes().iter().copied().collect();
                if !event_codes.is_subset(&fd_codes) {
                    return Err(PluginError::ConfigInvalid(format!(
                        "profile {i} uses an %fd.* selector but subscribes to non-fd-producing event codes"
                    )));
                }
            }

            // rows_cols overrides gamma_eps when both are present.
            let cms = if let Some(rc) = &self.rows_cols {
                let (d, w) = rc[i];
                Cms::new_with_dw(d, w)?
            } else if let Some(ge) = &self.gamma_eps {
                let (gamma, eps) = ge[i];
                Cms::new_with_gamma_eps(gamma, eps)?
            } else {
                Cms::new_with_gamma_eps(default_gamma(), default_eps())?
            };

            sketches.push(ValidatedSketch {
                cms,
                tokens,
                event_codes,
                reset_timer_ms: profile.reset_timer_ms,
            });
        }

        Ok(ValidatedConfig { enabled: true, sketches })
    }
}

/// Parse a JSON document into a `RootConfig`. Internal JSON-shape errors
/// are folded into `ConfigInvalid` at this boundary (§10 "layered error
/// handling").
pub fn parse_config(raw: &str) -> Result<RootConfig, PluginError> {
    serde_json::from_str(raw).map_err(|e| PluginError::ConfigInvalid(format!("invalid config JSON: {e}")))
}

/// Read and parse a config file from disk. Internal plumbing (the file
/// read, the JSON parse) uses `anyhow::Context` for a layered error
/// trail; only the final `PluginError::ConfigInvalid` crosses the public
/// boundary (§10).
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RootConfig, PluginError> {
    let path = path.as_ref();
    let load = || -> anyhow::Result<RootConfig> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    };
    load().map_err(|e| PluginError::ConfigInvalid(e.to_string()))
}
