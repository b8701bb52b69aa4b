// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::{
    AgentConfig, AutonomyConfig, BocpdConfig, BreakerConfig, DutyConfig, GossipConfig,
    MeshConfig, RetryConfig, RoutingConfig, RuntimeConfig, StoreConfig,
};

/// Environment variable naming an extra config file, applied above the
/// discovered layers and below an explicit path.
pub const CONFIG_PATH_ENV: &str = "CHITRAGUPTA_CONFIG";

/// A partially-specified configuration as written in one YAML file.
///
/// Layering is per SECTION, not per field: a layer that sets `retry`
/// replaces the whole retry section from lower-precedence layers.  Field
/// granularity within a section comes from serde defaults instead — a
/// section mentioning only `max_turns` still yields a complete
/// `AgentConfig`.  Replacing sections wholesale keeps every section
/// internally consistent; stitching thresholds from different files is
/// how half-tuned breakers happen.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigLayer {
    agent: Option<AgentConfig>,
    retry: Option<RetryConfig>,
    breaker: Option<BreakerConfig>,
    routing: Option<RoutingConfig>,
    mesh: Option<MeshConfig>,
    gossip: Option<GossipConfig>,
    store: Option<StoreConfig>,
    bocpd: Option<BocpdConfig>,
    autonomy: Option<AutonomyConfig>,
    duty: Option<DutyConfig>,
}

impl ConfigLayer {
    fn apply(self, cfg: &mut RuntimeConfig) {
        if let Some(v) = self.agent {
            cfg.agent = v;
        }
        if let Some(v) = self.retry {
            cfg.retry = v;
        }
        if let Some(v) = self.breaker {
            cfg.breaker = v;
        }
        if let Some(v) = self.routing {
            cfg.routing = v;
        }
        if let Some(v) = self.mesh {
            cfg.mesh = v;
        }
        if let Some(v) = self.gossip {
            cfg.gossip = v;
        }
        if let Some(v) = self.store {
            cfg.store = v;
        }
        if let Some(v) = self.bocpd {
            cfg.bocpd = v;
        }
        if let Some(v) = self.autonomy {
            cfg.autonomy = v;
        }
        if let Some(v) = self.duty {
            cfg.duty = v;
        }
    }
}

/// Discovered config files, weakest first.  Absent files are skipped;
/// the `CHITRAGUPTA_CONFIG` file and an explicit path must exist.
fn discovered_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("/etc/chitragupta/config.yaml")];
    if let Some(cfg_dir) = dirs::config_dir() {
        paths.push(cfg_dir.join("chitragupta/config.yaml"));
    }
    paths.push(PathBuf::from(".chitragupta.yaml"));
    paths
}

/// Assemble a [`RuntimeConfig`] by stacking config layers onto the
/// built-in defaults.
///
/// Precedence, weakest to strongest: defaults, system file, user file,
/// workspace file, the [`CONFIG_PATH_ENV`] file, `extra`.
pub fn load(extra: Option<&Path>) -> anyhow::Result<RuntimeConfig> {
    let mut cfg = RuntimeConfig::default();

    for path in discovered_paths() {
        if let Some(layer) = read_layer(&path, false)? {
            layer.apply(&mut cfg);
        }
    }
    if let Ok(env_path) = std::env::var(CONFIG_PATH_ENV) {
        if !env_path.is_empty() {
            if let Some(layer) = read_layer(Path::new(&env_path), true)? {
                layer.apply(&mut cfg);
            }
        }
    }
    if let Some(path) = extra {
        if let Some(layer) = read_layer(path, true)? {
            layer.apply(&mut cfg);
        }
    }
    Ok(cfg)
}

fn read_layer(path: &Path, required: bool) -> anyhow::Result<Option<ConfigLayer>> {
    if !path.is_file() {
        if required {
            anyhow::bail!("config file not found: {}", path.display());
        }
        return Ok(None);
    }
    debug!(path = %path.display(), "applying config layer");
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("unreadable config layer {}", path.display()))?;
    let layer: ConfigLayer = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid config layer {}", path.display()))?;
    Ok(Some(layer))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
