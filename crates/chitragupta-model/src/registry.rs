// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Static metadata for known providers: API-key environment variables and
//! the rules for recommending a provider from the host environment.

/// Local vs hosted provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Local,
    LocalGpu,
    Cloud,
}

/// Metadata describing a known provider.
#[derive(Debug, Clone)]
pub struct ProviderMeta {
    /// Stable provider id used in bindings and decisions.
    pub id: &'static str,
    /// Human-readable display name.
    pub name: &'static str,
    /// Environment variable holding the API key; `None` for local backends.
    pub api_key_env: Option<&'static str>,
    pub kind: ProviderKind,
    /// Higher wins when picking among available API keys.
    pub priority: u8,
}

/// Complete registry of known providers, strongest-priority first within
/// each kind.
pub static PROVIDERS: &[ProviderMeta] = &[
    ProviderMeta {
        id: "anthropic",
        name: "Anthropic",
        api_key_env: Some("ANTHROPIC_API_KEY"),
        kind: ProviderKind::Cloud,
        priority: 90,
    },
    ProviderMeta {
        id: "openai",
        name: "OpenAI",
        api_key_env: Some("OPENAI_API_KEY"),
        kind: ProviderKind::Cloud,
        priority: 80,
    },
    ProviderMeta {
        id: "google",
        name: "Google Gemini",
        api_key_env: Some("GEMINI_API_KEY"),
        kind: ProviderKind::Cloud,
        priority: 70,
    },
    ProviderMeta {
        id: "groq",
        name: "Groq",
        api_key_env: Some("GROQ_API_KEY"),
        kind: ProviderKind::Cloud,
        priority: 50,
    },
    ProviderMeta {
        id: "openrouter",
        name: "OpenRouter",
        api_key_env: Some("OPENROUTER_API_KEY"),
        kind: ProviderKind::Cloud,
        priority: 40,
    },
    ProviderMeta {
        id: "local-gpu",
        name: "Local GPU server",
        api_key_env: None,
        kind: ProviderKind::LocalGpu,
        priority: 30,
    },
    ProviderMeta {
        id: "ollama",
        name: "Ollama",
        api_key_env: None,
        kind: ProviderKind::Local,
        priority: 20,
    },
    ProviderMeta {
        id: "lmstudio",
        name: "LM Studio",
        api_key_env: None,
        kind: ProviderKind::Local,
        priority: 10,
    },
];

/// Providers whose API key is set and non-empty in the process environment.
pub fn detect_api_keys() -> Vec<&'static ProviderMeta> {
    PROVIDERS
        .iter()
        .filter(|p| {
            p.api_key_env
                .map(|env| std::env::var(env).map(|v| !v.is_empty()).unwrap_or(false))
                .unwrap_or(false)
        })
        .collect()
}

/// Host capabilities used by [`recommended_provider`].
#[derive(Debug, Clone, Default)]
pub struct HostEnvironment {
    /// `std::env::consts::OS` value (`"macos"`, `"linux"`, …).
    pub os: String,
    /// `std::env::consts::ARCH` value (`"aarch64"`, `"x86_64"`, …).
    pub arch: String,
    pub has_nvidia: bool,
    /// Local inference backends detected as reachable, by provider id.
    pub local_backends: Vec<String>,
    /// Provider ids with an API key present.
    pub api_key_providers: Vec<String>,
}

impl HostEnvironment {
    /// Snapshot the current process environment.
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            has_nvidia: false,
            local_backends: Vec::new(),
            api_key_providers: detect_api_keys().iter().map(|p| p.id.to_string()).collect(),
        }
    }
}

/// Pick a provider id for this host.
///
/// Rules, in order: macOS on ARM64 prefers local inference; an NVIDIA GPU
/// with a reachable local server prefers the GPU server; any reachable
/// local backend wins next; otherwise the highest-priority API key;
/// otherwise the default local provider.
pub fn recommended_provider(env: &HostEnvironment) -> &'static str {
    if env.os == "macos" && env.arch == "aarch64" {
        if let Some(local) = first_local_backend(env) {
            return local;
        }
    }
    if env.has_nvidia && env.local_backends.iter().any(|b| b == "local-gpu") {
        return "local-gpu";
    }
    if let Some(local) = first_local_backend(env) {
        return local;
    }
    let best_key = PROVIDERS
        .iter()
        .filter(|p| env.api_key_providers.iter().any(|id| id == p.id))
        .max_by_key(|p| p.priority);
    if let Some(p) = best_key {
        return p.id;
    }
    "ollama"
}

fn first_local_backend(env: &HostEnvironment) -> Option<&'static str> {
    PROVIDERS
        .iter()
        .filter(|p| matches!(p.kind, ProviderKind::Local | ProviderKind::LocalGpu))
        .find(|p| env.local_backends.iter().any(|b| b == p.id))
        .map(|p| p.id)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
