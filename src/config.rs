use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// ── Backend entry ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Ollama native API (`/api/generate`, NDJSON streaming)
    #[default]
    Ollama,
    /// Any OpenAI-compatible server (`/v1/chat/completions`, SSE streaming)
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Base URL of the server
    pub endpoint: String,
    /// Model identifier sent with every request
    pub model: String,
    /// System prompt sent with every request
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// Optional API key (sent as Bearer token, OpenAI-compatible servers only)
    pub api_key: Option<String>,
}

fn default_system_prompt() -> String {
    "respond to the question the best you can".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Ollama,
            endpoint: "http://localhost:11434".to_string(),
            model: "llama2".to_string(),
            system_prompt: default_system_prompt(),
            api_key: None,
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Backend made active at startup
    #[serde(default = "default_backend_name")]
    pub default_backend: String,

    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

fn default_backend_name() -> String {
    "ollama".to_string()
}

impl Default for ConfigFile {
    /// Built-in setup: a local Ollama and a local OpenAI-compatible server.
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert("ollama".to_string(), BackendConfig::default());
        backends.insert(
            "openai".to_string(),
            BackendConfig {
                kind: BackendKind::Openai,
                endpoint: "http://localhost:1234".to_string(),
                model: "local-model".to_string(),
                ..Default::default()
            },
        );
        Self {
            default_backend: default_backend_name(),
            backends,
        }
    }
}

impl ConfigFile {
    /// Load from the default location, or built-in defaults if no file exists yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing() -> Result<PathBuf> {
        let path = config_path();
        write_default_to(&path)?;
        Ok(path)
    }
}

fn write_default_to(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, DEFAULT_CONFIG_TOML)
        .with_context(|| format!("Failed to write {}", path.display()))
}

// ── Resolved runtime config (after merging file + CLI overrides) ──────────────

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub backends: BTreeMap<String, BackendConfig>,
    /// Backend to activate at startup; None only if no backends are configured
    pub active: Option<String>,
}

impl ResolvedConfig {
    /// Merge config file with CLI overrides.
    /// Priority: CLI args > env vars (handled by clap) > config file > built-in defaults.
    /// Endpoint/model overrides apply to the backend that ends up active.
    pub fn resolve(
        file: &ConfigFile,
        backend_override: Option<&str>,
        endpoint_override: Option<&str>,
        model_override: Option<&str>,
    ) -> Result<Self> {
        let mut backends: BTreeMap<String, BackendConfig> = file
            .backends
            .iter()
            .map(|(name, cfg)| (name.to_lowercase(), cfg.clone()))
            .collect();

        if backends.is_empty() {
            bail!("no backends configured; add a [backends.<name>] table to {}", config_path().display());
        }

        let wanted = backend_override
            .unwrap_or(&file.default_backend)
            .to_lowercase();
        let active = if backends.contains_key(&wanted) {
            Some(wanted)
        } else {
            if backend_override.is_some() {
                let names: Vec<&str> = backends.keys().map(String::as_str).collect();
                bail!("unknown backend '{wanted}' (available: {})", names.join(", "));
            }
            tracing::warn!(backend = %wanted, "default backend not configured, using the first one");
            backends.keys().next().cloned()
        };

        if let Some(cfg) = active.as_ref().and_then(|name| backends.get_mut(name)) {
            if let Some(endpoint) = endpoint_override {
                cfg.endpoint = endpoint.to_string();
            }
            if let Some(model) = model_override {
                cfg.model = model.to_string();
            }
        }

        Ok(Self { backends, active })
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("aiterm")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS, %APPDATA% on Windows
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
        .or_else(|| std::env::var("APPDATA").ok().map(PathBuf::from))
}

/// Directory for the log file: XDG_DATA_HOME or ~/.local/share.
pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".local/share")
        })
        .join("aiterm")
}

// ── Default config template written by --init ─────────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# aiterm configuration
# Run `aiterm --init` to regenerate this file.

# Backend active at startup (switch at runtime with /api <name>)
default_backend = "ollama"

# ── Local Ollama ──────────────────────────────────────────────────────────────
[backends.ollama]
kind          = "ollama"
endpoint      = "http://localhost:11434"
model         = "llama2"
system_prompt = "respond to the question the best you can"

# ── Local OpenAI-compatible server (LM Studio, llama.cpp, vLLM, …) ───────────
[backends.openai]
kind          = "openai"
endpoint      = "http://localhost:1234"
model         = "local-model"
# api_key     = "sk-..."

# ── Hosted OpenAI-compatible API ──────────────────────────────────────────────
# [backends.openrouter]
# kind     = "openai"
# endpoint = "https://openrouter.ai/api/v1"
# model    = "qwen/qwen-2.5-coder-32b-instruct"
# api_key  = "sk-or-..."
"#;
