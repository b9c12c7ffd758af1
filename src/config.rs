// src/config.rs
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::StyleError;

pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_ANALYSIS_MODEL: &str = "meta-llama/llama-4-maverick:free";
pub const DEFAULT_HF_API_BASE: &str = "https://api-inference.huggingface.co/models";
pub const DEFAULT_HF_MODEL_ID: &str = "black-forest-labs/FLUX.1-dev";
pub const DEFAULT_POCKETBASE_URL: &str = "https://stylemorph.fly.dev";

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub api_token: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

/// Fan-out limits applied by the orchestrator.
#[derive(Debug, Clone)]
pub struct FanOutConfig {
    pub max_concurrency: usize,
    pub min_spacing: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            min_spacing: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    pub generation: GenerationConfig,
    pub fan_out: FanOutConfig,
    pub redis_url: String,
    pub pocketbase_url: String,
    pub share_dir: PathBuf,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, StyleError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup, so tests need not touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, StyleError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| StyleError::Config(format!("{} must be set", key)))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let model_id = or_default("HUGGING_FACE_MODEL_ID", DEFAULT_HF_MODEL_ID);
        let api_base = or_default("HUGGING_FACE_API_BASE", DEFAULT_HF_API_BASE);

        let max_attempts: u32 = parse_or(&lookup, "GENERATION_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(StyleError::Config(
                "GENERATION_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        let max_concurrency: usize = parse_or(&lookup, "GENERATION_MAX_CONCURRENCY", 3)?;
        if max_concurrency == 0 {
            return Err(StyleError::Config(
                "GENERATION_MAX_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            analysis: AnalysisConfig {
                endpoint: or_default("OPENROUTER_URL", DEFAULT_OPENROUTER_URL),
                api_key: required("OPENROUTER_API_KEY")?,
                model: or_default("ANALYSIS_MODEL", DEFAULT_ANALYSIS_MODEL),
                timeout: Duration::from_secs(parse_or(&lookup, "ANALYSIS_TIMEOUT_SECS", 60)?),
            },
            generation: GenerationConfig {
                endpoint: format!("{}/{}", api_base.trim_end_matches('/'), model_id),
                api_token: required("HUGGING_FACE_API_TOKEN")?,
                timeout: Duration::from_secs(parse_or(&lookup, "GENERATION_TIMEOUT_SECS", 120)?),
                max_attempts,
                retry_delay: Duration::from_millis(parse_or(
                    &lookup,
                    "GENERATION_RETRY_DELAY_MS",
                    2000,
                )?),
            },
            fan_out: FanOutConfig {
                max_concurrency,
                min_spacing: Duration::from_millis(parse_or(
                    &lookup,
                    "GENERATION_MIN_SPACING_MS",
                    1000,
                )?),
            },
            redis_url: or_default("REDIS_URL", "redis://127.0.0.1:6379"),
            pocketbase_url: or_default("POCKETBASE_URL", DEFAULT_POCKETBASE_URL),
            share_dir: PathBuf::from(or_default("SHARE_DIR", "./shared")),
            bind_addr: or_default("BIND_ADDR", "0.0.0.0:8080"),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, StyleError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| StyleError::Config(format!("Invalid {}={:?}: {}", key, raw, e))),
    }
}
