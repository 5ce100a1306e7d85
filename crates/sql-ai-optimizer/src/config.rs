// sql-ai-optimizer/crates/sql-ai-optimizer/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub anthropic_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub selector_planning_model: String,
    pub selector_model: String,
    pub analyzer_model: String,
    pub state_db_path: PathBuf,
    pub cache_dir: PathBuf,
    pub query_cache_ttl_seconds: u64,
    pub cache_database_results: bool,
    pub llm_log_path: PathBuf,
    pub llm_timeout_seconds: u64,
    pub analysis_concurrency: usize,
    pub api_host: String,
    pub api_port: u16,
    pub request_timeout_seconds: u64,
    pub debug: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL environment variable not set. Please set it in your .env file")?;
        let anthropic_api_key = env::var("ANTHROPIC_API_KEY")
            .context("ANTHROPIC_API_KEY environment variable not set. Please set it in your .env file")?;

        Ok(Self {
            database_url,
            anthropic_api_key,
            anthropic_base_url: env::var("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com".into()),
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|key| !key.trim().is_empty()),
            openai_base_url: env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            selector_planning_model: env::var("SELECTOR_PLANNING_MODEL").unwrap_or_else(|_| "o3-2025-04-16".into()),
            selector_model: env::var("SELECTOR_MODEL").unwrap_or_else(|_| "claude-3-7-sonnet-20250219".into()),
            analyzer_model: env::var("ANALYZER_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5-20250929".into()),
            state_db_path: env::var("STATE_DB_PATH")
                .unwrap_or_else(|_| "./var/state.sqlite".into())
                .into(),
            cache_dir: env::var("CACHE_DIR").unwrap_or_else(|_| "./var/cache".into()).into(),
            query_cache_ttl_seconds: env::var("QUERY_CACHE_TTL_SECONDS")
                .unwrap_or_else(|_| "86400".into())
                .parse()
                .context("QUERY_CACHE_TTL_SECONDS must be a number of seconds")?,
            cache_database_results: parse_bool(
                "CACHE_DATABASE_RESULTS",
                &env::var("CACHE_DATABASE_RESULTS").unwrap_or_else(|_| "true".into()),
            )?,
            llm_log_path: env::var("LLM_LOG_PATH")
                .unwrap_or_else(|_| "./var/log/llm.md".into())
                .into(),
            llm_timeout_seconds: env::var("LLM_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "600".into())
                .parse()
                .context("LLM_TIMEOUT_SECONDS must be a number of seconds")?,
            analysis_concurrency: env::var("ANALYSIS_CONCURRENCY")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .context("ANALYSIS_CONCURRENCY must be a positive integer")?,
            api_host: env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            api_port: env::var("API_PORT").unwrap_or_else(|_| "8000".into()).parse()?,
            request_timeout_seconds: env::var("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "1800".into())
                .parse()
                .context("REQUEST_TIMEOUT_SECONDS must be a number of seconds")?,
            debug: parse_bool("APP_DEBUG", &env::var("APP_DEBUG").unwrap_or_else(|_| "false".into()))?,
        })
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Analyzed database: {}", mask_url_password(&self.database_url));
        info!("- Anthropic: {} (key {})", self.anthropic_base_url, mask_secret(&self.anthropic_api_key));
        match &self.openai_api_key {
            Some(key) => info!("- OpenAI: {} (key {})", self.openai_base_url, mask_secret(key)),
            None => info!("- OpenAI: disabled, single-model selection"),
        }
        info!(
            "- Models: planning={}, selection={}, analysis={}",
            self.selector_planning_model, self.selector_model, self.analyzer_model
        );
        info!("- State database: {}", self.state_db_path.display());
        info!(
            "- Result cache: {} (ttl {}s, database tool cached: {})",
            self.cache_dir.display(),
            self.query_cache_ttl_seconds,
            self.cache_database_results
        );
        info!("- LLM log: {}", self.llm_log_path.display());
        info!("- LLM timeout: {}s", self.llm_timeout_seconds);
        info!("- Analysis concurrency: {}", self.analysis_concurrency);
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- Request timeout: {}s", self.request_timeout_seconds);
        info!("- Debug: {}", self.debug);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("Invalid API address {}:{}", self.api_host, self.api_port))
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn query_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.query_cache_ttl_seconds)
    }

    /// Default tracing filter when `RUST_LOG` is unset.
    pub fn default_log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else {
            "info"
        }
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow::anyhow!("{} must be a boolean, got {:?}", name, other)),
    }
}

fn mask_secret(secret: &str) -> String {
    let visible: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    if secret.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{}", visible)
    }
}

fn mask_url_password(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{}://{}:****@{}", scheme, user, host),
        None => url.to_string(),
    }
}
