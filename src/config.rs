use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub cors: CorsConfig,
    pub query: QueryConfig,
    pub rag: RagConfig,
    pub llm: LlmConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Deployment environment label surfaced by the health endpoint.
    pub env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file backing both the service tables and the dataset tables.
    pub path: String,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_origins: Vec<String>,
}

/// Bounds applied to every planned and executed dataset query.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Per-query wall-clock bound in seconds.
    pub timeout_seconds: f64,
    /// Implicit LIMIT appended when the statement has none.
    pub max_rows: i64,
    /// Plan cap applied before execution.
    pub max_per_request: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    /// `mock` or `openai` (any OpenAI-compatible chat completions endpoint).
    pub provider: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub cheap_model: String,
    pub default_model: String,
    pub expensive_model: String,
    pub max_usd_per_request: f64,
    pub max_usd_per_day: f64,
    pub estimated_completion_tokens: i64,
    pub price_prompt_per_1k: f64,
    pub price_completion_per_1k: f64,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Response cache TTL in seconds; 0 disables caching.
    pub ask_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub ask_per_minute: u32,
    pub ask_per_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub dataset_max_mb: usize,
    pub context_max_mb: usize,
    pub dataset_max_rows: usize,
    pub dataset_max_columns: usize,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone)]
#[command(name = "tablesage")]
#[command(version, about = "Tablesage - grounded Q&A over uploaded tabular data")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// SQLite database path (overrides config file)
    #[arg(long, value_name = "PATH")]
    pub database_path: Option<String>,

    /// Logging level (overrides config file, e.g. "info,tablesage=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Disable all model calls regardless of config
    #[arg(long)]
    pub llm_disabled: bool,
}

impl Config {
    /// Load configuration with command line, environment variable, and file
    /// support.
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_DATABASE_PATH
    /// - APP_LOG_LEVEL
    /// - APP_LLM_ENABLED / APP_LLM_PROVIDER / APP_LLM_API_BASE / APP_LLM_API_KEY
    /// - APP_LLM_MAX_USD_PER_REQUEST / APP_LLM_MAX_USD_PER_DAY
    /// - APP_ASK_CACHE_TTL_SECONDS
    /// - APP_ASK_RATE_LIMIT_PER_MINUTE / APP_ASK_RATE_LIMIT_PER_HOUR
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }

        if let Ok(port) = std::env::var("APP_SERVER_PORT")
            && let Ok(port) = port.parse()
        {
            self.server.port = port;
            tracing::info!("Override server.port from env: {}", self.server.port);
        }

        if let Ok(path) = std::env::var("APP_DATABASE_PATH") {
            self.database.path = path;
            tracing::info!("Override database.path from env");
        }

        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }

        if let Ok(enabled) = std::env::var("APP_LLM_ENABLED")
            && let Ok(val) = enabled.parse()
        {
            self.llm.enabled = val;
            tracing::info!("Override llm.enabled from env: {}", self.llm.enabled);
        }

        if let Ok(provider) = std::env::var("APP_LLM_PROVIDER") {
            self.llm.provider = provider;
            tracing::info!("Override llm.provider from env: {}", self.llm.provider);
        }

        if let Ok(base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = base;
            tracing::info!("Override llm.api_base from env");
        }

        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = Some(key);
            tracing::info!("Override llm.api_key from env");
        }

        if let Ok(cap) = std::env::var("APP_LLM_MAX_USD_PER_REQUEST")
            && let Ok(val) = cap.parse()
        {
            self.llm.max_usd_per_request = val;
            tracing::info!(
                "Override llm.max_usd_per_request from env: {}",
                self.llm.max_usd_per_request
            );
        }

        if let Ok(cap) = std::env::var("APP_LLM_MAX_USD_PER_DAY")
            && let Ok(val) = cap.parse()
        {
            self.llm.max_usd_per_day = val;
            tracing::info!("Override llm.max_usd_per_day from env: {}", self.llm.max_usd_per_day);
        }

        if let Ok(ttl) = std::env::var("APP_ASK_CACHE_TTL_SECONDS")
            && let Ok(val) = ttl.parse()
        {
            self.cache.ask_ttl_seconds = val;
            tracing::info!(
                "Override cache.ask_ttl_seconds from env: {}",
                self.cache.ask_ttl_seconds
            );
        }

        if let Ok(limit) = std::env::var("APP_ASK_RATE_LIMIT_PER_MINUTE")
            && let Ok(val) = limit.parse()
        {
            self.rate_limit.ask_per_minute = val;
            tracing::info!(
                "Override rate_limit.ask_per_minute from env: {}",
                self.rate_limit.ask_per_minute
            );
        }

        if let Ok(limit) = std::env::var("APP_ASK_RATE_LIMIT_PER_HOUR")
            && let Ok(val) = limit.parse()
        {
            self.rate_limit.ask_per_hour = val;
            tracing::info!(
                "Override rate_limit.ask_per_hour from env: {}",
                self.rate_limit.ask_per_hour
            );
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }

        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }

        if let Some(path) = &args.database_path {
            self.database.path = path.clone();
            tracing::info!("Override database.path from CLI");
        }

        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }

        if args.llm_disabled {
            self.llm.enabled = false;
            tracing::info!("Model calls disabled from CLI");
        }
    }

    /// Validate configuration
    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.database.path.is_empty() {
            anyhow::bail!("Database path cannot be empty");
        }

        if self.query.timeout_seconds <= 0.0 {
            anyhow::bail!("query.timeout_seconds must be > 0");
        }
        if self.query.max_rows <= 0 {
            anyhow::bail!("query.max_rows must be > 0");
        }
        if self.query.max_per_request == 0 {
            anyhow::bail!("query.max_per_request must be > 0");
        }

        if self.rag.chunk_size == 0 {
            anyhow::bail!("rag.chunk_size must be > 0");
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            anyhow::bail!("rag.chunk_overlap must be smaller than rag.chunk_size");
        }

        if self.llm.provider == "openai" && self.llm.api_key.is_none() && self.llm.enabled {
            tracing::warn!("llm.provider is 'openai' but no API key is configured");
        }

        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080, env: "dev".to_string() }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "data/tablesage.db".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,tablesage=debug".to_string(),
            file: Some("logs/tablesage.log".to_string()),
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { timeout_seconds: 5.0, max_rows: 5000, max_per_request: 10 }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self { chunk_size: 800, chunk_overlap: 100, top_k: 5 }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: "mock".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            cheap_model: "mock-cheap".to_string(),
            default_model: "mock-default".to_string(),
            expensive_model: "mock-expensive".to_string(),
            max_usd_per_request: 0.03,
            max_usd_per_day: 2.0,
            estimated_completion_tokens: 600,
            price_prompt_per_1k: 0.001,
            price_completion_per_1k: 0.002,
            request_timeout_seconds: 60,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ask_ttl_seconds: 600 }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { ask_per_minute: 30, ask_per_hour: 300 }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dataset_max_mb: 10,
            context_max_mb: 10,
            dataset_max_rows: 10_000,
            dataset_max_columns: 150,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.query.max_per_request, 10);
        assert_eq!(config.cache.ask_ttl_seconds, 600);
    }

    #[test]
    fn rejects_overlap_wider_than_chunk() {
        let mut config = Config::default();
        config.rag.chunk_overlap = config.rag.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [query]
            timeout_seconds = 2.5
            [llm]
            enabled = false
            "#,
        )
        .expect("valid toml");
        assert_eq!(parsed.query.timeout_seconds, 2.5);
        assert_eq!(parsed.query.max_rows, 5000);
        assert!(!parsed.llm.enabled);
    }
}
