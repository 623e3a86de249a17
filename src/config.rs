use config::{Config, ConfigError, File};
use secrecy::Secret;
use serde::Deserialize;
use std::collections::HashMap;

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// `memory://` 使用进程内存储 (本地调试用)
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory:")
    }
}

/// 模型服务配置
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
    pub model: String,
    pub max_steps: usize, // 流式回复中工具调用的最大轮数
    pub timeout_secs: u64,
}

/// 访问令牌配置，每项格式为 `user:token`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl AuthConfig {
    /// token -> user id
    pub fn token_map(&self) -> HashMap<String, String> {
        self.tokens
            .iter()
            .map(|entry| entry.trim())
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((user, token)) => (token.to_string(), user.to_string()),
                None => (entry.to_string(), entry.to_string()),
            })
            .collect()
    }
}

/// RUST_LOG 未设置时的日志过滤: lopdf 每解码一段文本都会打一条 info
pub const DEFAULT_LOG_FILTER: &str = "info,lopdf=warn";

impl AppConfig {
    /// 加载配置: 默认值 -> config.toml (可选) -> 环境变量
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(File::with_name("config").required(false), |key| std::env::var(key).ok())
    }

    /// 按给定文件源和环境变量读取函数加载配置
    pub fn load_from<S, F>(file: S, env: F) -> Result<Self, ConfigError>
    where
        S: config::Source + Send + Sync + 'static,
        F: Fn(&str) -> Option<String>,
    {
        let tokens = env("AUTH_TOKENS").map(|raw| {
            raw.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        });

        Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "postgres://localhost/invoice_chat")?
            .set_default("database.max_connections", 20)?
            .set_default("llm.base_url", "https://api.openai.com/v1")?
            .set_default("llm.model", "gpt-4o")?
            .set_default("llm.max_steps", 5)?
            .set_default("llm.timeout_secs", 120)?
            .set_default("auth.tokens", Vec::<String>::new())?
            .add_source(file)
            .set_override_option("server.host", env("SERVER_HOST"))?
            .set_override_option("server.port", env("SERVER_PORT"))?
            .set_override_option("database.url", env("DATABASE_URL"))?
            .set_override_option("database.max_connections", env("DATABASE_MAX_CONNECTIONS"))?
            .set_override_option("llm.base_url", env("LLM_BASE_URL"))?
            .set_override_option("llm.api_key", env("LLM_API_KEY"))?
            .set_override_option("llm.model", env("LLM_MODEL"))?
            .set_override_option("llm.max_steps", env("LLM_MAX_STEPS"))?
            .set_override_option("llm.timeout_secs", env("LLM_TIMEOUT_SECS"))?
            .set_override_option("auth.tokens", tokens)?
            .build()?
            .try_deserialize()
    }
}
