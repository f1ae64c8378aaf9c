use once_cell::sync::OnceCell;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStoreKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub app_env: String,
    pub log_level: String,
    pub log_max_files: String,
    pub cors_origins: Vec<String>,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub agent_model: String,
    pub tool_model: String,
    pub planning_model: String,
    pub embedding_base_url: String,
    pub embedding_api_key: String,
    pub meaning_embedding_model: String,
    pub topic_embedding_model: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub session_store: SessionStoreKind,
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,
    pub redis_password: Option<String>,
    pub session_ttl_seconds: u64,
    pub session_lock_timeout_seconds: u64,
    pub history_max_messages: usize,
    pub history_max_tokens: i64,
    pub http_timeout_seconds: u64,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn init_global() -> Result<&'static Config, String> {
        let cfg = Config::from_env()?;
        CONFIG.set(cfg).map_err(|_| "Config already initialized".to_string())?;
        CONFIG.get().ok_or_else(|| "Config not initialized".to_string())
    }

    pub fn get() -> &'static Config {
        CONFIG.get().expect("Config not initialized")
    }

    pub fn from_env() -> Result<Config, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str, def: &str| -> String {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| def.to_string())
        };
        let read_opt = |key: &str| -> Option<String> {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let read_u64 = |key: &str, def: u64| -> u64 {
            lookup(key).and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(def)
        };
        let read_i64 = |key: &str, def: i64| -> i64 {
            lookup(key).and_then(|v| v.trim().parse::<i64>().ok()).unwrap_or(def)
        };

        let openai_api_key = read("OPENAI_API_KEY", "");
        let openai_base_url = read("OPENAI_BASE_URL", "https://api.openai.com/v1");

        let session_store = match read("SESSION_STORE", "redis").to_lowercase().as_str() {
            "redis" => SessionStoreKind::Redis,
            "memory" => SessionStoreKind::Memory,
            other => return Err(format!("unsupported SESSION_STORE: {other}")),
        };

        let cors_origins = match read_opt("CORS_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => vec!["*".to_string()],
        };

        Ok(Config {
            host: read("HOST", "0.0.0.0"),
            port: lookup("PORT").and_then(|v| v.trim().parse::<u16>().ok()).unwrap_or(8000),
            app_env: read("APP_ENV", "development"),
            log_level: read("LOG_LEVEL", "info"),
            log_max_files: read("LOG_MAX_FILES", "7d"),
            cors_origins,
            embedding_base_url: read("EMBEDDING_BASE_URL", &openai_base_url),
            embedding_api_key: read("EMBEDDING_API_KEY", &openai_api_key),
            openai_api_key,
            openai_base_url,
            agent_model: read("AGENT_MODEL", "gpt-4o-mini"),
            tool_model: read("TOOL_MODEL", "gpt-4o-mini"),
            planning_model: read("PLANNING_MODEL", "gpt-4o"),
            meaning_embedding_model: read("MEANING_EMBEDDING_MODEL", "intfloat/e5-large"),
            topic_embedding_model: read("TOPIC_EMBEDDING_MODEL", "jhgan/ko-sbert-nli"),
            qdrant_url: read("QDRANT_URL", "http://localhost:6333"),
            qdrant_api_key: read_opt("QDRANT_API_KEY"),
            session_store,
            redis_host: read("REDIS_HOST", "localhost"),
            redis_port: lookup("REDIS_PORT").and_then(|v| v.trim().parse::<u16>().ok()).unwrap_or(6379),
            redis_db: read_i64("REDIS_DB", 0),
            redis_password: read_opt("REDIS_PASSWORD"),
            session_ttl_seconds: read_u64("SESSION_TTL_SECONDS", 86_400),
            session_lock_timeout_seconds: read_u64("SESSION_LOCK_TIMEOUT_SECONDS", 10).max(1),
            history_max_messages: read_u64("HISTORY_MAX_MESSAGES", 50).max(2) as usize,
            history_max_tokens: read_i64("HISTORY_MAX_TOKENS", 12_000),
            http_timeout_seconds: read_u64("HTTP_TIMEOUT_SECONDS", 120),
        })
    }

    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis_host, self.redis_port, self.redis_db
            ),
            None => format!("redis://{}:{}/{}", self.redis_host, self.redis_port, self.redis_db),
        }
    }

    pub fn print(&self) {
        let set_or_not = |v: &str| if v.is_empty() { "not set" } else { "set" };
        info!("[CONFIG] APP_ENV={}, HOST={}, PORT={}", self.app_env, self.host, self.port);
        info!(
            "[CONFIG] OPENAI_BASE_URL={}, OPENAI_API_KEY={}",
            self.openai_base_url,
            set_or_not(&self.openai_api_key)
        );
        info!(
            "[CONFIG] models: agent={}, tool={}, planning={}",
            self.agent_model, self.tool_model, self.planning_model
        );
        info!(
            "[CONFIG] embeddings: base={}, meaning={}, topic={}",
            self.embedding_base_url, self.meaning_embedding_model, self.topic_embedding_model
        );
        info!(
            "[CONFIG] QDRANT_URL={}, QDRANT_API_KEY={}",
            self.qdrant_url,
            set_or_not(self.qdrant_api_key.as_deref().unwrap_or(""))
        );
        info!(
            "[CONFIG] session store={:?}, redis={}:{}/{}, ttl={}s, lock_timeout={}s",
            self.session_store,
            self.redis_host,
            self.redis_port,
            self.redis_db,
            self.session_ttl_seconds,
            self.session_lock_timeout_seconds
        );
        info!(
            "[CONFIG] history: max_messages={}, max_tokens={}",
            self.history_max_messages, self.history_max_tokens
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, SessionStoreKind};

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let cfg = config_from(&[]).expect("defaults should load");
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.session_store, SessionStoreKind::Redis);
        assert_eq!(cfg.session_ttl_seconds, 86_400);
        assert_eq!(cfg.session_lock_timeout_seconds, 10);
        assert_eq!(cfg.history_max_messages, 50);
        assert_eq!(cfg.cors_origins, vec!["*".to_string()]);
        assert_eq!(cfg.embedding_base_url, cfg.openai_base_url);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let cfg = config_from(&[("PORT", "abc"), ("SESSION_TTL_SECONDS", "-5")]).unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.session_ttl_seconds, 86_400);
    }

    #[test]
    fn embedding_settings_inherit_openai_values() {
        let cfg = config_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_BASE_URL", "http://llm.local/v1"),
        ])
        .unwrap();
        assert_eq!(cfg.embedding_api_key, "sk-test");
        assert_eq!(cfg.embedding_base_url, "http://llm.local/v1");
    }

    #[test]
    fn rejects_unknown_session_store() {
        assert!(config_from(&[("SESSION_STORE", "postgres")]).is_err());
        let cfg = config_from(&[("SESSION_STORE", "Memory")]).unwrap();
        assert_eq!(cfg.session_store, SessionStoreKind::Memory);
    }

    #[test]
    fn builds_redis_url_with_and_without_password() {
        let cfg = config_from(&[("REDIS_DB", "2")]).unwrap();
        assert_eq!(cfg.redis_url(), "redis://localhost:6379/2");
        let cfg = config_from(&[("REDIS_PASSWORD", "pw")]).unwrap();
        assert_eq!(cfg.redis_url(), "redis://:pw@localhost:6379/0");
    }
}
