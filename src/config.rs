use serde::{Deserialize, Serialize};
use std::path::Path;

/// 应用配置
///
/// 加载顺序 (后者覆盖前者)：内置默认值 → `config/default.toml` →
/// `CFDI_CONFIG` 指定的文件 → `CFDI__SECTION__KEY` 环境变量 →
/// `DATABASE_URL` / `SERVER_HOST` / `SERVER_PORT`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub classifier: ClassifierConfig,
    pub taxonomy: TaxonomyConfig,
    pub log: LogConfig,
    pub review: ReviewConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// 存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub backend: StoreBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// 单次调用超时 (秒)
    pub timeout_secs: u64,
    /// 同时进行的 AI 调用上限
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    pub min_frequency: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/cfdi_classify".to_string(),
                max_connections: 20,
                acquire_timeout_secs: 30,
                backend: StoreBackend::Postgres,
            },
            classifier: ClassifierConfig {
                endpoint: "http://127.0.0.1:9000/classify".to_string(),
                api_key: None,
                model: "default".to_string(),
                timeout_secs: 30,
                max_concurrency: 8,
            },
            taxonomy: TaxonomyConfig {
                path: "config/taxonomy.json".to_string(),
            },
            log: LogConfig {
                level: "info".to_string(),
            },
            review: ReviewConfig { min_frequency: 1 },
        }
    }
}

impl AppConfig {
    /// 从默认文件、`CFDI_CONFIG` 和环境变量加载配置
    pub fn load() -> Result<Self, config::ConfigError> {
        let explicit = std::env::var("CFDI_CONFIG").ok();
        Self::load_from(explicit.as_deref().map(Path::new))
    }

    /// 同 `load`，但显式指定额外的配置文件
    pub fn load_from(file: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/default").required(false));

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let port = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .map(i64::from);

        builder
            .add_source(
                config::Environment::with_prefix("CFDI")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", port)?
            .build()?
            .try_deserialize()
    }
}
