use anyhow::{Context, Result};
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Global configuration accessor to keep the rest of the application stateless.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    AppConfig::load_from_env().expect("failed to load configuration from environment")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Raw JSON array of account records, sourced from `ROUTER_ACCOUNTS_JSON`.
    pub accounts_json: Option<String>,
    #[serde(default = "default_kis_real_base")]
    pub kis_real_base: String,
    #[serde(default = "default_kis_virtual_base")]
    pub kis_virtual_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl AppConfig {
    /// Build configuration from well-known environment variables.
    pub fn load_from_env() -> Result<Self> {
        preload_env_files();

        let accounts_json = env_var_non_empty("ROUTER_ACCOUNTS_JSON").ok();

        let kis_real_base =
            env::var("KIS_REAL_BASE_URL").unwrap_or_else(|_| default_kis_real_base());
        let kis_virtual_base =
            env::var("KIS_VIRTUAL_BASE_URL").unwrap_or_else(|_| default_kis_virtual_base());
        let request_timeout_secs = env::var("KIS_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or_else(default_request_timeout_secs);

        Ok(Self {
            accounts_json,
            kis_real_base,
            kis_virtual_base,
            request_timeout_secs,
        })
    }

    /// Helper that forces the presence of the accounts blob.
    pub fn require_accounts_json(&self) -> Result<&str> {
        self.accounts_json.as_deref().context(
            "未找到账户配置：请设置环境变量 ROUTER_ACCOUNTS_JSON 为账户数组的 JSON 字符串",
        )
    }
}

fn env_var_non_empty(key: &str) -> Result<String, env::VarError> {
    let value = env::var(key)?;
    if value.trim().is_empty() {
        return Err(env::VarError::NotPresent);
    }
    Ok(value)
}

fn default_kis_real_base() -> String {
    "https://openapi.koreainvestment.com:9443".to_string()
}

fn default_kis_virtual_base() -> String {
    "https://openapivts.koreainvestment.com:29443".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn preload_env_files() {
    // 自动加载当前目录或上层目录中的 .env 文件（如果存在）
    let _ = dotenv();

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let candidate_files = [manifest_dir.join(".env"), manifest_dir.join("../../.env")];

    for path in candidate_files {
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
