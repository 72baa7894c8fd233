use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{NaiveDateTime, Utc};
use reqwest::Client;
use tokio::sync::Mutex;

use crate::error::KisError;
use crate::models::TokenResponse;

#[derive(Debug, Clone)]
struct TokenRecord {
    access_token: String,
    expires_at: NaiveDateTime,
}

/// Per-account token cache guarded by a single `RwLock`, plus a refresh mutex
/// to dedupe concurrent expired reads into one `/oauth2/tokenP` call (§4.2,
/// §5).
pub struct TokenManager {
    client: Client,
    cache: RwLock<HashMap<String, TokenRecord>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Returns a token valid at wallclock "now", refreshing through the
    /// broker if the cached one is absent or expired.
    pub async fn get_token(
        &self,
        base_url: &str,
        account_id: &str,
        app_key: &str,
        app_secret: &str,
    ) -> Result<String, KisError> {
        if let Some(token) = self.cached_valid(account_id) {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Re-check after acquiring the refresh lock: another task may have
        // already refreshed while we waited.
        if let Some(token) = self.cached_valid(account_id) {
            return Ok(token);
        }

        let url = format!("{base_url}/oauth2/tokenP");
        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "appkey": app_key,
            "appsecret": app_secret,
        });

        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(KisError::HttpStatus(response.status()));
        }
        let parsed: TokenResponse = response.json().await.map_err(KisError::HttpClient)?;

        let expires_at = NaiveDateTime::parse_from_str(&parsed.expires_at, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| KisError::Token(format!("unparsable token expiry: {e}")))?;

        self.cache.write().unwrap().insert(
            account_id.to_string(),
            TokenRecord {
                access_token: parsed.access_token.clone(),
                expires_at,
            },
        );

        Ok(parsed.access_token)
    }

    fn cached_valid(&self, account_id: &str) -> Option<String> {
        let cache = self.cache.read().unwrap();
        let record = cache.get(account_id)?;
        if record.expires_at > Utc::now().naive_utc() {
            Some(record.access_token.clone())
        } else {
            None
        }
    }
}
