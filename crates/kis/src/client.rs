use std::time::Duration;

use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::Value;

use crate::error::KisError;

const REAL_BASE_URL: &str = "https://openapi.koreainvestment.com:9443";
const VIRTUAL_BASE_URL: &str = "https://openapivts.koreainvestment.com:29443";

#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    pub http: Option<String>,
    pub https: Option<String>,
}

/// Thin HTTP wrapper over KIS's REST surface. Holds no account state; the
/// caller supplies the bearer token, TR ID, and app credentials per call,
/// since those vary per account and per request (§4.2).
#[derive(Clone)]
pub struct KisRestClient {
    http: Client,
}

impl KisRestClient {
    pub fn new() -> Result<Self, KisError> {
        Self::new_with_proxy(ProxyOptions::default())
    }

    pub fn new_with_proxy(proxy: ProxyOptions) -> Result<Self, KisError> {
        let mut builder = Client::builder()
            .user_agent(concat!("router-execution-adapter/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30));

        if let Some(http) = proxy.http {
            builder = builder.proxy(reqwest::Proxy::http(http)?);
        }
        if let Some(https) = proxy.https {
            builder = builder.proxy(reqwest::Proxy::https(https)?);
        }

        Ok(Self {
            http: builder.build()?,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.http
    }

    pub fn base_url(is_virtual: bool) -> &'static str {
        if is_virtual {
            VIRTUAL_BASE_URL
        } else {
            REAL_BASE_URL
        }
    }

    #[tracing::instrument(skip(self, access_token, app_key, app_secret))]
    pub async fn get(
        &self,
        base_url: &str,
        path: &str,
        query: &[(&str, &str)],
        access_token: &str,
        app_key: &str,
        app_secret: &str,
        tr_id: &str,
    ) -> Result<Value, KisError> {
        self.execute(
            Method::GET,
            base_url,
            path,
            access_token,
            app_key,
            app_secret,
            tr_id,
            |req| req.query(query),
        )
        .await
    }

    #[tracing::instrument(skip(self, body, access_token, app_key, app_secret))]
    pub async fn post<B: Serialize>(
        &self,
        base_url: &str,
        path: &str,
        body: &B,
        access_token: &str,
        app_key: &str,
        app_secret: &str,
        tr_id: &str,
    ) -> Result<Value, KisError> {
        self.execute(
            Method::POST,
            base_url,
            path,
            access_token,
            app_key,
            app_secret,
            tr_id,
            |req| req.json(body),
        )
        .await
    }

    async fn execute(
        &self,
        method: Method,
        base_url: &str,
        path: &str,
        access_token: &str,
        app_key: &str,
        app_secret: &str,
        tr_id: &str,
        apply: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder,
    ) -> Result<Value, KisError> {
        let url = format!("{base_url}{path}");
        let request = self
            .http
            .request(method, &url)
            .header("Content-Type", "application/json; charset=UTF-8")
            .header("Accept", "text/plain")
            .header("authorization", format!("Bearer {access_token}"))
            .header("appkey", app_key)
            .header("appsecret", app_secret)
            .header("tr_id", tr_id)
            .header("custtype", "P")
            .header("tr_cont", "");

        let response = apply(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KisError::HttpStatus(status));
        }

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(KisError::EmptyResponse(url));
        }
        serde_json::from_str(&body).map_err(KisError::Deserialize)
    }
}
