//! Emvi HTTP 客户端实现

use std::time::{Duration, Instant};

use async_trait::async_trait;
use folio_common::{RetryConfig, is_retryable_error, with_conditional_retry};
use folio_config::EmviConfig;
use folio_errors::{AppError, AppResult};
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::{ArticleResponse, ArticleResults, TokenResponse};
use crate::{Article, ArticleContent, ArticleFilter, ContentSource};

/// 令牌在过期前多久视为失效
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct AccessToken {
    value: String,
    expires_at: Instant,
}

/// Emvi API 客户端
pub struct EmviClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: Secret<String>,
    orga: String,
    api_url: String,
    auth_url: String,
    retry: RetryConfig,
    token: Mutex<Option<AccessToken>>,
}

impl EmviClient {
    pub fn new(config: &EmviConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            orga: config.orga.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            auth_url: config.auth_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            token: Mutex::new(None),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 获取 client-credentials 令牌，未过期时复用
    async fn access_token(&self) -> AppResult<String> {
        let mut token = self.token.lock().await;

        if let Some(ref current) = *token {
            if current.expires_at > Instant::now() {
                return Ok(current.value.clone());
            }
        }

        debug!("Requesting Emvi access token");
        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret.expose_secret(),
        });
        let url = format!("{}/api/v1/auth/token", self.auth_url);
        let response: TokenResponse = self
            .send_json("emvi_token", || self.http.post(&url).json(&body))
            .await?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *token = Some(AccessToken {
            value: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(response.access_token)
    }

    async fn get_api<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.api_url, path);

        let result = self
            .send_json(operation, || {
                self.http
                    .get(&url)
                    .query(query)
                    .bearer_auth(&token)
                    .header("Client", &self.client_id)
                    .header("Organization", &self.orga)
            })
            .await;

        if let Err(AppError::ExternalService(ref msg)) = result {
            if msg.contains(StatusCode::UNAUTHORIZED.as_str()) {
                // 令牌被服务端吊销，下次重新获取
                self.token.lock().await.take();
            }
        }

        result
    }

    async fn send_json<T, F>(&self, operation: &str, request: F) -> AppResult<T>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let response = self.send(operation, request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| AppError::external_service(format!("{}: invalid response: {}", operation, e)))
    }

    async fn send<F>(&self, operation: &str, request: F) -> AppResult<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let request = &request;
        with_conditional_retry(
            &self.retry,
            operation,
            move || async move {
                let response = request()
                    .send()
                    .await
                    .map_err(|e| AppError::external_service(format!("{}: {}", operation, e)))?;

                let status = response.status();
                if !status.is_success() {
                    return Err(AppError::external_service(format!(
                        "{}: {}",
                        operation, status
                    )));
                }

                Ok(response)
            },
            |e| is_retryable_error(&e.to_string()),
        )
        .await
    }
}

#[async_trait]
impl ContentSource for EmviClient {
    async fn find_articles(&self, query: &str, filter: &ArticleFilter) -> AppResult<Vec<Article>> {
        let mut params = filter.query_params();
        if !query.is_empty() {
            params.push(("query", query.to_string()));
        }

        let results: ArticleResults = self
            .get_api("emvi_find_articles", "/api/v1/search/article", &params)
            .await?;
        Ok(results.results)
    }

    async fn get_article(&self, id: &str, language_id: &str) -> AppResult<ArticleContent> {
        let params = [
            ("lang", language_id.to_string()),
            ("version", "0".to_string()),
        ];
        let path = format!("/api/v1/article/{}", id);

        let response: ArticleResponse = self.get_api("emvi_get_article", &path, &params).await?;
        Ok(response.content)
    }

    async fn download(&self, url: &str) -> AppResult<Vec<u8>> {
        let response = self.send("emvi_download", || self.http.get(url)).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::external_service(format!("emvi_download: {}", e)))?;
        Ok(bytes.to_vec())
    }
}
