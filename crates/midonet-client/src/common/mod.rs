//! Common utilities for the MidoNet API client
//!
//! Provides the authenticated HTTP wrapper used by every endpoint.

pub mod media;

use crate::config::MidonetApiConf;
use crate::error::MidonetError;
use crate::models::Token;
pub use media::MediaKind;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// HTTP client wrapper with token authentication
///
/// Logs in lazily on the first request and once more whenever the API answers 401.
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    user_name: String,
    password: String,
    project_id: String,
    version: u32,
    token: RwLock<Option<String>>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, conf: &MidonetApiConf) -> Self {
        Self {
            client,
            base_url: conf.url.trim_end_matches('/').to_string(),
            user_name: conf.user_name.clone(),
            password: conf.password.clone(),
            project_id: conf.project_id.clone(),
            version: conf.api_version(),
            token: RwLock::new(None),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// API version used to pick media types and route paths
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// `POST /login` with basic auth and cache the returned token
    pub async fn login(&self) -> Result<String, MidonetError> {
        let url = self.build_url("/login");
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user_name, Some(&self.password))
            .header("X-Auth-Project", &self.project_id)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(MidonetError::Authentication(format!(
                "Login failed: {} - {}",
                status, body
            )));
        }

        let token: Token = response.json().await?;
        if token.key.is_empty() {
            return Err(MidonetError::Authentication("login response carried no key".to_string()));
        }

        info!("Logged in to MidoNet API at {}", self.base_url);
        *self.token.write().await = Some(token.key.clone());
        Ok(token.key)
    }

    async fn current_token(&self) -> Result<String, MidonetError> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.login().await
    }

    /// Send an authenticated request, logging in again once on 401
    async fn send(
        &self,
        method: Method,
        path: &str,
        kind: MediaKind,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, MidonetError> {
        let url = self.build_url(path);
        let mut token = self.current_token().await?;

        for attempt in 0..2 {
            debug!("{} {}", method, url);
            let mut request = self
                .client
                .request(method.clone(), &url)
                .header("Content-Type", kind.media_type(self.version))
                .header("X-Auth-Token", &token);
            if let Some(body) = body {
                request = request.body(serde_json::to_vec(body)?);
            }

            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!("Token rejected for {} {}, logging in again", method, path);
                token = self.login().await?;
                continue;
            }
            return Ok(response);
        }

        Err(MidonetError::Authentication(format!(
            "{} {} rejected after re-login",
            method, path
        )))
    }

    async fn check(response: Response, method: &Method, path: &str) -> Result<Response, MidonetError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(MidonetError::NotFound(format!(
                "Resource not found: {} - {}",
                path, body
            ))),
            StatusCode::CONFLICT => Err(MidonetError::Conflict(format!("{} {}: {}", method, path, body))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(MidonetError::Authentication(format!(
                "{} {} failed: {} - {}",
                method, path, status, body
            ))),
            _ => Err(MidonetError::Api(format!(
                "{} {} failed: {} - {}",
                method, path, status, body
            ))),
        }
    }

    /// Make a POST request with a JSON body
    pub async fn post<T: Serialize>(&self, path: &str, kind: MediaKind, body: &T) -> Result<(), MidonetError> {
        let body = serde_json::to_value(body)?;
        debug!("POST {} with body: {}", path, body);
        let response = self.send(Method::POST, path, kind, Some(&body)).await?;
        Self::check(response, &Method::POST, path).await?;
        Ok(())
    }

    /// Make a GET request returning a collection
    pub async fn get_list<T: DeserializeOwned>(&self, path: &str, kind: MediaKind) -> Result<Vec<T>, MidonetError> {
        let response = self.send(Method::GET, path, kind, None).await?;
        let response = Self::check(response, &Method::GET, path).await?;

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            MidonetError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str, kind: MediaKind) -> Result<(), MidonetError> {
        let response = self.send(Method::DELETE, path, kind, None).await?;
        Self::check(response, &Method::DELETE, path).await?;
        Ok(())
    }
}
