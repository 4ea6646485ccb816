//! etcd v2 keys API client
//!
//! Talks to `/v2/keys` over HTTP. Endpoints are tried in configuration order and the
//! next one is used when a request fails at the transport layer.

use crate::config::EtcdConf;
use crate::error::StoreError;
use crate::models::{ErrorBody, KeysResponse, Node, WatchEvent};
use crate::store_trait::KeyValueStore;
use reqwest::{Client, Method, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound on a single long-poll watch request. The lock loop re-arms on timeout.
const WATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// etcd v2 client
pub struct EtcdClient {
    client: Client,
    endpoints: Vec<String>,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for EtcdClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdClient")
            .field("endpoints", &self.endpoints)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl EtcdClient {
    /// Create a new etcd client
    ///
    /// # Arguments
    /// * `conf` - endpoints, optional basic-auth credentials and request timeout
    pub fn new(conf: &EtcdConf) -> Result<Self, StoreError> {
        let endpoints: Vec<String> = conf
            .urls
            .iter()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(StoreError::InvalidConfig("at least one etcd url is required".to_string()));
        }

        let client = Client::builder().timeout(conf.request_timeout()).build()?;

        Ok(Self {
            client,
            endpoints,
            username: conf.username.clone().filter(|u| !u.is_empty()),
            password: conf.password.clone(),
        })
    }

    /// Configured endpoints
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn key_url(endpoint: &str, key: &str) -> String {
        let encoded: Vec<String> = key
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/v2/keys/{}", endpoint, encoded.join("/"))
    }

    fn request(&self, method: Method, endpoint: &str, key: &str) -> RequestBuilder {
        let builder = self.client.request(method, Self::key_url(endpoint, key));
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    /// Send a request, falling over to the next endpoint on transport failure.
    async fn send<F>(&self, method: Method, key: &str, customize: F) -> Result<Response, StoreError>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            let builder = customize(self.request(method.clone(), endpoint, key));
            match builder.send().await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_timeout() => return Err(StoreError::Http(e)),
                Err(e) => {
                    warn!("etcd endpoint {} failed for {} {}: {}", endpoint, method, key, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(StoreError::Http(e)),
            None => Err(StoreError::InvalidConfig("no etcd endpoints configured".to_string())),
        }
    }

    async fn parse(response: Response, key: &str) -> Result<KeysResponse, StoreError> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(StoreError::Serialization);
        }

        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(error) => {
                debug!("etcd error {} for {}: {}", error.error_code, key, error.message);
                Err(StoreError::from_code(error.error_code, error.message, key))
            }
            Err(_) => Err(StoreError::Api {
                code: u64::from(status.as_u16()),
                message: format!("Failed request for {}: {} - {}", key, status, body),
            }),
        }
    }

    fn into_node(response: KeysResponse, key: &str) -> Result<Node, StoreError> {
        response
            .node
            .ok_or_else(|| StoreError::InvalidResponse(format!("response for {} carried no node", key)))
    }

    async fn put(&self, key: &str, form: &[(&str, &str)], query: &[(&str, String)]) -> Result<Node, StoreError> {
        debug!("etcd PUT {}", key);
        let response = self
            .send(Method::PUT, key, |builder| builder.query(query).form(form))
            .await?;
        Self::into_node(Self::parse(response, key).await?, key)
    }
}

#[async_trait::async_trait]
impl KeyValueStore for EtcdClient {
    async fn get(&self, key: &str) -> Result<Node, StoreError> {
        debug!("etcd GET {}", key);
        let response = self.send(Method::GET, key, |builder| builder).await?;
        Self::into_node(Self::parse(response, key).await?, key)
    }

    async fn list(&self, dir: &str) -> Result<Vec<Node>, StoreError> {
        debug!("etcd LIST {}", dir);
        let response = self
            .send(Method::GET, dir, |builder| builder.query(&[("sorted", "true")]))
            .await?;
        let node = Self::into_node(Self::parse(response, dir).await?, dir)?;
        if !node.dir {
            return Err(StoreError::NotADirectory(dir.to_string()));
        }
        Ok(node.nodes)
    }

    async fn set(&self, key: &str, value: &str) -> Result<Node, StoreError> {
        self.put(key, &[("value", value)], &[]).await
    }

    async fn create(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<Node, StoreError> {
        let mut query = vec![("prevExist", "false".to_string())];
        if let Some(ttl) = ttl {
            query.push(("ttl", ttl.as_secs().max(1).to_string()));
        }
        self.put(key, &[("value", value)], &query).await
    }

    async fn update(&self, key: &str, value: &str) -> Result<Node, StoreError> {
        self.put(key, &[("value", value)], &[("prevExist", "true".to_string())]).await
    }

    async fn delete(&self, key: &str) -> Result<Node, StoreError> {
        debug!("etcd DELETE {}", key);
        let response = self.send(Method::DELETE, key, |builder| builder).await?;
        let parsed = Self::parse(response, key).await?;
        Ok(parsed.prev_node.or(parsed.node).unwrap_or_default())
    }

    async fn compare_and_delete(&self, key: &str, prev_value: &str) -> Result<Node, StoreError> {
        debug!("etcd DELETE {} (prevValue)", key);
        let response = self
            .send(Method::DELETE, key, |builder| builder.query(&[("prevValue", prev_value)]))
            .await?;
        let parsed = Self::parse(response, key).await?;
        Ok(parsed.prev_node.or(parsed.node).unwrap_or_default())
    }

    async fn delete_dir(&self, dir: &str) -> Result<(), StoreError> {
        debug!("etcd DELETE {} (recursive)", dir);
        let response = self
            .send(Method::DELETE, dir, |builder| {
                builder.query(&[("recursive", "true"), ("dir", "true")])
            })
            .await?;
        match Self::parse(response, dir).await {
            Ok(_) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn watch(&self, key: &str, wait_index: u64) -> Result<WatchEvent, StoreError> {
        debug!("etcd WATCH {} from index {}", key, wait_index);
        let index = wait_index.to_string();
        let response = self
            .send(Method::GET, key, |builder| {
                builder
                    .query(&[("wait", "true"), ("waitIndex", index.as_str())])
                    .timeout(WATCH_TIMEOUT)
            })
            .await?;
        let parsed = Self::parse(response, key).await?;
        let action = parsed.action;
        let node = Self::into_node(parsed, key)?;
        Ok(WatchEvent { action, node })
    }
}
