//! InfluxDB 1.x HTTP client

use super::{encode_batch, Point, TimeSeriesStore};
use crate::error::{ConfigError, StoreError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Error text InfluxDB returns when writing to an unknown database
const DATABASE_NOT_FOUND: &str = "database not found";

/// Time-series store backed by the InfluxDB HTTP API
pub struct InfluxClient {
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl InfluxClient {
    /// Create a new client for the server at `address`
    pub fn new(
        address: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidStoreAddress {
            address: address.to_string(),
            reason,
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| invalid(format!("failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(address).map_err(|e| invalid(e.to_string()))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            username: username.filter(|u| !u.is_empty()),
            password: password.filter(|p| !p.is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        self.base_url
            .join(path)
            .map_err(|e| StoreError::Other(format!("invalid InfluxDB path {path}: {e}")))
    }

    fn credentials(&self) -> Vec<(&'static str, &str)> {
        let mut params = Vec::new();
        if let Some(username) = &self.username {
            params.push(("u", username.as_str()));
        }
        if let Some(password) = &self.password {
            params.push(("p", password.as_str()));
        }
        params
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxClient {
    async fn write_batch(&self, database: &str, points: &[Point]) -> Result<(), StoreError> {
        let body = encode_batch(points);
        if body.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .post(self.endpoint("write")?)
            .query(&[("db", database), ("precision", "s")])
            .query(&self.credentials())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(database = %database, points = points.len(), "Wrote batch");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .unwrap_or(body);

        if message.contains(DATABASE_NOT_FOUND) {
            return Err(StoreError::DatabaseMissing(database.to_string()));
        }

        Err(StoreError::Other(format!("write failed ({status}): {message}")))
    }

    async fn create_database(&self, name: &str) -> Result<(), StoreError> {
        let statement = format!("CREATE DATABASE \"{}\"", name.replace('"', "\\\""));

        let response = self
            .client
            .post(self.endpoint("query")?)
            .query(&self.credentials())
            .form(&[("q", statement.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StoreError::Other(format!(
                "create database failed ({status}): {body}"
            )));
        }

        let result: QueryResponse = serde_json::from_str(&body).unwrap_or_default();
        if let Some(error) = result
            .error
            .or_else(|| result.results.into_iter().find_map(|r| r.error))
        {
            return Err(StoreError::Other(format!("create database failed: {error}")));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    error: Option<String>,
}
