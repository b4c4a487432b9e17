//! HTTP API client.
//!
//! Thin wrapper over the daemon's HTTP API, used by `kcb-cli`.

use reqwest::header::CONTENT_TYPE;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use thiserror::Error;

use crate::api::ErrorResponse;
use crate::gateway::StatusSnapshot;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gateway returned {status} ({kind}): {message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Deserialize)]
struct Values<T> {
    values: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Positions {
    positions: Vec<u16>,
}

/// Client for one gateway daemon.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
}

impl Client {
    /// `base_url` is the daemon root, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn health(&self) -> Result<String> {
        let response = self.http.get(self.url("health")).send().await?;
        Ok(check(response).await?.text().await?)
    }

    pub async fn read_digital(&self) -> Result<Vec<u8>> {
        let body: Values<u8> = self.get("digital").await?;
        Ok(body.values)
    }

    pub async fn write_digital(&self, values: &[i64]) -> Result<()> {
        self.send(reqwest::Method::POST, "digital", json!({ "values": values }))
            .await
    }

    pub async fn read_servo(&self) -> Result<Vec<u16>> {
        let body: Positions = self.get("servo").await?;
        Ok(body.positions)
    }

    pub async fn write_servo(&self, positions: &[i64]) -> Result<()> {
        self.send(reqwest::Method::POST, "servo", json!({ "values": positions }))
            .await
    }

    pub async fn read_analog(&self) -> Result<Vec<u16>> {
        let body: Values<u16> = self.get("analog").await?;
        Ok(body.values)
    }

    pub async fn write_bus(&self, bus: &str, addr: i64, data: &[i64]) -> Result<()> {
        let body = json!({ "bus": bus, "addr": addr, "data": data });
        self.send(reqwest::Method::PUT, "bus", body).await
    }

    pub async fn write_uart(&self, data: &[i64]) -> Result<()> {
        self.send(reqwest::Method::POST, "uart", json!({ "data": data }))
            .await
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        self.get("status").await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.http.get(self.url(path)).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: serde_json::Value) -> Result<()> {
        let response = self
            .http
            .request(method, self.url(path))
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// Turn a non-success response into [`ClientError::Api`].
async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await?;
    let (kind, message) = match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(body) => (body.kind, body.error),
        Err(_) => ("unknown".to_string(), text),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        kind,
        message,
    })
}
