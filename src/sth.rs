//! ==============================================================================
//! sth.rs - short-term history api client
//! ==============================================================================
//!
//! purpose:
//!     fetches the last N values of one entity attribute from the STH
//!     history endpoint. the caller never sees an error from here: transport
//!     failures, bad statuses and unexpected bodies are logged and come back
//!     as an empty batch, which the poll cycle treats as "nothing new".
//!
//! relationships:
//!     - used by: poller.rs (through the HistorySource trait)
//!     - produces: domain.rs RawRecord
//!
//! ==============================================================================

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::config::SthConfig;
use crate::domain::RawRecord;

/// anything that can hand the poll cycle its next batch
pub trait HistorySource: Send + Sync {
    /// fetch the most recent `last_n` records; never fails, empty on error
    fn fetch(&self, last_n: u32) -> impl Future<Output = Vec<RawRecord>> + Send;
}

// ==============================================================================
// response body
// ==============================================================================
// only the path we read is modelled:
// contextResponses[0].contextElement.attributes[0].values[]

#[derive(Debug, Deserialize)]
struct SthResponse {
    #[serde(rename = "contextResponses", default)]
    context_responses: Vec<ContextResponse>,
}

#[derive(Debug, Deserialize)]
struct ContextResponse {
    #[serde(rename = "contextElement")]
    context_element: ContextElement,
}

#[derive(Debug, Deserialize)]
struct ContextElement {
    #[serde(default)]
    attributes: Vec<Attribute>,
}

#[derive(Debug, Deserialize)]
struct Attribute {
    #[serde(default)]
    values: Vec<SthValue>,
}

#[derive(Debug, Deserialize)]
struct SthValue {
    #[serde(rename = "attrValue")]
    attr_value: serde_json::Value,
    #[serde(rename = "recvTime")]
    recv_time: String,
}

/// pull the value list out of a decoded response body
fn extract_records(body: SthResponse) -> Result<Vec<RawRecord>> {
    let attribute = body
        .context_responses
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("missing contextResponses[0]"))?
        .context_element
        .attributes
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("missing contextElement.attributes[0]"))?;

    Ok(attribute
        .values
        .into_iter()
        .map(|v| {
            let value = match v.attr_value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            RawRecord { value, recv_time: v.recv_time }
        })
        .collect())
}

// ==============================================================================
// http client
// ==============================================================================

#[derive(Clone)]
pub struct SthClient {
    http: reqwest::Client,
    config: SthConfig,
}

impl SthClient {
    pub fn new(config: SthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { http, config })
    }

    /// query url for the configured entity attribute
    pub fn url(&self, last_n: u32) -> String {
        let c = &self.config;
        format!(
            "http://{}:{}/STH/v1/contextEntities/type/{}/id/{}/attributes/{}?lastN={}",
            c.host, c.port, c.entity_type, c.entity_id, c.attribute, last_n
        )
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<RawRecord>> {
        let response = self
            .http
            .get(url)
            .header("fiware-service", &self.config.service)
            .header("fiware-servicepath", &self.config.service_path)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("status {}", status));
        }

        let body: SthResponse = response.json().await?;
        extract_records(body)
    }
}

impl HistorySource for SthClient {
    async fn fetch(&self, last_n: u32) -> Vec<RawRecord> {
        let url = self.url(last_n);
        match self.try_fetch(&url).await {
            Ok(records) => {
                tracing::debug!(count = records.len(), "[STH] fetched");
                records
            }
            Err(e) => {
                tracing::warn!("[STH] ⚠ Error fetching {}: {:#}", url, e);
                Vec::new()
            }
        }
    }
}
