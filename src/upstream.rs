use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::info;

use crate::config::UpstreamSettings;
use crate::error::NklError;
use crate::sheet::Table;

/// Source of the full inventory master, pulled on demand.
pub trait UpstreamSource: Send + Sync {
    fn pull(&self) -> Result<Table, NklError>;
}

#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    settings: UpstreamSettings,
}

impl HttpUpstream {
    pub fn new(settings: UpstreamSettings) -> Result<Self, NklError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("pareto-nkl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| NklError::UpstreamHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|err| NklError::UpstreamHttp(err.to_string()))?;
        Ok(Self { client, settings })
    }
}

impl UpstreamSource for HttpUpstream {
    fn pull(&self) -> Result<Table, NklError> {
        let response = self
            .client
            .post(&self.settings.url)
            .form(&[("api_key", self.settings.api_key.as_str())])
            .send()
            .map_err(|err| NklError::UpstreamHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "upstream request failed".to_string());
            return Err(NklError::UpstreamStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| NklError::UpstreamPayload(err.to_string()))?;
        let table = records_table(body)?;
        info!(rows = table.len(), "upstream master pulled");
        Ok(table)
    }
}

/// Accepts only a JSON array of row objects.
pub fn records_table(body: Value) -> Result<Table, NklError> {
    let Value::Array(items) = body else {
        return Err(NklError::UpstreamPayload("expected a JSON array".to_string()));
    };
    let records = items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(NklError::UpstreamPayload(format!(
                "expected row objects, got {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Table::from_records(&records))
}
