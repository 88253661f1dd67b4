//! OpenSearch output (§4.7): bulk-indexes events into an OpenSearch cluster.
//!
//! Builds the bulk NDJSON request body and parses the `errors`/`items[].index.error` response
//! shape directly over `reqwest` against OpenSearch's `_bulk` HTTP endpoint, rather than pulling
//! in a dedicated client crate (see DESIGN.md for why).

use crate::formatter::FormatterSpec;
use crate::outputs::OutputSink;
use crate::Error;
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

fn default_verify() -> bool {
    true
}

/// Configuration for the `opensearch` output sink (§6 `output.opensearch`).
#[derive(Clone, Debug, Deserialize)]
pub struct OpensearchConfig {
    pub hosts: Vec<String>,
    pub username: String,
    pub password: String,
    pub index: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_verify")]
    pub verify: bool,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_cert_key: Option<String>,
    pub proxy_url: Option<String>,
    pub formatter: FormatterSpec,
}

fn build_client(config: &OpensearchConfig) -> Result<Client, Error> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout))
        .timeout(Duration::from_secs(config.request_timeout))
        .danger_accept_invalid_certs(!config.verify);

    if let Some(ca_path) = &config.ca_cert {
        let pem = std::fs::read(ca_path).map_err(Error::Io)?;
        let cert = Certificate::from_pem(&pem)
            .map_err(|e| Error::Configuration(format!("invalid ca_cert: {e}")))?;
        builder = builder.add_root_certificate(cert);
    }

    if let (Some(cert_path), Some(key_path)) = (&config.client_cert, &config.client_cert_key) {
        let mut pem = std::fs::read(cert_path).map_err(Error::Io)?;
        let mut key = std::fs::read(key_path).map_err(Error::Io)?;
        pem.append(&mut key);
        let identity = Identity::from_pem(&pem)
            .map_err(|e| Error::Configuration(format!("invalid client_cert/client_cert_key: {e}")))?;
        builder = builder.identity(identity);
    } else if config.client_cert.is_some() || config.client_cert_key.is_some() {
        return Err(Error::Configuration(
            "client_cert and client_cert_key must be provided together".into(),
        ));
    }

    if let Some(proxy_url) = &config.proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| Error::Configuration(format!("invalid proxy_url: {e}")))?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Bulk-indexes events against OpenSearch's `_bulk` endpoint, round-robining across `hosts`.
pub struct OpensearchOutput {
    config: OpensearchConfig,
    client: Client,
    next_host: std::sync::atomic::AtomicUsize,
}

impl OpensearchOutput {
    pub fn new(config: OpensearchConfig) -> Result<Self, Error> {
        if config.hosts.is_empty() {
            return Err(Error::Configuration("opensearch.hosts must not be empty".into()));
        }
        for host in &config.hosts {
            reqwest::Url::parse(host).map_err(|e| Error::Configuration(format!("invalid host {host}: {e}")))?;
        }
        let client = build_client(&config)?;
        Ok(OpensearchOutput {
            config,
            client,
            next_host: std::sync::atomic::AtomicUsize::new(0),
        })
    }

    fn next_host(&self) -> &str {
        let i = self.next_host.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % self.config.hosts.len();
        &self.config.hosts[i]
    }
}

#[async_trait]
impl OutputSink for OpensearchOutput {
    async fn open(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&self, events: &[String]) -> Result<usize, Error> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut body = String::new();
        for event in events {
            if serde_json::from_str::<serde_json::Value>(event).is_err() {
                warn!("skipping non-JSON event for opensearch output");
                continue;
            }
            body.push_str(&format!(r#"{{"index":{{"_index":"{}"}}}}"#, self.config.index));
            body.push('\n');
            body.push_str(event);
            body.push('\n');
        }
        if body.is_empty() {
            return Ok(0);
        }

        let url = format!("{}/_bulk", self.next_host().trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .basic_auth(&self.config.username, Some(&self.config.password))
            .body(body)
            .send()
            .await
            .map_err(Error::Http)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::DeliveryError(format!("bulk request failed with status {status}")));
        }

        let json: serde_json::Value = response.json().await.map_err(Error::Http)?;
        let items = json["items"].as_array().cloned().unwrap_or_default();
        let failed = items
            .iter()
            .filter(|item| !item["index"]["error"].is_null())
            .count();
        for item in items.iter().filter(|item| !item["index"]["error"].is_null()) {
            warn!(error = %item["index"]["error"], "opensearch output dropped event");
        }

        Ok(events.len().saturating_sub(failed))
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn formatter(&self) -> &FormatterSpec {
        &self.config.formatter
    }
}
