//! ClickHouse output (§4.7): batch-inserts events into a ClickHouse table via its HTTP
//! interface, using the JSONEachRow insert format.
//!
//! Validates `database`/`table` identifiers against SQL injection before interpolating them into
//! the `INSERT ... FORMAT JSONEachRow` query string, and skips (with a warning) any event that
//! doesn't decode as a JSON object rather than failing the whole batch. TLS/auth knobs cover
//! `verify`/`ca_cert`/`client_cert*`/`tls_mode`.

use crate::formatter::FormatterSpec;
use crate::outputs::OutputSink;
use crate::Error;
use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity};
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

fn default_port() -> u16 {
    8123
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_database() -> String {
    "default".to_string()
}

fn default_username() -> String {
    "default".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

fn default_verify() -> bool {
    true
}

/// Mode of TLS behaviour against the ClickHouse server. `proxy`/`strict` send client
/// certificates without negotiating ClickHouse mutual TLS; `mutual` assumes ClickHouse-side
/// mutual TLS authentication.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    Proxy,
    Strict,
    Mutual,
}

/// Configuration for the `clickhouse` output sink (§6 `output.clickhouse`).
#[derive(Clone, Debug, Deserialize)]
pub struct ClickhouseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_database")]
    pub database: String,
    pub table: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub dsn: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_verify")]
    pub verify: bool,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_cert_key: Option<String>,
    pub server_host_name: Option<String>,
    pub tls_mode: Option<TlsMode>,
    pub formatter: FormatterSpec,
}

/// Validate a ClickHouse identifier (database or table name) against injection into a raw SQL
/// query string.
fn validate_identifier(identifier: &str) -> Result<(), Error> {
    let first = identifier.chars().next().ok_or_else(|| {
        Error::Configuration("clickhouse identifier must not be empty".into())
    })?;
    if !first.is_alphabetic() && first != '_' {
        return Err(Error::Configuration(format!(
            "invalid clickhouse identifier {identifier:?}: must start with a letter or underscore"
        )));
    }
    if !identifier.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(Error::Configuration(format!(
            "invalid clickhouse identifier {identifier:?}: must be alphanumeric/underscore"
        )));
    }
    Ok(())
}

fn build_client(config: &ClickhouseConfig) -> Result<Client, Error> {
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

    builder.build().map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))
}

/// Inserts events as rows via ClickHouse's HTTP interface, using `FORMAT JSONEachRow`.
pub struct ClickhouseOutput {
    config: ClickhouseConfig,
    client: Client,
    base_url: String,
}

impl ClickhouseOutput {
    pub fn new(config: ClickhouseConfig) -> Result<Self, Error> {
        validate_identifier(&config.database)?;
        validate_identifier(&config.table)?;
        let client = build_client(&config)?;
        let base_url = if let Some(dsn) = &config.dsn {
            dsn.clone()
        } else {
            format!("{}://{}:{}", config.protocol, config.host, config.port)
        };
        Ok(ClickhouseOutput { config, client, base_url })
    }
}

#[async_trait]
impl OutputSink for ClickhouseOutput {
    async fn open(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&self, events: &[String]) -> Result<usize, Error> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(events.len());
        for event in events {
            match serde_json::from_str::<serde_json::Value>(event) {
                Ok(value) if value.is_object() => rows.push(value.to_string()),
                Ok(_) => warn!("skipping non-object JSON event for clickhouse output"),
                Err(e) => warn!(error = %e, "skipping invalid JSON event for clickhouse output"),
            }
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let url = format!(
            "{}/?database={}&query=INSERT%20INTO%20{}%20FORMAT%20JSONEachRow",
            self.base_url, self.config.database, self.config.table
        );
        let body = rows.join("\n");

        let mut request = self.client.post(&url).body(body);
        if !self.config.password.is_empty() || self.config.username != "default" {
            request = request.basic_auth(&self.config.username, Some(&self.config.password));
        }

        let response = request.send().await.map_err(Error::Http)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::DeliveryError(format!(
                "clickhouse insert failed with status {status}: {body}"
            )));
        }

        Ok(rows.len())
    }

    async fn close(&self) -> Result<(), Error> {
        Ok(())
    }

    fn formatter(&self) -> &FormatterSpec {
        &self.config.formatter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClickhouseConfig {
        ClickhouseConfig {
            host: "localhost".to_string(),
            port: 8123,
            protocol: "http".to_string(),
            database: "default".to_string(),
            table: "events".to_string(),
            username: "default".to_string(),
            password: String::new(),
            dsn: None,
            connect_timeout: 10,
            request_timeout: 300,
            verify: true,
            ca_cert: None,
            client_cert: None,
            client_cert_key: None,
            server_host_name: None,
            tls_mode: None,
            formatter: FormatterSpec::Plain,
        }
    }

    #[test]
    fn rejects_invalid_table_identifier() {
        let mut c = config();
        c.table = "events; DROP TABLE x".to_string();
        assert!(ClickhouseOutput::new(c).is_err());
    }

    #[test]
    fn accepts_valid_identifiers() {
        assert!(ClickhouseOutput::new(config()).is_ok());
    }
}
