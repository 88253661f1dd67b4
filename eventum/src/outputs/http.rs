//! HTTP output (§4.7): delivers one request per event to an HTTP endpoint.
//!
//! `reqwest`-based HTTP output: client/request-builder split, basic auth, configurable
//! success status code, TLS and proxy knobs, per-event concurrent delivery with a per-event
//! error count rather than an all-or-nothing batch failure.

use crate::formatter::FormatterSpec;
use crate::outputs::OutputSink;
use crate::Error;
use async_trait::async_trait;
use futures::future::join_all;
use reqwest::{Certificate, Client, Identity, Method};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

fn default_method() -> String {
    "POST".to_string()
}

fn default_success_code() -> u16 {
    200
}

fn default_verify() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

/// Configuration for the `http` output sink (§6 `output.http`).
#[derive(Clone, Debug, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default = "default_success_code")]
    pub success_code: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_verify")]
    pub verify: bool,
    pub ca_cert: Option<String>,
    pub client_cert: Option<String>,
    pub client_cert_key: Option<String>,
    pub proxy_url: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    pub formatter: FormatterSpec,
}

fn build_client(config: &HttpConfig) -> Result<Client, Error> {
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

/// Delivers events to an HTTP endpoint one request per event, concurrently, counting per-event
/// failures rather than failing the whole batch (§4.7 "never halt the batch").
pub struct HttpOutput {
    config: HttpConfig,
    client: Client,
    method: Method,
}

impl HttpOutput {
    pub fn new(config: HttpConfig) -> Result<Self, Error> {
        let method = Method::from_str(&config.method.to_uppercase())
            .map_err(|_| Error::Configuration(format!("invalid HTTP method {}", config.method)))?;
        reqwest::Url::parse(&config.url)
            .map_err(|e| Error::Configuration(format!("invalid url: {e}")))?;
        let client = build_client(&config)?;
        Ok(HttpOutput { config, client, method })
    }

    async fn send_one(&self, event: &str) -> Result<(), Error> {
        let mut req = self.client.request(self.method.clone(), &self.config.url).body(event.to_string());
        for (k, v) in &self.config.headers {
            req = req.header(k, v);
        }
        if let Some(username) = &self.config.username {
            req = req.basic_auth(username, self.config.password.as_ref());
        }
        let response = req.send().await.map_err(Error::Http)?;
        if response.status().as_u16() != self.config.success_code {
            return Err(Error::DeliveryError(format!(
                "unexpected status {} from {}",
                response.status(),
                self.config.url
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputSink for HttpOutput {
    async fn open(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&self, events: &[String]) -> Result<usize, Error> {
        let results = join_all(events.iter().map(|e| self.send_one(e))).await;
        let mut delivered = 0;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => warn!(error = %e, "HTTP output dropped event"),
            }
        }
        Ok(delivered)
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

    fn config(url: &str) -> HttpConfig {
        HttpConfig {
            url: url.to_string(),
            method: "POST".to_string(),
            success_code: 200,
            username: None,
            password: None,
            headers: HashMap::new(),
            verify: true,
            ca_cert: None,
            client_cert: None,
            client_cert_key: None,
            proxy_url: None,
            connect_timeout: 10,
            request_timeout: 300,
            formatter: FormatterSpec::Plain,
        }
    }

    #[test]
    fn rejects_invalid_url() {
        assert!(HttpOutput::new(config("not a url")).is_err());
    }

    #[test]
    fn rejects_invalid_method() {
        let mut c = config("https://example.com");
        c.method = "NOPE".to_string();
        assert!(HttpOutput::new(c).is_err());
    }

    #[test]
    fn rejects_client_cert_without_key() {
        let mut c = config("https://example.com");
        c.client_cert = Some("/tmp/cert.pem".to_string());
        assert!(HttpOutput::new(c).is_err());
    }
}
