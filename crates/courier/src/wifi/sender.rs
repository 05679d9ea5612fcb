//! Delivering the bundle to a reader that asked for it

use crate::bundle::Bundle;
use async_trait::async_trait;
use common::{Error, Result};
use protocol::BookRequest;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::time::Duration;
use tracing::debug;

/// Sends a bundle to the device named in a book request
#[async_trait]
pub trait BookSender: Send + Sync {
    async fn send_book(&self, request: &BookRequest, bundle: &Bundle) -> Result<()>;
}

/// Uploads the bundle to the reader's `/putfile` HTTP endpoint
#[derive(Debug, Clone)]
pub struct HttpBookSender {
    client: reqwest::Client,
    port: u16,
    timeout: Duration,
}

impl HttpBookSender {
    pub fn new(port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            port,
            timeout: Duration::from_secs(120),
        })
    }

    /// Limit on the whole upload, from connect to the reader's answer
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, host: &str, file_name: &str) -> String {
        format!(
            "http://{}:{}/putfile?path={}",
            host,
            self.port,
            urlencoding::encode(file_name)
        )
    }

    fn classify(&self, host: &str, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::Timeout(format!("no answer after {:?} sending to {}", self.timeout, host))
        } else if e.is_connect() {
            Error::Network(format!("Failed to connect to {}:{}: {}", host, self.port, e))
        } else {
            Error::Network(format!("Upload to {} failed: {}", host, e))
        }
    }
}

#[async_trait]
impl BookSender for HttpBookSender {
    async fn send_book(&self, request: &BookRequest, bundle: &Bundle) -> Result<()> {
        let host = request.device_address.trim();
        let file = tokio::fs::File::open(&bundle.path).await?;
        let length = file.metadata().await?.len();

        let response = self
            .client
            .post(self.url(host, &bundle.file_name))
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::from(file))
            .send()
            .await
            .map_err(|e| self.classify(host, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!("Device rejected the book: {}", status)));
        }

        debug!("Uploaded {} bytes to {}:{}", length, host, self.port);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_escapes_file_name() {
        let sender = HttpBookSender::new(5914).unwrap();
        assert_eq!(
            sender.url("192.168.1.9", "The Goat.bloompub"),
            "http://192.168.1.9:5914/putfile?path=The%20Goat.bloompub"
        );
        assert_eq!(
            sender.url("10.0.0.2", "a&b=c/é.bloompub"),
            "http://10.0.0.2:5914/putfile?path=a%26b%3Dc%2F%C3%A9.bloompub"
        );
    }
}
