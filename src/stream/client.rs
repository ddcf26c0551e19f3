// HTTPS client for the camera's multipart streaming endpoint
//
// Cameras serve self-signed certificates, often with legacy TLS parameters,
// so certificate verification is disabled unless the config turns it back on.

use std::io::Read;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::blocking::Client;

use super::{Result, StreamError, StreamSource};
use crate::config::{CameraConfig, StreamConfig};

/// Authenticated connection factory for one camera
pub struct CameraClient {
    client: Client,
    url: String,
    username: String,
    /// The vendor endpoint expects the password base64-encoded inside basic auth
    password_b64: String,
    accept_invalid_certs: bool,
}

impl CameraClient {
    pub fn new(camera: &CameraConfig, stream: &StreamConfig) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(stream.accept_invalid_certs)
            .connect_timeout(Duration::from_secs(stream.connect_timeout_secs))
            // On a blocking client this bounds the request and every body read
            .timeout(Duration::from_secs(stream.read_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: stream_url(camera, stream),
            username: stream.username.clone(),
            password_b64: general_purpose::STANDARD.encode(stream.password.as_bytes()),
            accept_invalid_certs: stream.accept_invalid_certs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StreamSource for CameraClient {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        if self.accept_invalid_certs {
            log::debug!("Connecting to {} without certificate verification", self.url);
        }

        let response = self
            .client
            .get(&self.url)
            .basic_auth(&self.username, Some(&self.password_b64))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status.as_u16()));
        }

        Ok(Box::new(response))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Build the streaming URL for a camera
pub fn stream_url(camera: &CameraConfig, stream: &StreamConfig) -> String {
    let path = if stream.path.starts_with('/') {
        stream.path.clone()
    } else {
        format!("/{}", stream.path)
    };
    format!("https://{}:{}{}", camera.address, camera.port, path)
}
