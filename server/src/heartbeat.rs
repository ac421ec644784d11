//! Server list heartbeat.
//!
//! Periodically reports the server to a directory service with a form POST.
//! The directory answers with the server's public play URL. Failures are
//! reported to the caller, which only logs them.

use std::time::Duration;

use reqwest::Client;

use crate::error::ServerError;

/// Software string sent with every heartbeat.
pub const SOFTWARE: &str = concat!("voxel-server ", env!("CARGO_PKG_VERSION"));

/// Fields reported on each beat.
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatReport {
    pub name: String,
    pub port: u16,
    pub users: usize,
    pub max: usize,
    pub public: bool,
    pub salt: String,
}

impl HeartbeatReport {
    pub fn form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("name", self.name.clone()),
            ("port", self.port.to_string()),
            ("users", self.users.to_string()),
            ("max", self.max.to_string()),
            ("public", if self.public { "True" } else { "False" }.to_string()),
            ("salt", self.salt.clone()),
            ("version", protocol::PROTOCOL_VERSION.to_string()),
            ("software", SOFTWARE.to_string()),
        ]
    }
}

pub struct Heartbeat {
    client: Client,
    url: String,
}

impl Heartbeat {
    pub fn new(url: &str) -> Result<Self, ServerError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    /// Sends one heartbeat, returning the play URL if the directory sent one.
    pub async fn beat(&self, report: &HeartbeatReport) -> Result<Option<String>, ServerError> {
        let response = self
            .client
            .post(&self.url)
            .form(&report.form())
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        Ok(play_url(&body))
    }
}

/// Extracts the play URL from a heartbeat response body.
pub fn play_url(body: &str) -> Option<String> {
    let body = body.trim();
    if body.starts_with("http") {
        Some(body.to_string())
    } else {
        None
    }
}
