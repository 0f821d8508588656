//! HTTP client for an external learning agent.
//!
//! The learner runs as a separate service exposing three JSON endpoints:
//! - `POST {url}/reset` with the [`Spaces`] before the first step
//! - `POST {url}/step` with a [`Step`], answered by `{"action": [...]}`
//! - `POST {url}/finish` with the final step

use reqwest::blocking::Client;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

use super::agent::Agent;
use super::{Action, Spaces, Step};

#[derive(Debug, Deserialize)]
struct ActionResponse {
    action: Action,
}

/// Agent that forwards every step to a remote learner.
pub struct HttpAgent {
    client: Client,
    url: String,
}

impl HttpAgent {
    /// Create a client for the learner at `url`.
    pub fn new(url: &str, timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    /// POST `payload` to `path` and return the successful response.
    fn post<T: Serialize + ?Sized>(&self, path: &str, payload: &T) -> Result<reqwest::blocking::Response, String> {
        let url = self.endpoint(path);
        log::trace!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .map_err(|e| format!("Network error: {}", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status.is_client_error() {
            let body = response.text().unwrap_or_default();
            Err(format!("Agent rejected request ({}): {}", status.as_u16(), body))
        } else {
            let body = response.text().unwrap_or_default();
            Err(format!("Agent error ({}): {}", status.as_u16(), body))
        }
    }
}

impl Agent for HttpAgent {
    fn begin(&mut self, spaces: &Spaces) -> Result<(), String> {
        log::info!("Connecting to agent at {}", self.url);
        self.post("reset", spaces).map(|_| ())
    }

    fn act(&mut self, step: &Step) -> Result<Action, String> {
        let response = self.post("step", step)?;
        let parsed: ActionResponse = response.json().map_err(|e| format!("Invalid action response: {}", e))?;
        Ok(parsed.action)
    }

    fn finish(&mut self, step: &Step) -> Result<(), String> {
        self.post("finish", step)?;
        log::info!("Agent notified of simulation end");
        Ok(())
    }
}
