use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

use super::control::RunRequest;
use super::error::ClientError;

/// Blocking client of the control surface
#[derive(Debug, Clone)]
pub struct ControlClient {
    base_url: String,
    http: Client,
}

impl ControlClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        // A calibration request only returns once the whole sequence is over
        let http = Client::builder().timeout(None::<Duration>).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/api/{endpoint}/", self.base_url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Value, ClientError> {
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected {
                status: status.as_u16(),
                body: response.text()?,
            });
        }
        Ok(response.json()?)
    }

    pub fn start_run(&self, request: &RunRequest) -> Result<Value, ClientError> {
        self.send(self.http.post(self.url("start_run")).json(request))
    }

    pub fn stop_run(&self) -> Result<Value, ClientError> {
        self.send(self.http.get(self.url("stop_run")))
    }

    pub fn start_calibration(&self) -> Result<Value, ClientError> {
        self.send(self.http.get(self.url("start_calib")))
    }

    pub fn cancel_calibration(&self) -> Result<Value, ClientError> {
        self.send(self.http.get(self.url("cancel_calib")))
    }

    pub fn reset_metadata(&self, request: &RunRequest) -> Result<Value, ClientError> {
        self.send(self.http.post(self.url("reset_metadata")).json(request))
    }

    pub fn status(&self) -> Result<Value, ClientError> {
        self.send(self.http.get(self.url("status")))
    }
}
