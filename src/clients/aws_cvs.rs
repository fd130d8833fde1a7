//! AWS Cloud Volumes Service REST Client

use crate::domain::ports::{ApiRequest, HttpMethod, TransportRef};
use crate::error::{Error, Result};
use crate::reconcile::poll::{self, PollPolicy, StatusSource, TaskStatus};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Configuration for the AWS CVS client
#[derive(Debug, Clone)]
pub struct AwsCvsConfig {
    /// API host, without scheme
    pub api_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub validate_certs: bool,
}

/// Client for the Cloud Volumes Service API
pub struct AwsCvsClient {
    config: AwsCvsConfig,
    transport: TransportRef,
    poll_interval_override: Option<Duration>,
}

impl AwsCvsClient {
    pub fn new(config: AwsCvsConfig, transport: TransportRef) -> Self {
        Self {
            config,
            transport,
            poll_interval_override: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval_override = interval;
        self
    }

    /// Send a request; a vendor `message` on a non 200/201/202 reply is an error
    pub async fn send_request(&self, method: HttpMethod, api: &str, body: Option<Value>) -> Result<Value> {
        let mut request = ApiRequest::new(method, format!("https://{}/v1/{}", self.config.api_url, api))
            .header("Content-type", "application/json")
            .header("api-key", &self.config.api_key)
            .header("secret-key", &self.config.secret_key)
            .header("Cache-Control", "no-cache")
            .verify_tls(self.config.validate_certs);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = self.transport.send(request).await?;
        debug!(status = response.status, "{} {}", method, api);
        let json = response.json();

        if !matches!(response.status, 200 | 201 | 202) {
            let message = json
                .as_ref()
                .and_then(|j| j.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match message {
                Some(message) => return Err(Error::api(format!("{} {}", method, api), message)),
                None if !response.is_success() => {
                    return Err(Error::api(
                        format!("{} {}", method, api),
                        response.status.to_string(),
                    ))
                }
                None => {}
            }
        }
        Ok(json.unwrap_or(Value::Null))
    }

    pub async fn get(&self, api: &str) -> Result<Value> {
        self.send_request(HttpMethod::Get, api, None).await
    }

    pub async fn post(&self, api: &str, body: Value) -> Result<Value> {
        self.send_request(HttpMethod::Post, api, Some(body)).await
    }

    pub async fn put(&self, api: &str, body: Value) -> Result<Value> {
        self.send_request(HttpMethod::Put, api, Some(body)).await
    }

    pub async fn delete(&self, api: &str) -> Result<Value> {
        self.send_request(HttpMethod::Delete, api, None).await
    }

    /// Current state of a job: `done`, `error`, or still running
    pub async fn job_status(&self, job_id: &str) -> Result<TaskStatus> {
        let job = self.get(&format!("Jobs/{}", job_id)).await?;
        let state = job.get("state").and_then(Value::as_str).unwrap_or_default();
        Ok(match state {
            "done" => TaskStatus::Succeeded,
            "error" | "failed" => TaskStatus::Failed(
                job.get("stateDetails")
                    .and_then(Value::as_str)
                    .unwrap_or(state)
                    .to_string(),
            ),
            _ => TaskStatus::Pending,
        })
    }

    /// Wait until the job is `done`
    pub async fn get_state(&self, job_id: &str, action_name: &str, task: &str, policy: PollPolicy) -> Result<()> {
        let source = Job { client: self, job_id };
        poll::wait_on_completion(
            &source,
            action_name,
            task,
            policy.with_interval_override(self.poll_interval_override),
        )
        .await
    }
}

struct Job<'a> {
    client: &'a AwsCvsClient,
    job_id: &'a str,
}

#[async_trait]
impl StatusSource for Job<'_> {
    async fn status(&self) -> Result<TaskStatus> {
        self.client.job_status(self.job_id).await
    }
}
