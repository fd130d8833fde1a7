//! Asynchronous Completion Polling
//!
//! Vendor create/delete operations that return a task or job handle are
//! polled at a fixed interval for a bounded number of retries. Only three
//! outcomes exist: still pending, terminal success, terminal failure.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Status of a vendor task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Succeeded,
    Failed(String),
}

/// Retry budget and interval for one polled operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Number of additional status queries after the first one
    pub retries: u32,
    /// Delay between two status queries
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(retries: u32, interval_secs: u64) -> Self {
        Self {
            retries,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Replace the interval when an override is configured
    pub fn with_interval_override(mut self, interval: Option<Duration>) -> Self {
        if let Some(interval) = interval {
            self.interval = interval;
        }
        self
    }
}

/// Cloud Manager CVO creation
pub const CVO_CREATE: PollPolicy = PollPolicy::new(60, 60);
/// Cloud Manager CVO deletion
pub const CVO_DELETE: PollPolicy = PollPolicy::new(40, 60);
/// Azure Resource Manager long-running operations
pub const AZURE_OPERATION: PollPolicy = PollPolicy::new(180, 10);
/// AWS Cloud Volumes Service jobs
pub const AWS_CVS_JOB: PollPolicy = PollPolicy::new(60, 10);

/// Number of failed status queries tolerated before giving up
pub const STATUS_NETWORK_RETRIES: u32 = 3;
/// Delay between two failed status queries
pub const STATUS_NETWORK_DELAY: Duration = Duration::from_secs(1);

/// Something that can report the status of a running task
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self) -> Result<TaskStatus>;
}

/// Poll `source` until the task finishes or the retry budget runs out
///
/// `action_name` names the object (e.g. "CVO"), `task` the operation
/// (e.g. "create"); both end up in the failure messages.
pub async fn wait_on_completion<S>(
    source: &S,
    action_name: &str,
    task: &str,
    policy: PollPolicy,
) -> Result<()>
where
    S: StatusSource + ?Sized,
{
    let mut retries = policy.retries;
    loop {
        match source.status().await? {
            TaskStatus::Succeeded => {
                debug!(action = action_name, task, "task completed");
                return Ok(());
            }
            TaskStatus::Failed(message) => {
                return Err(Error::TaskFailed {
                    action: action_name.to_string(),
                    task: task.to_string(),
                    message,
                });
            }
            TaskStatus::Pending => {}
        }

        if retries == 0 {
            return Err(Error::Timeout {
                action: action_name.to_string(),
                task: task.to_string(),
            });
        }
        debug!(action = action_name, task, retries, "task pending");
        tokio::time::sleep(policy.interval).await;
        retries -= 1;
    }
}

/// Run a status query, retrying up to `attempts` more times on transient
/// errors; any other error surfaces at once
pub async fn with_network_retries<F, Fut, T>(attempts: u32, delay: Duration, mut query: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut remaining = attempts;
    loop {
        match query().await {
            Ok(value) => return Ok(value),
            Err(e) if remaining > 0 && e.is_transient() => {
                warn!("status query failed, retrying: {}", e);
                remaining -= 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
