//! Scripted transport for unit tests
//!
//! Replays canned responses in order and records every request. Running out
//! of responses is an error, so a test also fails on unexpected calls.

use crate::domain::ports::{ApiRequest, ApiResponse, HttpMethod, ModuleContext, Transport};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<Result<ApiResponse>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a JSON response
    pub fn reply(&self, status: u16, body: Value) -> &Self {
        self.replies
            .lock()
            .push_back(Ok(ApiResponse::new(status, body.to_string())));
        self
    }

    /// Queue a raw response
    pub fn reply_raw(&self, response: ApiResponse) -> &Self {
        self.replies.lock().push_back(Ok(response));
        self
    }

    /// Queue a transport failure
    pub fn fail(&self, msg: &str) -> &Self {
        self.replies
            .lock()
            .push_back(Err(Error::Connection(msg.to_string())));
        self
    }

    /// Queue the token exchange every OAuth-backed client starts with
    pub fn token(&self) -> &Self {
        self.reply(
            200,
            serde_json::json!({
                "access_token": "token",
                "token_type": "Bearer",
                "expires_in": 3600
            }),
        )
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// `(method, url)` of every recorded request
    pub fn calls(&self) -> Vec<(HttpMethod, String)> {
        self.requests
            .lock()
            .iter()
            .map(|r| (r.method, r.url.clone()))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }

    /// Module context with polling intervals collapsed to zero
    pub fn context(self: &Arc<Self>) -> ModuleContext {
        ModuleContext::new(self.clone()).with_poll_interval(Some(Duration::ZERO))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let desc = format!("{} {}", request.method, request.url);
        self.requests.lock().push(request);
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Internal(format!("Unexpected call to send_request: {}", desc))))
    }
}
