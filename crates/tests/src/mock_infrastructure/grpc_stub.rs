//! Scripted gRPC Stub
//!
//! Stands in for a generated client: replies are scripted per target URL, and every call
//! is recorded with the deadline it carried.

use async_trait::async_trait;
use dapi_core::transport::{GrpcCallError, GrpcStub, GrpcTarget};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};
use tonic::Status;

/// A call observed by the stub.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub method: String,
    pub has_deadline: bool,
}

/// gRPC stub answering from per-target scripts.
#[derive(Default)]
pub struct ScriptedGrpcStub {
    replies: Mutex<HashMap<String, VecDeque<Result<Value, Status>>>>,
    fallback: Mutex<Option<Result<Value, Status>>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGrpcStub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next reply for `url` (`proto://host:grpc_port`).
    pub fn reply(&self, url: &str, reply: Result<Value, Status>) -> &Self {
        self.replies.lock().entry(url.to_string()).or_default().push_back(reply);
        self
    }

    /// Reply used once a target's script is exhausted.
    pub fn fallback(&self, reply: Result<Value, Status>) -> &Self {
        *self.fallback.lock() = Some(reply);
        self
    }

    /// Makes every call to `url` take `delay` before answering.
    pub fn delay(&self, url: &str, delay: Duration) -> &Self {
        self.delays.lock().insert(url.to_string(), delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    #[must_use]
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.url == url).count()
    }
}

#[async_trait]
impl GrpcStub for ScriptedGrpcStub {
    type Request = Value;
    type Response = Value;

    async fn unary(
        &self,
        target: &GrpcTarget,
        method: &str,
        request: tonic::Request<Value>,
    ) -> Result<tonic::Response<Value>, GrpcCallError> {
        self.calls.lock().push(RecordedCall {
            url: target.url.clone(),
            method: method.to_string(),
            has_deadline: request.metadata().get("grpc-timeout").is_some(),
        });

        let delay = self.delays.lock().get(&target.url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.replies.lock().get_mut(&target.url).and_then(VecDeque::pop_front);
        let reply = scripted.or_else(|| self.fallback.lock().clone()).unwrap_or_else(|| {
            Err(Status::unimplemented(format!("no reply scripted for {method}")))
        });

        reply.map(tonic::Response::new).map_err(GrpcCallError::from)
    }
}
