#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use actors::{EventBus, JobQueue, PoolConfig, QueueConfig, TaskExecutor, WorkerPool};
use api::{Controller, RouterConfig, build_router};
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use db::Store;
use http_body_util::BodyExt;
use roam_core::{CallableRegistry, ExecutionError, sync_callable};
use serde_json::{Value, json};
use tower::ServiceExt;

pub type TestResult = Result<(), Box<dyn Error>>;

pub struct TestApp {
    pub router: Router,
    pub queue: JobQueue,
    pub pool: Option<WorkerPool>,
}

impl TestApp {
    /// Controller over a fresh in-memory store, without workers.
    pub async fn idle() -> Result<Self, Box<dyn Error>> {
        Self::build(false).await
    }

    /// Controller with one worker slot running the test callables.
    pub async fn with_worker() -> Result<Self, Box<dyn Error>> {
        Self::build(true).await
    }

    async fn build(workers: bool) -> Result<Self, Box<dyn Error>> {
        let store = Store::memory().await?;
        let bus = EventBus::new(store.clone());
        let queue = JobQueue::start(store, bus.clone(), QueueConfig::default()).await?;

        let pool = if workers {
            let executor = Arc::new(TaskExecutor::new(registry()));
            let config = PoolConfig::default()
                .with_size(1)
                .with_lease_wait(Duration::from_millis(200));
            Some(WorkerPool::start(queue.clone(), bus.clone(), executor, config).await?)
        } else {
            None
        };

        let controller = Controller::new(queue.clone(), bus);
        let router = build_router(controller, &RouterConfig::default());
        Ok(Self { router, queue, pool })
    }

    pub async fn send(&self, request: Request<Body>) -> Result<Response<Body>, Box<dyn Error>> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    pub async fn get(&self, uri: &str) -> Result<Response<Body>, Box<dyn Error>> {
        self.send(Request::builder().uri(uri).body(Body::empty())?).await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Result<Response<Body>, Box<dyn Error>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?;
        self.send(request).await
    }
}

pub fn registry() -> CallableRegistry {
    CallableRegistry::new()
        .with(sync_callable("add", |args| {
            Ok(json!(args.get::<i64>(0)? + args.get::<i64>(1)?))
        }))
        .with(sync_callable("boom", |_| {
            Err(ExecutionError::new("ValueError", "boom"))
        }))
}

pub async fn body_text(response: Response<Body>) -> Result<String, Box<dyn Error>> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}

pub async fn body_json(response: Response<Body>) -> Result<Value, Box<dyn Error>> {
    let text = body_text(response).await?;
    Ok(serde_json::from_str(&text)?)
}

/// One parsed server-sent event frame.
#[derive(Debug)]
pub struct Frame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: Value,
}

/// Split a complete SSE body into its data frames.
pub fn frames(body: &str) -> Result<Vec<Frame>, Box<dyn Error>> {
    let mut frames = Vec::new();
    for block in body.split("\n\n") {
        let mut id = None;
        let mut event = None;
        let mut data = None;
        for line in block.lines() {
            if let Some(rest) = line.strip_prefix("id:") {
                id = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data = Some(serde_json::from_str(rest.trim())?);
            }
        }
        if let Some(data) = data {
            frames.push(Frame { id, event, data });
        }
    }
    Ok(frames)
}
