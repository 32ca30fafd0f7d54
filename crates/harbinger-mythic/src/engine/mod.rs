// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Workflow-engine façade.
//!
//! The engine is reached through the [`EngineBackend`] trait: long-poll a
//! task queue, run the named activity, report the outcome. Activities are
//! plain async functions over JSON bytes, so tests drive them through an
//! in-memory backend without a live engine.

pub mod grpc;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::error::Result;

pub use grpc::GrpcEngine;

const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// One activity invocation handed out by the engine.
#[derive(Debug, Clone)]
pub struct ActivityTask {
    pub task_token: Vec<u8>,
    pub activity_name: String,
    pub input: Vec<u8>,
}

/// Transport to the workflow engine.
///
/// `poll` is expected to block until a task is available or the server's
/// poll deadline passes (returning `None`).
#[async_trait]
pub trait EngineBackend: Send + Sync {
    async fn poll(&self, task_queue: &str, identity: &str) -> Result<Option<ActivityTask>>;
    async fn complete(&self, task_token: Vec<u8>, result: Vec<u8>) -> Result<()>;
    async fn fail(&self, task_token: Vec<u8>, message: String) -> Result<()>;
}

type ActivityHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>>> + Send + Sync + 'static>;

/// Polls one task queue and dispatches activities to registered handlers.
pub struct ActivityWorker {
    backend: Arc<dyn EngineBackend>,
    task_queue: String,
    identity: String,
    handlers: HashMap<String, ActivityHandler>,
    tracker: TaskTracker,
}

impl ActivityWorker {
    pub fn new(backend: Arc<dyn EngineBackend>, task_queue: String) -> Self {
        let identity = format!("harbinger-mythic-{}", std::process::id());
        Self {
            backend,
            task_queue,
            identity,
            handlers: HashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Register an activity handler under its engine-visible name.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<u8>>> + Send + 'static,
    {
        let handler: ActivityHandler = Arc::new(move |input| Box::pin(handler(input)));
        self.handlers.insert(name.to_string(), handler);
    }

    /// Poll and dispatch until cancelled, then wait for running activities.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(task_queue = %self.task_queue, "activity worker started");
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                polled = self.backend.poll(&self.task_queue, &self.identity) => {
                    match polled {
                        Ok(Some(task)) => self.dispatch(task),
                        Ok(None) => {}
                        Err(err) => {
                            warn!(error = %err, "activity poll failed");
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(POLL_RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!(task_queue = %self.task_queue, "activity worker stopped");
    }

    fn dispatch(&self, task: ActivityTask) {
        let Some(handler) = self.handlers.get(&task.activity_name) else {
            warn!(activity = %task.activity_name, "no handler registered for activity");
            let backend = self.backend.clone();
            self.tracker.spawn(async move {
                if let Err(err) = backend
                    .fail(
                        task.task_token,
                        format!("unknown activity: {}", task.activity_name),
                    )
                    .await
                {
                    warn!(error = %err, "failed to report unknown activity");
                }
            });
            return;
        };

        info!(activity = %task.activity_name, "running activity");
        let handler = handler.clone();
        let backend = self.backend.clone();
        self.tracker.spawn(async move {
            match handler(task.input).await {
                Ok(result) => {
                    if let Err(err) = backend.complete(task.task_token, result).await {
                        warn!(activity = %task.activity_name, error = %err, "failed to report completion");
                    }
                }
                Err(err) => {
                    warn!(activity = %task.activity_name, error = %err, "activity failed");
                    if let Err(report) = backend.fail(task.task_token, err.to_string()).await {
                        warn!(activity = %task.activity_name, error = %report, "failed to report failure");
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Backend that hands out queued tasks, then blocks.
    struct QueueBackend {
        tasks: Mutex<VecDeque<ActivityTask>>,
        completed: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        failed: Mutex<Vec<(Vec<u8>, String)>>,
    }

    impl QueueBackend {
        fn new(tasks: Vec<ActivityTask>) -> Self {
            Self {
                tasks: Mutex::new(tasks.into()),
                completed: Mutex::new(Vec::new()),
                failed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EngineBackend for QueueBackend {
        async fn poll(&self, _task_queue: &str, _identity: &str) -> Result<Option<ActivityTask>> {
            let next = self.tasks.lock().pop_front();
            match next {
                Some(task) => Ok(Some(task)),
                None => {
                    futures_util::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn complete(&self, task_token: Vec<u8>, result: Vec<u8>) -> Result<()> {
            self.completed.lock().push((task_token, result));
            Ok(())
        }

        async fn fail(&self, task_token: Vec<u8>, message: String) -> Result<()> {
            self.failed.lock().push((task_token, message));
            Ok(())
        }
    }

    fn task(name: &str, token: &[u8], input: &[u8]) -> ActivityTask {
        ActivityTask {
            task_token: token.to_vec(),
            activity_name: name.to_string(),
            input: input.to_vec(),
        }
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler_and_completes() {
        let backend = Arc::new(QueueBackend::new(vec![task("echo", b"t1", b"{\"x\":1}")]));
        let mut worker = ActivityWorker::new(backend.clone(), "q_jobs".to_string());
        worker.register("echo", |input| async move { Ok(input) });

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        worker.run(cancel).await;

        let completed = backend.completed.lock();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].0, b"t1");
        assert_eq!(completed[0].1, b"{\"x\":1}");
        assert!(backend.failed.lock().is_empty());
    }

    #[tokio::test]
    async fn handler_errors_are_reported_as_failures() {
        let backend = Arc::new(QueueBackend::new(vec![task("explode", b"t2", b"")]));
        let mut worker = ActivityWorker::new(backend.clone(), "q_jobs".to_string());
        worker.register("explode", |_input| async move {
            Err::<Vec<u8>, _>(BridgeError::Other("boom".to_string()))
        });

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        worker.run(cancel).await;

        let failed = backend.failed.lock();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, b"t2");
        assert_eq!(failed[0].1, "boom");
    }

    #[tokio::test]
    async fn unknown_activity_is_failed() {
        let backend = Arc::new(QueueBackend::new(vec![task("mystery", b"t3", b"")]));
        let worker = ActivityWorker::new(backend.clone(), "q_jobs".to_string());

        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        worker.run(cancel).await;

        let failed = backend.failed.lock();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].1.contains("unknown activity"));
    }
}
