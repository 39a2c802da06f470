//! Deadline-bounded worker execution.
//!
//! Each invocation runs on its own task and races a timer. When the timer
//! wins the caller receives [`ExecutionFault::Timeout`] and the task's
//! eventual result is discarded. The task itself is not aborted: the guest
//! keeps running until it finishes or its fuel budget runs out, so an
//! abandoned handler can still consume CPU for a while.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::capabilities::Capabilities;
use crate::handler::{Handler, HandlerLoader};
use crate::request::{WorkerRequest, WorkerResponse};
use mini_edge_common::ExecutionFault;

/// Loads workers and runs them under a deadline.
#[derive(Clone, Debug)]
pub struct ExecutionEngine {
    loader: HandlerLoader,
    deadline: Duration,
}

impl ExecutionEngine {
    /// Create an engine using the loader's configured timeout as deadline.
    pub fn new(loader: HandlerLoader) -> Self {
        let deadline = loader.config().timeout();
        Self { loader, deadline }
    }

    /// Override the deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn loader(&self) -> &HandlerLoader {
        &self.loader
    }

    /// Load `source` and run it under the configured deadline.
    ///
    /// Compilation happens on the blocking pool; a cache hit returns
    /// without compiling.
    pub async fn execute(
        &self,
        name: &str,
        source: &str,
        request: WorkerRequest,
        capabilities: Capabilities,
    ) -> Result<WorkerResponse, ExecutionFault> {
        let loader = self.loader.clone();
        let (name, source) = (name.to_owned(), source.to_owned());
        let handler = tokio::task::spawn_blocking(move || loader.load(&name, &source))
            .await
            .map_err(|join_error| {
                ExecutionFault::runtime(format!("Worker load task failed: {join_error}"))
            })??;
        self.run(handler, request, capabilities, self.deadline).await
    }

    /// Run a loaded handler, racing it against `deadline`.
    pub async fn run(
        &self,
        handler: Arc<dyn Handler>,
        request: WorkerRequest,
        capabilities: Capabilities,
        deadline: Duration,
    ) -> Result<WorkerResponse, ExecutionFault> {
        let start = Instant::now();
        let worker = handler.name().to_string();

        let task = tokio::spawn(async move { handler.invoke(request, capabilities).await });

        match tokio::time::timeout(deadline, task).await {
            Ok(Ok(result)) => {
                debug!(worker = %worker, elapsed_ms = start.elapsed().as_millis(), "Invocation finished");
                result
            }
            Ok(Err(join_error)) => {
                warn!(worker = %worker, error = %join_error, "Invocation task failed");
                Err(ExecutionFault::runtime(format!(
                    "Worker task failed: {join_error}"
                )))
            }
            Err(_) => {
                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = deadline.as_millis() as u64;
                warn!(worker = %worker, duration_ms, "Invocation exceeded deadline, result will be discarded");
                Err(ExecutionFault::Timeout { duration_ms })
            }
        }
    }
}
