use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::{error, info, warn};

use swq_core::Task;
use swq_queue::TaskQueue;
use swq_registry::AgentRegistry;
use swq_storage::Store;

use crate::handler::{TaskHandler, TaskOutcome};

/// One agent's execution loop: register, then repeatedly heartbeat, claim,
/// execute, report. One task in flight at a time; when the queue is empty
/// the loop sleeps for the poll interval, so claim latency is bounded by
/// that interval. No task is released on termination; an external
/// supervisor deals with orphans.
pub struct Worker {
    agent_id: String,
    agent_type: String,
    capabilities: Value,
    queue: TaskQueue,
    registry: AgentRegistry,
    handler: Box<dyn TaskHandler>,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
        store: Arc<dyn Store>,
        handler: Box<dyn TaskHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            capabilities: Value::Object(Default::default()),
            queue: TaskQueue::new(Arc::clone(&store)),
            registry: AgentRegistry::new(store),
            handler,
            poll_interval,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Flag checked between iterations; flip it from another thread or a
    /// signal handler to wind the loop down.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Claim and execute at most one task. Returns whether a task was
    /// processed, so callers can decide to poll again immediately.
    pub fn run_once(&self) -> Result<bool> {
        let Some(task) = self.queue.claim_next(&self.agent_id)? else {
            return Ok(false);
        };
        info!(agent_id = %self.agent_id, task_id = %task.id, task_type = %task.task_type, "executing task");
        self.report(&task, self.handler.handle(&task))?;
        Ok(true)
    }

    fn report(&self, task: &Task, outcome: TaskOutcome) -> Result<()> {
        match outcome {
            TaskOutcome::Success(result) => {
                self.queue.complete(&task.id, result)?;
            }
            TaskOutcome::Failure(err) => {
                let out = self.queue.fail(&task.id, &err)?;
                warn!(
                    task_id = %task.id,
                    retrying = out.retrying,
                    retries = out.retries,
                    error = %err,
                    "task attempt failed"
                );
            }
        }
        Ok(())
    }

    /// Run until the stop flag flips. Registration happens up front;
    /// heartbeats refresh on every iteration. A failed queue call is
    /// logged and retried after the poll interval rather than killing the
    /// loop.
    pub fn run(&self) -> Result<()> {
        self.registry.register(
            &self.agent_id,
            &self.agent_type,
            self.capabilities.clone(),
            Value::Object(Default::default()),
        )?;
        info!(agent_id = %self.agent_id, "worker loop started");

        while !self.stop.load(Ordering::Relaxed) {
            if let Err(e) = self.registry.heartbeat(&self.agent_id) {
                warn!(agent_id = %self.agent_id, error = %e, "heartbeat failed");
            }
            match self.run_once() {
                Ok(true) => continue,
                Ok(false) => std::thread::sleep(self.poll_interval),
                Err(e) => {
                    error!(agent_id = %self.agent_id, error = %e, "worker iteration failed");
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
        info!(agent_id = %self.agent_id, "worker loop stopped");
        Ok(())
    }
}
