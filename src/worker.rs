//! Execution worker loop — the single consumer of the prompt queue.
//!
//! Runs on a dedicated OS thread so arbitrarily long executions never touch
//! the tokio event loop. Each iteration: wait for a prompt (with an adaptive
//! timeout), execute it, then drain the control flags and run the
//! reclamation policy — flag handling happens every iteration whether or not
//! a prompt arrived.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::device::DeviceManager;
use crate::error::{ExecError, ReclaimError};
use crate::executor::{ExecContext, Executor};
use crate::job::{ExecutionStatus, QueuedPrompt, Status, StatusMessage};
use crate::progress::{CancelToken, ProgressBridge};
use crate::queue::PromptQueue;
use crate::server::{Event, EventSender, ExecInfo, SharedSession, WsEvent};

/// Schedules how often the expensive reclamation pass may run.
#[derive(Debug)]
pub struct ReclamationClock {
    interval: Duration,
    last_collect: Instant,
    /// Every execution leaves reclaimable state behind.
    pub need_gc: bool,
    /// Set when a flag demands an immediate pass, regardless of interval.
    immediate: bool,
}

impl ReclamationClock {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_collect: Instant::now(),
            need_gc: false,
            immediate: false,
        }
    }

    /// Queue-retrieval timeout for the next iteration: short enough to wake
    /// up for a due pass, the idle default otherwise.
    pub fn timeout(&self, idle: Duration, now: Instant) -> Duration {
        if !self.need_gc {
            return idle;
        }
        if self.immediate {
            return Duration::ZERO;
        }
        self.interval
            .checked_sub(now.duration_since(self.last_collect))
            .unwrap_or(Duration::ZERO)
    }

    pub fn due(&self, now: Instant) -> bool {
        self.need_gc
            && (self.immediate || now.duration_since(self.last_collect) > self.interval)
    }

    /// Demand a pass on the next check.
    pub fn force(&mut self) {
        self.need_gc = true;
        self.immediate = true;
    }

    pub fn mark_collected(&mut self, now: Instant) {
        self.last_collect = now;
        self.need_gc = false;
        self.immediate = false;
    }
}

/// The single consumer that executes prompts and reclaims device resources.
pub struct PromptWorker {
    queue: Arc<PromptQueue>,
    executor: Box<dyn Executor>,
    device: Arc<dyn DeviceManager>,
    events: EventSender,
    session: SharedSession,
    cancel: CancelToken,
    clock: ReclamationClock,
    idle_timeout: Duration,
    ctx: ExecContext,
}

impl PromptWorker {
    pub fn new(
        queue: Arc<PromptQueue>,
        executor: Box<dyn Executor>,
        device: Arc<dyn DeviceManager>,
        events: EventSender,
        session: SharedSession,
        cancel: CancelToken,
        config: &WorkerConfig,
    ) -> Self {
        let bridge = ProgressBridge::new(
            events.clone(),
            Arc::clone(&session),
            cancel.clone(),
        );
        Self {
            queue,
            executor,
            device,
            events,
            session,
            cancel,
            clock: ReclamationClock::new(config.reclaim_interval),
            idle_timeout: config.idle_timeout,
            ctx: ExecContext {
                progress: Arc::new(bridge),
            },
        }
    }

    /// Loop until process shutdown. Only a reclamation failure exits.
    pub fn run(mut self) -> Result<(), ReclaimError> {
        loop {
            self.run_once()?;
        }
    }

    /// One iteration: wait, maybe execute, always reclaim.
    pub fn run_once(&mut self) -> Result<(), ReclaimError> {
        let timeout = self.clock.timeout(self.idle_timeout, Instant::now());
        if let Some(item) = self.queue.get(timeout) {
            self.execute(item);
        }
        self.reclaim()
    }

    fn execute(&mut self, item: QueuedPrompt) {
        let prompt_id = item.job.id;
        let client_id = item.job.client_id.clone();
        self.session.lock().last_prompt_id = Some(prompt_id);
        // A stale interrupt must not kill the next prompt.
        self.cancel.clear();

        let started = Instant::now();
        let result = self.executor.execute(&item.job, &self.ctx);
        self.clock.need_gc = true;

        let (outputs, status) = match result {
            Ok(out) => {
                let status = if out.success {
                    ExecutionStatus::success(out.messages)
                } else {
                    ExecutionStatus::error(out.messages)
                };
                (out.outputs, status)
            }
            Err(ExecError::Interrupted) => {
                info!(%prompt_id, "Prompt execution interrupted");
                let messages = vec![StatusMessage::new(
                    "execution_interrupted",
                    json!({ "prompt_id": prompt_id }),
                )];
                (json!({}), ExecutionStatus::interrupted(messages))
            }
            Err(e) => {
                error!(%prompt_id, error = %e, "Prompt execution failed");
                let messages = vec![StatusMessage::new(
                    "execution_error",
                    json!({ "prompt_id": prompt_id, "message": e.to_string() }),
                )];
                (json!({}), ExecutionStatus::error(messages))
            }
        };

        self.notify_outcome(prompt_id, &status, client_id);

        if let Err(e) = self.queue.task_done(prompt_id, outputs, status) {
            warn!(error = %e, "Completion record rejected");
        }

        info!(
            %prompt_id,
            elapsed_secs = format!("{:.2}", started.elapsed().as_secs_f64()),
            "Prompt executed"
        );
    }

    fn notify_outcome(
        &self,
        prompt_id: Uuid,
        status: &ExecutionStatus,
        client_id: Option<String>,
    ) {
        let _ = self.events.send(Event::message(WsEvent::Status {
            exec_info: ExecInfo {
                queue_remaining: self.queue.remaining(),
            },
        }));

        if client_id.is_none() {
            return;
        }

        if status.status == Status::Error {
            let message = status
                .messages
                .iter()
                .map(|m| m.data["message"].as_str().unwrap_or(&m.event).to_string())
                .collect::<Vec<_>>()
                .join("; ");
            let _ = self.events.send(
                Event::message(WsEvent::ExecutionError { prompt_id, message })
                    .for_client(client_id.clone()),
            );
        }

        // node: None marks the end of execution for this prompt.
        let _ = self.events.send(
            Event::message(WsEvent::Executing {
                prompt_id,
                node: None,
            })
            .for_client(client_id),
        );
    }

    /// Drain flags and run the reclamation policy. Called every iteration.
    fn reclaim(&mut self) -> Result<(), ReclaimError> {
        let flags = self.queue.get_flags();

        if flags.unload_models || flags.free_memory {
            info!("Unloading cached models on request");
            self.device.release_cached_resources()?;
            self.clock.force();
        }

        if flags.free_memory {
            self.executor.reset_caches();
            self.clock.force();
        }

        if self.clock.due(Instant::now()) {
            debug!("Running reclamation pass");
            self.executor.clear_transient();
            self.device.flush_device_cache()?;
            self.clock.mark_collected(Instant::now());
        }

        Ok(())
    }
}

/// Spawn the worker on its own named thread. A reclamation failure is fatal
/// to the worker; it is logged and the thread exits.
pub fn spawn(worker: PromptWorker) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("prompt-worker".to_string())
        .spawn(move || {
            if let Err(e) = worker.run() {
                error!(error = %e, "Resource reclamation failed, worker exiting");
            }
        })
}
