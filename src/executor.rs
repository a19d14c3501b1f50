//! Execution engine boundary and the built-in dry-run engine.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::error::ExecError;
use crate::job::{PromptJob, StatusMessage};
use crate::progress::ProgressBridge;

/// Context handed to the executor for the duration of one prompt.
pub struct ExecContext {
    pub progress: Arc<ProgressBridge>,
}

/// What one execution produced.
#[derive(Debug)]
pub struct ExecOutput {
    /// Whether the engine reported success. A `false` here is a job-level
    /// failure; the worker records it and moves on.
    pub success: bool,
    /// Job-produced artifacts, keyed by node.
    pub outputs: Value,
    /// Ordered diagnostic trail.
    pub messages: Vec<StatusMessage>,
}

/// The graph execution engine. Runs synchronously on the worker thread —
/// exactly one prompt in flight at a time, since the shared device cannot
/// safely run two.
pub trait Executor: Send {
    /// Execute one prompt to completion. `Err(ExecError::Interrupted)` is the
    /// cooperative-cancellation path, surfaced through progress ticks.
    fn execute(&mut self, job: &PromptJob, ctx: &ExecContext) -> Result<ExecOutput, ExecError>;

    /// Soft reset of the engine's internal caches (distinct from unloading
    /// models from the device).
    fn reset_caches(&mut self);

    /// Drop transient per-run graph/output caches. Called by the periodic
    /// reclamation pass.
    fn clear_transient(&mut self);
}

/// Stand-in engine that walks the payload's node map and ticks progress once
/// per node, without touching a device. Lets the daemon run end to end and
/// gives integration tests a real execution path.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    /// Outputs of the last run, held until the next reclamation pass.
    transient: Option<Value>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Executor for DryRunExecutor {
    fn execute(&mut self, job: &PromptJob, ctx: &ExecContext) -> Result<ExecOutput, ExecError> {
        let Some(nodes) = job.payload.as_object() else {
            return Ok(ExecOutput {
                success: false,
                outputs: json!({}),
                messages: vec![StatusMessage::new(
                    "execution_error",
                    json!({
                        "prompt_id": job.id,
                        "message": "prompt payload is not a node map",
                    }),
                )],
            });
        };

        let messages = vec![StatusMessage::new(
            "execution_start",
            json!({ "prompt_id": job.id }),
        )];

        let total = nodes.len() as u32;
        let mut outputs = serde_json::Map::new();
        for (index, node_id) in nodes.keys().enumerate() {
            ctx.progress.on_progress(index as u32 + 1, total, None)?;
            outputs.insert(node_id.clone(), json!({ "executed": true }));
        }

        let outputs = Value::Object(outputs);
        self.transient = Some(outputs.clone());
        Ok(ExecOutput {
            success: true,
            outputs,
            messages,
        })
    }

    fn reset_caches(&mut self) {
        debug!("Dry-run executor caches reset");
        self.transient = None;
    }

    fn clear_transient(&mut self) {
        if self.transient.take().is_some() {
            debug!("Dropped transient outputs");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::CancelToken;
    use crate::server::Session;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    fn make_ctx() -> (ExecContext, mpsc::UnboundedReceiver<crate::server::Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = ExecContext {
            progress: Arc::new(ProgressBridge::new(
                tx,
                Arc::new(Mutex::new(Session::default())),
                CancelToken::new(),
            )),
        };
        (ctx, rx)
    }

    #[test]
    fn dry_run_executes_every_node() {
        let mut executor = DryRunExecutor::new();
        let job = PromptJob::new(json!({"a": {}, "b": {}}), None);

        let (ctx, _rx) = make_ctx();
        let out = executor.execute(&job, &ctx).unwrap();
        assert!(out.success);
        assert_eq!(out.outputs["a"], json!({"executed": true}));
        assert_eq!(out.outputs["b"], json!({"executed": true}));
    }

    #[test]
    fn non_object_payload_is_a_job_failure() {
        let mut executor = DryRunExecutor::new();
        let job = PromptJob::new(json!("not a graph"), None);

        let (ctx, _rx) = make_ctx();
        let out = executor.execute(&job, &ctx).unwrap();
        assert!(!out.success);
        assert_eq!(out.messages[0].event, "execution_error");
    }
}
