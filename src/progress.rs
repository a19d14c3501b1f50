//! Progress/cancellation bridge between the worker thread and the event loop.
//!
//! The bridge is an owned handler passed into the executor at construction
//! time, not a global slot. It runs on the worker thread; the underlying
//! unbounded sender is safe to invoke from outside the tokio runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ExecError;
use crate::server::{Event, EventSender, SharedSession, WsEvent};

/// Level-triggered interruption signal, checked at progress ticks only.
/// Cancellation is cooperative — a job that never reports progress cannot be
/// stopped mid-flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Read and clear in one step.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Forwards executor progress ticks to the connected client and propagates
/// cancellation back through the executor's call stack.
pub struct ProgressBridge {
    events: EventSender,
    session: SharedSession,
    cancel: CancelToken,
}

impl ProgressBridge {
    pub fn new(events: EventSender, session: SharedSession, cancel: CancelToken) -> Self {
        Self {
            events,
            session,
            cancel,
        }
    }

    /// Called by the executor on every progress tick.
    ///
    /// Returns `ExecError::Interrupted` when the interruption signal is set;
    /// the executor is expected to propagate it and stop promptly.
    pub fn on_progress(
        &self,
        value: u32,
        max: u32,
        preview: Option<Vec<u8>>,
    ) -> Result<(), ExecError> {
        if self.cancel.take() {
            return Err(ExecError::Interrupted);
        }

        let (client_id, prompt_id, node) = {
            let session = self.session.lock();
            (
                session.client_id.clone(),
                session.last_prompt_id,
                session.last_node_id.clone(),
            )
        };

        // Send failures mean the server is shutting down — nothing to do.
        let _ = self.events.send(
            Event::message(WsEvent::Progress {
                value,
                max,
                prompt_id,
                node,
            })
            .for_client(client_id.clone()),
        );

        if let Some(image) = preview {
            let _ = self.events.send(Event::preview(image).for_client(client_id));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{EventPayload, Session};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn make_bridge() -> (
        ProgressBridge,
        mpsc::UnboundedReceiver<Event>,
        CancelToken,
        SharedSession,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session: SharedSession = Arc::new(Mutex::new(Session::default()));
        let cancel = CancelToken::new();
        let bridge = ProgressBridge::new(tx, Arc::clone(&session), cancel.clone());
        (bridge, rx, cancel, session)
    }

    #[test]
    fn progress_tick_carries_session_ids() {
        let (bridge, mut rx, _cancel, session) = make_bridge();
        let prompt_id = Uuid::new_v4();
        {
            let mut s = session.lock();
            s.client_id = Some("c1".to_string());
            s.last_prompt_id = Some(prompt_id);
            s.last_node_id = Some("n2".to_string());
        }

        bridge.on_progress(1, 4, None).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.client_id.as_deref(), Some("c1"));
        match event.payload {
            EventPayload::Message(WsEvent::Progress {
                value,
                max,
                prompt_id: pid,
                node,
            }) => {
                assert_eq!((value, max), (1, 4));
                assert_eq!(pid, Some(prompt_id));
                assert_eq!(node.as_deref(), Some("n2"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn preview_goes_out_as_separate_frame() {
        let (bridge, mut rx, _cancel, _session) = make_bridge();
        bridge.on_progress(2, 2, Some(vec![1, 2, 3])).unwrap();

        assert!(matches!(
            rx.try_recv().unwrap().payload,
            EventPayload::Message(WsEvent::Progress { .. })
        ));
        match rx.try_recv().unwrap().payload {
            EventPayload::Preview(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn cancel_aborts_and_clears_signal() {
        let (bridge, mut rx, cancel, _session) = make_bridge();
        cancel.set();

        let err = bridge.on_progress(1, 2, None).unwrap_err();
        assert!(matches!(err, ExecError::Interrupted));
        assert!(!cancel.is_set());
        // No partial progress event escapes after cancellation.
        assert!(rx.try_recv().is_err());
    }
}
