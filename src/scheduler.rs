//! Runs at most one file operation at a time next to the UI loop.
//!
//! The worker never touches UI state. Everything it has to say travels as a
//! [`WorkerEvent`] over an unbounded channel that the UI loop drains: notices,
//! redraw ticks, prompts it blocks on, and finally a completion callback that
//! runs on the UI thread and releases the slot.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info};

use crate::ops::{ProgressState, ProgressTracker};
use crate::prompt::{PromptRequest, Prompter};

/// Rows the workspace gives up to the progress line while a task runs.
pub const PROGRESS_ROWS: u16 = 2;

pub type UiCallback<C> = Box<dyn FnOnce(&mut C) + Send>;

pub enum WorkerEvent<C> {
    Prompt(PromptRequest),
    Redraw,
    Notice(Notice),
    Finished(UiCallback<C>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Error(String),
}

#[derive(Debug, Error)]
#[error("another file operation is still running")]
pub struct SchedulerBusy;

/// The UI-side state a task touches at its start and end.
pub trait TaskHost {
    fn reserve_rows(&mut self, rows: u16);
    fn release_rows(&mut self, rows: u16);
    fn reload_all(&mut self);
}

pub struct TaskScheduler<C> {
    handle: Handle,
    slot: Arc<Semaphore>,
    events: UnboundedSender<WorkerEvent<C>>,
    redraw_interval: Duration,
}

impl<C> Clone for TaskScheduler<C> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            slot: Arc::clone(&self.slot),
            events: self.events.clone(),
            redraw_interval: self.redraw_interval,
        }
    }
}

impl<C: TaskHost + 'static> TaskScheduler<C> {
    pub fn new(handle: Handle, redraw_interval: Duration) -> (Self, UnboundedReceiver<WorkerEvent<C>>) {
        let (events, receiver) = unbounded_channel();
        let scheduler = Self {
            handle,
            slot: Arc::new(Semaphore::new(1)),
            events,
            redraw_interval,
        };
        (scheduler, receiver)
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Runs `op` on the blocking pool.
    ///
    /// Callers must not launch while [`is_busy`](Self::is_busy); a second
    /// launch is refused, never queued. The progress rows are reserved here
    /// and given back, followed by a reload, on the UI thread once `op` has
    /// returned, failed or panicked.
    pub fn launch<F>(&self, host: &mut C, op: F) -> Result<(), SchedulerBusy>
    where
        F: FnOnce(&Worker<C>) -> anyhow::Result<()> + Send + 'static,
    {
        let permit = Arc::clone(&self.slot)
            .try_acquire_owned()
            .map_err(|_| SchedulerBusy)?;
        host.reserve_rows(PROGRESS_ROWS);

        let guard = CompletionGuard {
            events: self.events.clone(),
            permit: Some(permit),
            callback: Some(Box::new(|host: &mut C| {
                host.release_rows(PROGRESS_ROWS);
                host.reload_all();
            })),
        };
        let worker = Worker {
            handle: self.handle.clone(),
            events: self.events.clone(),
            redraw_interval: self.redraw_interval,
        };
        self.handle.spawn_blocking(move || {
            let _guard = guard;
            if let Err(err) = op(&worker) {
                worker.error(format!("{err:#}"));
            }
        });
        Ok(())
    }
}

/// Sends the completion callback on every exit path of the worker, unwinding
/// included. The slot permit rides along and is released after the callback
/// has run, or when the UI is gone and the callback is dropped unrun.
struct CompletionGuard<C: 'static> {
    events: UnboundedSender<WorkerEvent<C>>,
    permit: Option<OwnedSemaphorePermit>,
    callback: Option<UiCallback<C>>,
}

impl<C: 'static> Drop for CompletionGuard<C> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("file operation panicked");
            let _ = self.events.send(WorkerEvent::Notice(Notice::Error(
                "file operation aborted unexpectedly".into(),
            )));
        }
        let permit = self.permit.take();
        let Some(callback) = self.callback.take() else {
            return;
        };
        let _ = self.events.send(WorkerEvent::Finished(Box::new(move |host: &mut C| {
            callback(host);
            drop(permit);
        })));
    }
}

/// Handle given to a running operation.
pub struct Worker<C> {
    handle: Handle,
    events: UnboundedSender<WorkerEvent<C>>,
    redraw_interval: Duration,
}

impl<C: 'static> Worker<C> {
    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{text}");
        let _ = self.events.send(WorkerEvent::Notice(Notice::Info(text)));
    }

    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        error!("{text}");
        let _ = self.events.send(WorkerEvent::Notice(Notice::Error(text)));
    }

    /// Tracker writing into `state` whose byte copies tick the UI redraw.
    pub fn tracker(&self, state: Arc<ProgressState>) -> ProgressTracker {
        let events = self.events.clone();
        ProgressTracker::new(state).with_ticker(self.handle.clone(), self.redraw_interval, move || {
            let _ = events.send(WorkerEvent::Redraw);
        })
    }
}

impl<C> Prompter for Worker<C> {
    /// Hands the question to the UI loop and blocks until it is answered.
    fn ask(&self, message: &str, options: &[&str]) -> Option<String> {
        let (request, reply) = PromptRequest::new(message, options);
        if self.events.send(WorkerEvent::Prompt(request)).is_err() {
            return None;
        }
        reply.blocking_recv().ok().flatten()
    }
}
