use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// Default period of the progress redraw ticker.
pub const REDRAW_INTERVAL: Duration = Duration::from_millis(50);

/// The file currently being transferred.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub name: String,
    pub size: u64,
}

/// Counters of one running operation.
///
/// Written by the worker only and read by the redraw path, so every field is
/// either atomic or behind a small mutex.
#[derive(Debug, Default)]
pub struct ProgressState {
    total_bytes: AtomicU64,
    done_bytes: AtomicU64,
    total_files: AtomicU64,
    done_files: AtomicU64,
    finished: AtomicBool,
    current: Mutex<Option<TaskInfo>>,
    started: Mutex<Option<Instant>>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let elapsed = lock(&self.started)
            .map(|started| started.elapsed())
            .unwrap_or_default();
        ProgressSnapshot {
            total_bytes: self.total_bytes.load(Ordering::Acquire),
            done_bytes: self.done_bytes.load(Ordering::Acquire),
            total_files: self.total_files.load(Ordering::Acquire),
            done_files: self.done_files.load(Ordering::Acquire),
            finished: self.finished.load(Ordering::Acquire),
            current: lock(&self.current).clone(),
            elapsed,
        }
    }
}

// A panicking worker must not take the redraw path down with it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Point-in-time copy of a [`ProgressState`], for rendering.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    pub total_bytes: u64,
    pub done_bytes: u64,
    pub total_files: u64,
    pub done_files: u64,
    pub finished: bool,
    pub current: Option<TaskInfo>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Completed fraction of the byte total in `0.0..=1.0`.
    pub fn ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.finished { 1.0 } else { 0.0 };
        }
        (self.done_bytes as f64 / self.total_bytes as f64).clamp(0.0, 1.0)
    }

    pub fn eta(&self) -> Option<Duration> {
        if self.done_bytes == 0 {
            return None;
        }
        let elapsed = self.elapsed.as_secs_f64();
        let remain = elapsed * self.total_bytes as f64 / self.done_bytes as f64 - elapsed;
        Some(Duration::from_secs_f64(remain.max(0.0)))
    }

    pub fn bytes_per_second(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= f64::EPSILON {
            return 0;
        }
        (self.done_bytes as f64 / secs) as u64
    }

    /// `Progress 2/5 (1.5kB): name`, or `None` between files.
    pub fn task_line(&self) -> Option<String> {
        let task = self.current.as_ref()?;
        let position = (self.done_files + 1).min(self.total_files.max(1));
        Some(format!(
            "Progress {}/{} ({}B): {}",
            position,
            self.total_files,
            format_size(task.size),
            task.name
        ))
    }

    /// `42% | 00:03 [1.2MB/s]`
    pub fn gauge_label(&self) -> String {
        let eta = self
            .eta()
            .map(format_duration)
            .unwrap_or_else(|| "unknown".into());
        format!(
            "{:3}% | {} [{}B/s]",
            (self.ratio() * 100.0) as u8,
            eta,
            format_size(self.bytes_per_second())
        )
    }
}

/// Size with a 1024-based unit suffix: `512`, `1.5k`, `3.0M`.
pub fn format_size(n: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;
    if n > TB {
        format!("{:.1}T", n as f64 / TB as f64)
    } else if n > GB {
        format!("{:.1}G", n as f64 / GB as f64)
    } else if n > MB {
        format!("{:.1}M", n as f64 / MB as f64)
    } else if n > KB {
        format!("{:.1}k", n as f64 / KB as f64)
    } else {
        n.to_string()
    }
}

/// `mm:ss` below an hour, `hh:mm:ss` above.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

type RedrawFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct TickerSource {
    handle: Handle,
    period: Duration,
    notify: RedrawFn,
}

/// Worker-side writer of a [`ProgressState`].
#[derive(Clone)]
pub struct ProgressTracker {
    state: Arc<ProgressState>,
    ticker: Option<TickerSource>,
}

impl ProgressTracker {
    pub fn new(state: Arc<ProgressState>) -> Self {
        Self {
            state,
            ticker: None,
        }
    }

    /// Tracker with no reader, for callers that only want the final counts.
    pub fn detached() -> Self {
        Self::new(Arc::new(ProgressState::new()))
    }

    /// Makes every chunked byte copy run a redraw ticker on `handle`.
    pub fn with_ticker(
        mut self,
        handle: Handle,
        period: Duration,
        notify: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.ticker = Some(TickerSource {
            handle,
            period,
            notify: Arc::new(notify),
        });
        self
    }

    pub fn state(&self) -> &Arc<ProgressState> {
        &self.state
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.state.snapshot()
    }

    /// Begins an operation of `total_bytes`; the total is fixed from here on.
    pub fn start(&self, total_bytes: u64) {
        let state = &self.state;
        state.done_bytes.store(0, Ordering::Release);
        state.total_bytes.store(total_bytes, Ordering::Release);
        state.finished.store(false, Ordering::Release);
        *lock(&state.started) = Some(Instant::now());
    }

    pub fn start_count(&self, total_files: u64) {
        self.state.done_files.store(0, Ordering::Release);
        self.state.total_files.store(total_files, Ordering::Release);
    }

    pub fn start_task(&self, name: impl Into<String>, size: u64) {
        *lock(&self.state.current) = Some(TaskInfo {
            name: name.into(),
            size,
        });
    }

    /// Records `bytes` just written. Never runs past the total.
    pub fn update(&self, bytes: u64) {
        let total = self.state.total_bytes.load(Ordering::Acquire);
        let _ = self
            .state
            .done_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |done| {
                Some(done.saturating_add(bytes).min(total))
            });
    }

    pub fn finish_task(&self) {
        let total = self.state.total_files.load(Ordering::Acquire);
        let _ = self
            .state
            .done_files
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |done| {
                Some((done + 1).min(total))
            });
        *lock(&self.state.current) = None;
    }

    pub fn finish(&self) {
        *lock(&self.state.current) = None;
        self.state.finished.store(true, Ordering::Release);
    }

    /// Starts the periodic redraw for one byte-copy loop. The ticker stops
    /// when the returned guard is dropped, on every exit path of the loop.
    pub fn redraw_ticker(&self) -> RedrawTicker {
        let Some(source) = self.ticker.clone() else {
            return RedrawTicker { _stop: None };
        };
        let (stop, mut stopped) = oneshot::channel::<()>();
        source.handle.spawn(async move {
            let mut interval = tokio::time::interval(source.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => (source.notify)(),
                    // Resolves once the sender is dropped.
                    _ = &mut stopped => break,
                }
            }
        });
        RedrawTicker { _stop: Some(stop) }
    }
}

/// Guard of a running redraw ticker.
pub struct RedrawTicker {
    _stop: Option<oneshot::Sender<()>>,
}
