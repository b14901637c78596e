use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::agent_engine::events::{Event, EventKind, LogLevel};
use crate::errors::{PhoneClawError, PhoneClawResult};

/// How long a stream consumer waits for an event before yielding a keep-alive.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Per-run state shared between the worker, the controller and stream consumers.
///
/// The channel carries `Option<Event>`; `None` is the end-of-stream sentinel
/// appended by [`RunContext::finish`].
pub struct RunContext {
    id: String,
    cancel: CancellationToken,
    done: AtomicBool,
    tx: mpsc::UnboundedSender<Option<Event>>,
    rx: Mutex<mpsc::UnboundedReceiver<Option<Event>>>,
    started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            cancel: CancellationToken::new(),
            done: AtomicBool::new(false),
            tx,
            rx: Mutex::new(rx),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn emit(&self, kind: EventKind) {
        let event = Event::now(kind);
        tracing::trace!(run_id = %self.id, event = event.type_name(), "emit");
        if self.tx.send(Some(event)).is_err() {
            tracing::debug!(run_id = %self.id, "event dropped, channel closed");
        }
    }

    /// Emits a `log` event and mirrors it to `tracing` at the same level.
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Debug => tracing::debug!(run_id = %self.id, "{message}"),
            LogLevel::Info => tracing::info!(run_id = %self.id, "{message}"),
            LogLevel::Warn => tracing::warn!(run_id = %self.id, "{message}"),
            LogLevel::Error => tracing::error!(run_id = %self.id, "{message}"),
        }
        self.emit(EventKind::Log { level, message });
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Marks the run done and appends the sentinel. Idempotent.
    pub fn finish(&self) {
        if !self.done.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(None);
            tracing::info!(
                run_id = %self.id,
                elapsed_ms = (Utc::now() - self.started_at).num_milliseconds(),
                "run finished"
            );
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Calls `finish` when the worker exits, including by panic.
struct FinishGuard(Arc<RunContext>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Holds the single active run of the process.
#[derive(Default)]
pub struct RunRegistry {
    current: Mutex<Option<Arc<RunContext>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh run, refusing while another one is not done.
    pub async fn begin(&self) -> PhoneClawResult<Arc<RunContext>> {
        let mut current = self.current.lock().await;
        if let Some(active) = current.as_ref() {
            if !active.is_done() {
                tracing::warn!(active = %active.id(), "start refused, run in progress");
                return Err(PhoneClawError::RunInProgress);
            }
        }
        let run = Arc::new(RunContext::new());
        *current = Some(run.clone());
        tracing::info!(run_id = %run.id(), "run registered");
        Ok(run)
    }

    /// Registers a run and executes `work` on its own task. The sentinel is
    /// appended when `work` returns.
    pub async fn spawn<F, Fut>(&self, work: F) -> PhoneClawResult<Arc<RunContext>>
    where
        F: FnOnce(Arc<RunContext>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run = self.begin().await?;
        let guard = FinishGuard(run.clone());
        let fut = work(run.clone());
        tokio::spawn(async move {
            let _guard = guard;
            fut.await;
        });
        Ok(run)
    }

    pub async fn current(&self) -> Option<Arc<RunContext>> {
        self.current.lock().await.clone()
    }

    /// Requests cancellation of the active run. Returns false when nothing is running.
    pub async fn stop(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(run) if !run.is_done() => {
                tracing::info!(run_id = %run.id(), "stop requested");
                run.cancel();
                true
            }
            _ => false,
        }
    }

    /// Opens a consumer on the latest run, optionally checking its id.
    pub async fn stream(&self, run_id: Option<&str>) -> PhoneClawResult<EventStream> {
        let run = self
            .current()
            .await
            .ok_or_else(|| PhoneClawError::RunNotFound("no run".into()))?;
        if let Some(wanted) = run_id {
            if wanted != run.id() {
                return Err(PhoneClawError::RunNotFound(wanted.to_string()));
            }
        }
        Ok(EventStream::new(run))
    }
}

/// One item read by a stream consumer.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(Event),
    /// Nothing arrived within the idle interval and the run is still going.
    KeepAlive,
}

/// Drains a run's channel with a bounded wait per read.
pub struct EventStream {
    run: Arc<RunContext>,
    idle: Duration,
    closed: bool,
}

impl EventStream {
    pub fn new(run: Arc<RunContext>) -> Self {
        Self {
            run,
            idle: DEFAULT_IDLE_INTERVAL,
            closed: false,
        }
    }

    pub fn with_idle_interval(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    pub fn run_id(&self) -> &str {
        self.run.id()
    }

    /// `None` once the sentinel was read, or the run is done and the channel idle.
    pub async fn next_item(&mut self) -> Option<StreamItem> {
        if self.closed {
            return None;
        }
        let mut rx = self.run.rx.lock().await;
        match tokio::time::timeout(self.idle, rx.recv()).await {
            Ok(Some(Some(event))) => Some(StreamItem::Event(event)),
            Ok(Some(None)) | Ok(None) => {
                self.closed = true;
                None
            }
            Err(_) if self.run.is_done() => {
                self.closed = true;
                None
            }
            Err(_) => Some(StreamItem::KeepAlive),
        }
    }

    /// Reads events until the stream ends, skipping keep-alives.
    pub async fn collect_events(mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(item) = self.next_item().await {
            if let StreamItem::Event(event) = item {
                out.push(event);
            }
        }
        out
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamItem> + Send {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.next_item().await.map(|item| (item, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn second_start_is_refused_until_done() {
        let registry = RunRegistry::new();
        let first = registry.begin().await.unwrap();
        assert!(matches!(
            registry.begin().await,
            Err(PhoneClawError::RunInProgress)
        ));
        first.finish();
        let second = registry.begin().await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn stream_ends_at_sentinel() {
        let run = Arc::new(RunContext::new());
        run.emit(EventKind::End {
            message: "done".into(),
        });
        run.finish();
        let events = EventStream::new(run).collect_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].type_name(), "end");
    }

    #[tokio::test]
    async fn idle_stream_yields_keep_alive() {
        let run = Arc::new(RunContext::new());
        let mut stream =
            EventStream::new(run.clone()).with_idle_interval(Duration::from_millis(10));
        assert!(matches!(stream.next_item().await, Some(StreamItem::KeepAlive)));
        run.log(LogLevel::Info, "hello");
        assert!(matches!(stream.next_item().await, Some(StreamItem::Event(_))));
        run.finish();
        assert!(stream.next_item().await.is_none());
        assert!(stream.next_item().await.is_none());
    }

    #[tokio::test]
    async fn spawn_finishes_run_when_work_returns() {
        let registry = RunRegistry::new();
        let run = registry
            .spawn(|run| async move {
                run.emit(EventKind::End {
                    message: "ok".into(),
                });
            })
            .await
            .unwrap();
        let items: Vec<StreamItem> = registry
            .stream(Some(run.id()))
            .await
            .unwrap()
            .into_stream()
            .collect()
            .await;
        assert!(items
            .iter()
            .any(|i| matches!(i, StreamItem::Event(e) if e.type_name() == "end")));
        assert!(run.is_done());
    }

    #[tokio::test]
    async fn stop_and_unknown_ids() {
        let registry = RunRegistry::new();
        assert!(!registry.stop().await);
        assert!(registry.stream(None).await.is_err());
        let run = registry.begin().await.unwrap();
        assert!(matches!(
            registry.stream(Some("nope")).await,
            Err(PhoneClawError::RunNotFound(_))
        ));
        assert!(registry.stop().await);
        assert!(run.is_cancelled());
    }
}
