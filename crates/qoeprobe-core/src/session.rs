//! Measurement session - drives one collector
//!
//! Coordinates:
//! - Engine and transport events (in delivery order)
//! - The TTFB probe running alongside playback
//! - The throughput one-shot deadline
//! - Record hand-off and teardown

use crate::{
    collector::{PlaybackEngine, SessionCollector},
    config::MeasureConfig,
    player::EventSink,
    transport::RequestObserver,
    ttfb::FirstByteProbe,
    types::*,
    Error,
    Result,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Receives finalized snapshots
pub type RecordSink = mpsc::UnboundedSender<MetricsSnapshot>;

enum SessionInput {
    Event(PlaybackEvent),
    Record(oneshot::Sender<MetricsSnapshot>),
    Snapshot(oneshot::Sender<MetricsSnapshot>),
    Detach(oneshot::Sender<MetricsSnapshot>),
}

/// Cloneable handle the engine and its transport deliver events through
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<SessionInput>,
}

impl EventSender {
    /// Deliver an event. Returns false once the session is gone.
    pub fn send(&self, event: PlaybackEvent) -> bool {
        self.tx.send(SessionInput::Event(event)).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventSink for EventSender {
    fn emit(&self, event: PlaybackEvent) {
        self.send(event);
    }
}

impl RequestObserver for EventSender {
    fn request_issued(&self) {
        self.send(PlaybackEvent::RequestIssued);
    }

    fn request_completed(&self, failed: bool) {
        self.send(PlaybackEvent::RequestCompleted { failed });
    }
}

/// Probe task that is aborted when dropped
struct ProbeTask(JoinHandle<Result<Duration>>);

impl Future for ProbeTask {
    type Output = Result<Duration>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| Err(Error::Internal(format!("TTFB probe task failed: {}", e))))
        })
    }
}

impl Drop for ProbeTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// A running measurement session bound to one engine
pub struct MetricsSession {
    id: SessionId,
    source: Url,
    inbox: mpsc::UnboundedSender<SessionInput>,
    task: Option<JoinHandle<()>>,
}

impl MetricsSession {
    /// Bind a fresh collector to `engine` and start measuring.
    ///
    /// Must be called inside a tokio runtime. The TTFB probe starts at once.
    #[instrument(skip_all, fields(url = %source))]
    pub fn attach<E>(
        source: Url,
        engine: E,
        probe: Arc<dyn FirstByteProbe>,
        config: MeasureConfig,
        sink: Option<RecordSink>,
    ) -> Result<Self>
    where
        E: PlaybackEngine + 'static,
    {
        config.validate()?;

        let mut collector = SessionCollector::new(source.clone(), config);
        collector.attach(engine)?;
        let id = collector.id();

        let probe_url = source.clone();
        let probe_task = ProbeTask(tokio::spawn(async move { probe.measure(&probe_url).await }));

        let (inbox, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(collector, rx, probe_task, sink));

        info!(session_id = %id, "Measurement session started");

        Ok(Self {
            id,
            source,
            inbox,
            task: Some(task),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Handle for the engine and transport
    pub fn events(&self) -> EventSender {
        EventSender {
            tx: self.inbox.clone(),
        }
    }

    /// Explicit record. The snapshot also goes to the record sink.
    pub async fn record(&self) -> Result<MetricsSnapshot> {
        self.request(SessionInput::Record).await
    }

    /// Current snapshot, without side effects
    pub async fn snapshot(&self) -> Result<MetricsSnapshot> {
        self.request(SessionInput::Snapshot).await
    }

    /// Tear down: cancel pending timers, release the engine.
    ///
    /// Returns the last snapshot.
    pub async fn detach(mut self) -> Result<MetricsSnapshot> {
        let snapshot = self.request(SessionInput::Detach).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(session_id = %self.id, "Measurement session detached");
        snapshot
    }

    async fn request(
        &self,
        make: impl FnOnce(oneshot::Sender<MetricsSnapshot>) -> SessionInput,
    ) -> Result<MetricsSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.inbox.send(make(tx)).map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}

impl Drop for MetricsSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(session_id = %self.id, "Session dropped without detach");
            task.abort();
        }
    }
}

async fn run<E: PlaybackEngine>(
    mut collector: SessionCollector<E>,
    mut inbox: mpsc::UnboundedReceiver<SessionInput>,
    mut probe: ProbeTask,
    sink: Option<RecordSink>,
) {
    let mut probe_pending = true;

    loop {
        let deadline = collector.throughput_deadline();

        tokio::select! {
            input = inbox.recv() => match input {
                Some(SessionInput::Event(event)) => {
                    if let Some(snapshot) = collector.handle(event) {
                        deliver(&sink, snapshot);
                    }
                }
                Some(SessionInput::Record(reply)) => {
                    let snapshot = collector.record();
                    deliver(&sink, snapshot.clone());
                    let _ = reply.send(snapshot);
                }
                Some(SessionInput::Snapshot(reply)) => {
                    let _ = reply.send(collector.snapshot());
                }
                Some(SessionInput::Detach(reply)) => {
                    let snapshot = collector.snapshot();
                    collector.detach();
                    let _ = reply.send(snapshot);
                    break;
                }
                None => {
                    collector.detach();
                    break;
                }
            },
            result = &mut probe, if probe_pending => {
                probe_pending = false;
                collector.complete_ttfb(result);
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                collector.on_throughput_deadline();
            }
        }
    }
}

fn deliver(sink: &Option<RecordSink>, snapshot: MetricsSnapshot) {
    if let Some(sink) = sink {
        if sink.send(snapshot).is_err() {
            warn!("Record sink closed, snapshot dropped");
        }
    }
}
