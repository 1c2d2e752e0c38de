//! # Stream Processor
//!
//! One sequential processor per research request.
//!
//! ```text
//! bytes → LineFramer → detect → normalize → Reconciler ⟶ ResearchSession
//!                                                │
//!                                                └─ OutputEvent* → EventSink
//! ```
//!
//! Each line is fully reconciled and emitted before the next chunk is read,
//! so the session needs no locking. The whole run is bounded by a hard
//! timeout; a stall watchdog only logs.

use super::channel::{OutputEvent, OutputKind};
use super::phase::ResearchPhase;
use super::reconcile::{BatchScope, Reconciler};
use super::sink::EventSink;
use super::upstream::{ResearchRequest, UpstreamClient};
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::state::{ResearchSession, ResearchSnapshot, SessionError};
use crate::wire::detect::preview;
use crate::wire::{detect_line, normalize, LineFramer, WireShape};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::time::Instant;

/// Counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Framed lines seen
    pub lines: usize,
    /// Canonical events normalized
    pub events: usize,
    /// Lines or batch elements skipped as malformed
    pub skipped: usize,
    /// Records written to the sink
    pub emitted: usize,
    /// Watchdog ticks that found the upstream idle past the stall threshold
    pub stalls: usize,
}

/// Drives one upstream stream through the pipeline into a sink
pub struct StreamProcessor<K: EventSink> {
    config: StreamConfig,
    session: ResearchSession,
    reconciler: Reconciler,
    framer: LineFramer,
    sink: K,
    stats: StreamStats,
}

impl<K: EventSink> StreamProcessor<K> {
    /// Create a processor with a fresh session for `topic`
    pub fn new(config: StreamConfig, topic: impl Into<String>, sink: K) -> Self {
        Self {
            config,
            session: ResearchSession::new(topic),
            reconciler: Reconciler::new(),
            framer: LineFramer::new(),
            sink,
            stats: StreamStats::default(),
        }
    }

    pub fn session(&self) -> &ResearchSession {
        &self.session
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Connect to the upstream service and process its stream.
    ///
    /// The hard timeout starts before the connection is opened.
    #[tracing::instrument(skip_all, fields(topic = %request.topic))]
    pub async fn run_upstream(
        &mut self,
        client: &UpstreamClient,
        request: &ResearchRequest,
    ) -> Result<ResearchSnapshot, StreamError> {
        let deadline = Instant::now() + self.config.hard_timeout();

        let stream = match tokio::time::timeout_at(deadline, client.open(request)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return self.fail(e).await,
            Err(_) => return self.fail(StreamError::Timeout(self.config.hard_timeout())).await,
        };

        self.run_until(stream, deadline).await
    }

    /// Process an already opened byte stream
    pub async fn run<S, B, E>(&mut self, source: S) -> Result<ResearchSnapshot, StreamError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let deadline = Instant::now() + self.config.hard_timeout();
        self.run_until(source, deadline).await
    }

    async fn run_until<S, B, E>(
        &mut self,
        source: S,
        deadline: Instant,
    ) -> Result<ResearchSnapshot, StreamError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        let hard_timeout = self.config.hard_timeout();

        match tokio::time::timeout_at(deadline, self.pump(source)).await {
            Ok(Ok(())) => self.complete().await,
            // Nothing can be told to a closed sink
            Ok(Err(StreamError::SinkClosed)) => {
                tracing::info!("Client went away, abandoning research stream");
                Err(StreamError::SinkClosed)
            }
            Ok(Err(e)) => self.fail(e).await,
            Err(_) => self.fail(StreamError::Timeout(hard_timeout)).await,
        }
    }

    /// Read the source to its end, reconciling line by line
    async fn pump<S, B, E>(&mut self, source: S) -> Result<(), StreamError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: Display,
    {
        futures::pin_mut!(source);

        // interval panics on a zero period
        let stall_threshold = self.config.stall_threshold().max(Duration::from_secs(1));
        let mut last_event = Instant::now();
        let mut watchdog = tokio::time::interval_at(Instant::now() + stall_threshold, stall_threshold);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                chunk = source.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for line in self.framer.push(bytes.as_ref()) {
                            if self.process_line(&line).await? {
                                last_event = Instant::now();
                            }
                        }
                    }
                    Some(Err(e)) => return Err(StreamError::Read(e.to_string())),
                    None => break,
                },
                _ = watchdog.tick() => {
                    let idle = last_event.elapsed();
                    if idle >= stall_threshold {
                        self.stats.stalls += 1;
                        self.log_stall(idle);
                    }
                }
            }
        }

        if let Some(rest) = self.framer.finish() {
            self.process_line(&rest).await?;
        }
        Ok(())
    }

    /// Reconcile one line; returns whether it carried a recognized event
    async fn process_line(&mut self, line: &str) -> Result<bool, StreamError> {
        self.stats.lines += 1;

        let shape = match detect_line(line) {
            Ok(WireShape::Control) => return Ok(false),
            Ok(shape) => shape,
            Err(e) => {
                self.stats.skipped += 1;
                tracing::warn!(error = %e, line = %preview(line), "Skipping malformed upstream line");
                return Ok(false);
            }
        };

        let mut recognized = matches!(shape, WireShape::Reserved(_));
        let mut batch = BatchScope::new();

        for result in normalize(shape) {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    self.stats.skipped += 1;
                    tracing::warn!(error = %e, "Skipping malformed upstream event");
                    continue;
                }
            };
            recognized = true;
            self.stats.events += 1;

            for output in self.reconciler.apply(&mut self.session, event, &mut batch) {
                self.emit(output).await?;
            }
        }

        Ok(recognized)
    }

    async fn emit(&mut self, event: OutputEvent) -> Result<(), StreamError> {
        self.sink.emit(event).await?;
        self.stats.emitted += 1;
        Ok(())
    }

    /// Normal end of stream: emit the single terminal snapshot
    async fn complete(&mut self) -> Result<ResearchSnapshot, StreamError> {
        self.session.phase = ResearchPhase::Completed;
        let snapshot = self.session.snapshot();
        let payload = serde_json::to_value(&snapshot).unwrap_or_default();
        self.emit(OutputEvent::persistent(OutputKind::ResearchComplete, payload))
            .await?;

        tracing::info!(
            analysts = snapshot.analysts.len(),
            interview_messages = self.session.interview_message_count(),
            sections = snapshot.sections.len(),
            searches = snapshot.searches.len(),
            lines = self.stats.lines,
            skipped = self.stats.skipped,
            emitted = self.stats.emitted,
            "Research stream completed"
        );
        Ok(snapshot)
    }

    /// Fatal error: one transient error event downstream, then give up
    async fn fail(&mut self, error: StreamError) -> Result<ResearchSnapshot, StreamError> {
        tracing::error!(error = %error, phase = %self.session.phase, "Research stream failed");

        self.session.error = Some(SessionError {
            message: error.to_string(),
            kind: error.kind().to_string(),
        });
        let event = OutputEvent::transient(OutputKind::Error, error.to_event_payload());
        if let Err(sink_error) = self.emit(event).await {
            tracing::warn!(error = %sink_error, "Could not deliver terminal error event");
        }
        Err(error)
    }

    fn log_stall(&self, idle: Duration) {
        tracing::warn!(
            idle_secs = idle.as_secs(),
            phase = %self.session.phase,
            analysts = self.session.analysts.len(),
            interview_messages = self.session.interview_message_count(),
            sections = self.session.sections.len(),
            searches = self.session.searches.len(),
            pending_bytes = self.framer.pending_len(),
            pending = %self.framer.pending_preview(200),
            "Upstream stream stalled"
        );
    }
}
