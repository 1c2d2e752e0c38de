//! # Event Sink
//!
//! The downstream seam. The processor writes records in arrival order and
//! awaits each write, so a bounded channel applies backpressure upstream.

use super::channel::OutputEvent;
use crate::error::StreamError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Accepts normalized output records for forwarding to a client
#[async_trait]
pub trait EventSink: Send {
    async fn emit(&mut self, event: OutputEvent) -> Result<(), StreamError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<OutputEvent> {
    async fn emit(&mut self, event: OutputEvent) -> Result<(), StreamError> {
        self.send(event).await.map_err(|_| StreamError::SinkClosed)
    }
}

/// Collects records in memory (replay tooling, tests)
#[async_trait]
impl EventSink for Vec<OutputEvent> {
    async fn emit(&mut self, event: OutputEvent) -> Result<(), StreamError> {
        self.push(event);
        Ok(())
    }
}

/// Forward through a borrowed sink so callers keep ownership
#[async_trait]
impl<'a, T: EventSink + ?Sized> EventSink for &'a mut T {
    async fn emit(&mut self, event: OutputEvent) -> Result<(), StreamError> {
        (**self).emit(event).await
    }
}
