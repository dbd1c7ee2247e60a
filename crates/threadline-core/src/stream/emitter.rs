//! Streaming emitter.
//!
//! `StreamingEmitter` serves exactly one turn: it opens a transport stream,
//! buffers the agent's tokens through a [`StreamBuffer`], flushes at most
//! once per throttle interval, and owns the assistant status indicator.
//! Transport failures are logged and never end the turn.
//!
//! States: `Idle -> Streaming <-> Flushing -> Stopped`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use threadline_types::config::BotConfig;
use threadline_types::conversation::Destination;
use threadline_types::error::EmitterError;
use threadline_types::event::AssistantStatus;

use crate::reasoning::{ReasoningMarker, reasoning_preview};
use crate::transport::{ChatTransport, TransportStream};

use super::buffer::StreamBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitterState {
    Idle,
    Streaming,
    Flushing,
    Stopped,
}

/// Throttle intervals for output and status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitterSettings {
    pub flush_interval: Duration,
    pub status_interval: Duration,
}

impl EmitterSettings {
    pub fn from_config(config: &BotConfig) -> Self {
        Self {
            flush_interval: Duration::from_millis(config.streaming_throttle_ms),
            status_interval: Duration::from_millis(config.status_throttle_ms),
        }
    }
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self::from_config(&BotConfig::default())
    }
}

pub struct StreamingEmitter<T: ChatTransport> {
    transport: Arc<T>,
    marker: ReasoningMarker,
    settings: EmitterSettings,
    state: EmitterState,
    destination: Option<Destination>,
    stream: Option<T::Stream>,
    buffer: StreamBuffer,
    last_flush: Option<Instant>,
    last_status: Option<Instant>,
    emitted: String,
}

impl<T: ChatTransport> StreamingEmitter<T> {
    pub fn new(transport: Arc<T>, marker: ReasoningMarker, settings: EmitterSettings) -> Self {
        Self {
            transport,
            marker,
            settings,
            state: EmitterState::Idle,
            destination: None,
            stream: None,
            buffer: StreamBuffer::new(),
            last_flush: None,
            last_status: None,
            emitted: String::new(),
        }
    }

    pub fn state(&self) -> EmitterState {
        self.state
    }

    /// Whether real answer text has been seen this turn.
    pub fn response_started(&self) -> bool {
        self.buffer.response_started()
    }

    /// Everything delivered to the transport so far.
    pub fn emitted_text(&self) -> &str {
        &self.emitted
    }

    /// Open the transport stream at `destination`.
    ///
    /// If the transport refuses the stream the error is returned but the
    /// emitter still accepts tokens: output is buffered and `stop` posts it
    /// as one standalone message.
    pub async fn start(&mut self, destination: Destination) -> Result<(), EmitterError> {
        match self.state {
            EmitterState::Idle => {}
            EmitterState::Stopped => return Err(EmitterError::Stopped),
            EmitterState::Streaming | EmitterState::Flushing => {
                return Err(EmitterError::AlreadyStarted);
            }
        }

        let opened = self.transport.open_stream(&destination).await;
        self.state = EmitterState::Streaming;
        match opened {
            Ok(stream) => {
                tracing::debug!(%destination, "stream started");
                self.stream = Some(stream);
                self.destination = Some(destination);
                Ok(())
            }
            Err(e) => {
                self.destination = Some(destination);
                Err(e.into())
            }
        }
    }

    /// Feed one token of agent output.
    pub async fn push_token(&mut self, token: &str) -> Result<(), EmitterError> {
        match self.state {
            EmitterState::Streaming => {}
            EmitterState::Idle => return Err(EmitterError::NotStarted),
            EmitterState::Flushing | EmitterState::Stopped => return Err(EmitterError::Stopped),
        }

        let effects = self.buffer.push(token, &self.marker);
        if effects.clear_status {
            Self::set_status_at(
                &self.transport,
                self.destination.as_ref(),
                &AssistantStatus::cleared(),
            )
            .await;
        }
        if let Some(reasoning) = effects.reasoning.filter(|r| !r.trim().is_empty()) {
            self.update_status(AssistantStatus::Text(reasoning_preview(&reasoning)))
                .await;
        }

        if self.flush_due() {
            self.flush().await;
        }
        Ok(())
    }

    /// Show a status. Loading messages mark discrete transitions and are
    /// always sent; text updates are throttled.
    pub async fn update_status(&mut self, status: AssistantStatus) {
        if let AssistantStatus::Text(_) = status {
            let now = Instant::now();
            if self
                .last_status
                .is_some_and(|at| now.duration_since(at) <= self.settings.status_interval)
            {
                tracing::trace!("status update throttled");
                return;
            }
            self.last_status = Some(now);
        }
        Self::set_status_at(&self.transport, self.destination.as_ref(), &status).await;
    }

    /// Final flush, clear the status and close the stream. Never fails and
    /// is a no-op after the first call.
    pub async fn stop(&mut self) {
        match self.state {
            EmitterState::Stopped => return,
            EmitterState::Idle => {
                self.state = EmitterState::Stopped;
                return;
            }
            EmitterState::Streaming | EmitterState::Flushing => {}
        }

        self.state = EmitterState::Flushing;
        if let Some(text) = self.buffer.finish(&self.marker) {
            let delivered = match (self.stream.as_mut(), self.destination.as_ref()) {
                (Some(stream), _) => stream.append(&text).await,
                (None, Some(destination)) => {
                    self.transport.send_message(destination, &text).await
                }
                (None, None) => Ok(()),
            };
            match delivered {
                Ok(()) => self.emitted.push_str(&text),
                Err(e) => tracing::warn!(error = %e, "final flush failed"),
            }
        }

        Self::set_status_at(
            &self.transport,
            self.destination.as_ref(),
            &AssistantStatus::cleared(),
        )
        .await;

        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                tracing::warn!(error = %e, "failed to close stream");
            }
        }
        self.state = EmitterState::Stopped;
        tracing::debug!(emitted_chars = self.emitted.chars().count(), "stream stopped");
    }

    fn flush_due(&self) -> bool {
        self.last_flush
            .is_none_or(|at| at.elapsed() > self.settings.flush_interval)
    }

    async fn flush(&mut self) {
        let Some(text) = self.buffer.prepare_flush(&self.marker) else {
            return;
        };
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        self.state = EmitterState::Flushing;
        match stream.append(&text).await {
            Ok(()) => {
                self.buffer.commit_flush();
                self.emitted.push_str(&text);
                self.last_flush = Some(Instant::now());
            }
            Err(e) => {
                tracing::warn!(error = %e, pending = text.len(), "flush failed, keeping buffer");
            }
        }
        self.state = EmitterState::Streaming;
    }

    // Borrows fields rather than `&self` so the turn future stays `Send`.
    async fn set_status_at(
        transport: &T,
        destination: Option<&Destination>,
        status: &AssistantStatus,
    ) {
        let Some(destination) = destination else {
            tracing::debug!("status update before start ignored");
            return;
        };
        if let Err(e) = transport.set_status(destination, status).await {
            tracing::warn!(%destination, error = %e, "failed to set status");
        }
    }
}
