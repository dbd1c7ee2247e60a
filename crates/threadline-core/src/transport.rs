//! External chat transport traits (ports).
//!
//! The transport delivers streamed output as an append-only stream per
//! destination, shows a transient assistant status, and posts plain
//! messages. Implementations (a chat platform client) live outside core.

use std::future::Future;
use std::pin::Pin;

use threadline_types::conversation::Destination;
use threadline_types::error::TransportError;
use threadline_types::event::AssistantStatus;

/// Handle to one open output stream.
pub trait TransportStream: Send {
    /// Append markdown text to the stream.
    fn append(&mut self, text: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Finalize the stream, optionally attaching trailing blocks.
    fn close(
        self,
        trailing: Option<Vec<serde_json::Value>>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Chat surface the bot replies on.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ChatTransport: Send + Sync {
    type Stream: TransportStream;

    /// Open an output stream bound to a destination.
    fn open_stream(
        &self,
        destination: &Destination,
    ) -> impl Future<Output = Result<Self::Stream, TransportError>> + Send;

    /// Set (or clear, with an empty text) the assistant status indicator.
    fn set_status(
        &self,
        destination: &Destination,
        status: &AssistantStatus,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Post a standalone message.
    fn send_message(
        &self,
        destination: &Destination,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Object-safe message sender for notices scheduled outside the turn.
///
/// Blanket-implemented for every [`ChatTransport`], so an `Arc<T>` of any
/// transport coerces to `Arc<dyn NoticeSink>`.
pub trait NoticeSink: Send + Sync {
    fn send_notice<'a>(
        &'a self,
        destination: &'a Destination,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;
}

impl<T: ChatTransport> NoticeSink for T {
    fn send_notice<'a>(
        &'a self,
        destination: &'a Destination,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(self.send_message(destination, text))
    }
}
