use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::CallbackHandler;
use crate::context::{Context, Event};

/// Forwards every event to an unbounded channel.
///
/// Process-local: it is skipped when a context is serialized.
pub struct EventChannel {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventChannel {
    pub const TYPE_TAG: &'static str = "event_channel";

    /// Handler plus the stream of forwarded events.
    pub fn new() -> (Self, UnboundedReceiverStream<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }
}

#[async_trait]
impl CallbackHandler for EventChannel {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    async fn on_handled_event(&self, _ctx: &Context, event: &Event) -> bool {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
        false
    }

    fn is_portable(&self) -> bool {
        false
    }
}

/// Logs every event through `tracing`.
pub struct TracingHandler;

impl TracingHandler {
    pub const TYPE_TAG: &'static str = "tracing";
}

#[async_trait]
impl CallbackHandler for TracingHandler {
    fn type_tag(&self) -> &str {
        Self::TYPE_TAG
    }

    async fn on_handled_event(&self, _ctx: &Context, event: &Event) -> bool {
        tracing::debug!(
            sender = %event.sender,
            kind = ?event.kind,
            payload = %event.payload,
            "event"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::EventSender;
    use crate::types::Status;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_events_reach_the_stream() {
        let (channel, mut events) = EventChannel::new();
        let ctx = Context::global();
        channel
            .on_handled_event(&ctx, &Event::status(EventSender::dag("d"), Status::Running, None))
            .await;
        drop(channel);

        let first = events.next().await.unwrap();
        assert_eq!(first.status_value(), Some(Status::Running));
        assert!(events.next().await.is_none());
    }
}
