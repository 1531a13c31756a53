//! Where host events end up.

use lightwire_core::HostEvent;
use tokio::sync::mpsc;

/// Receives every event the pipeline shows to the user.
///
/// Called from the alerter and display workers; implementations must not
/// block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &HostEvent);
}

impl<F> EventSink for F
where
    F: Fn(&HostEvent) + Send + Sync,
{
    fn emit(&self, event: &HostEvent) {
        self(event)
    }
}

/// Forwards events to an unbounded channel.
///
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HostEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &HostEvent) {
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn closures_are_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: Arc<dyn EventSink> =
            Arc::new(move |event: &HostEvent| seen_clone.lock().unwrap().push(event.to_string()));

        sink.emit(&HostEvent::message("Hello"));
        assert_eq!(*seen.lock().unwrap(), vec!["Hello".to_string()]);
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(&HostEvent::message("one"));
        let shared: Arc<dyn EventSink> = Arc::new(sink.clone());
        shared.emit(&HostEvent::message("two"));
        assert_eq!(rx.recv().await, Some(HostEvent::message("one")));
        assert_eq!(rx.recv().await, Some(HostEvent::message("two")));

        drop(rx);
        // Receiver gone: emitting is a no-op.
        sink.emit(&HostEvent::message("three"));
    }
}
