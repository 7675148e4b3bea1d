//! Typed signal channel scoped to one mounted preview view.
//!
//! The view owns the [`SignalReceiver`]; each host gets a [`HostSender`] that
//! stamps every signal with the host's identity. Dropping the receiver on
//! unmount makes every outstanding sender fail quietly.
//!
//! Raw messages posted by a frame travel separately, through a
//! [`WireSender`]: they carry only a claimed channel token and are
//! authenticated by the view when received.

use crate::host::HostId;
use crate::signal::{Envelope, Signal};
use tokio::sync::mpsc;

pub fn signal_channel() -> (SignalPort, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalPort { tx }, SignalReceiver { rx })
}

/// View-side handle used to mint per-host senders.
#[derive(Debug, Clone)]
pub struct SignalPort {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl SignalPort {
    pub fn for_host(&self, origin: HostId) -> HostSender {
        HostSender {
            origin,
            tx: self.tx.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Host-side sender; every signal carries the host's identity.
#[derive(Debug, Clone)]
pub struct HostSender {
    origin: HostId,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl HostSender {
    pub fn origin(&self) -> HostId {
        self.origin
    }

    /// Returns false when the view has unsubscribed.
    pub fn send(&self, signal: Signal) -> bool {
        self.tx
            .send(Envelope {
                origin: self.origin,
                signal,
            })
            .is_ok()
    }
}

/// Hands raw frame messages to the view, e.g. from a `message` listener.
#[derive(Debug, Clone)]
pub struct WireSender {
    tx: mpsc::UnboundedSender<String>,
}

impl WireSender {
    /// Returns false when the view has been unmounted.
    pub fn send(&self, raw: impl Into<String>) -> bool {
        self.tx.send(raw.into()).is_ok()
    }
}

pub fn wire_channel() -> (WireSender, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WireSender { tx }, rx)
}

#[derive(Debug)]
pub struct SignalReceiver {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl SignalReceiver {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Stops accepting signals; queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sender_stamps_origin() {
        let (port, mut rx) = signal_channel();
        let id = HostId::new(3);
        assert!(port.for_host(id).send(Signal::Loaded));
        let env = rx.recv().await.unwrap();
        assert_eq!(env.origin, id);
        assert_eq!(env.signal, Signal::Loaded);
    }

    #[tokio::test]
    async fn test_wire_sender_forwards_raw_text() {
        let (wire, mut rx) = wire_channel();
        assert!(wire.clone().send(r#"{"type":"loaded"}"#));
        assert_eq!(rx.recv().await.as_deref(), Some(r#"{"type":"loaded"}"#));
        drop(rx);
        assert!(!wire.send("x"));
    }

    #[tokio::test]
    async fn test_send_after_unsubscribe_fails() {
        let (port, rx) = signal_channel();
        let sender = port.for_host(HostId::new(1));
        drop(rx);
        assert!(!sender.send(Signal::Loaded));
        assert!(port.is_closed());
    }
}
