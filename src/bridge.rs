//! Render bridge: the `loading → ready | error` state machine of the
//! mounted view.
//!
//! Signals are accepted only from the host bound to the current session, and
//! only while that session is still loading. Every transition is published
//! through a `watch` channel.

use crate::error::PreviewError;
use crate::host::HostId;
use crate::signal::{Envelope, Signal};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStatus {
    Loading,
    Ready,
    Error,
}

impl PreviewStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PreviewStatus::Loading)
    }
}

/// State of one render attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewSession {
    pub id: u64,
    pub status: PreviewStatus,
    pub message: Option<String>,
    pub host: Option<HostId>,
}

/// What observers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewSnapshot {
    pub session: u64,
    pub status: PreviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

/// Outcome of handing an envelope to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Applied(PreviewStatus),
    /// Sent by a host that is not bound to the current session.
    Stale,
    /// The current session already reached a terminal state.
    Settled,
    /// Nothing is mounted.
    Detached,
}

pub struct RenderBridge {
    next_session: u64,
    session: Option<PreviewSession>,
    document: Option<String>,
    tx: watch::Sender<Option<PreviewSnapshot>>,
}

impl Default for RenderBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderBridge {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        RenderBridge {
            next_session: 0,
            session: None,
            document: None,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PreviewSnapshot>> {
        self.tx.subscribe()
    }

    /// Starts a new session in `loading`, replacing the previous one.
    pub fn begin(&mut self) -> u64 {
        self.next_session += 1;
        let id = self.next_session;
        self.session = Some(PreviewSession {
            id,
            status: PreviewStatus::Loading,
            message: None,
            host: None,
        });
        self.document = None;
        debug!(session = id, "preview session started");
        self.publish();
        id
    }

    /// Binds the host created for the current session. Returns false if the
    /// host belongs to another session or one is already bound.
    pub fn bind(&mut self, host: HostId) -> bool {
        match self.session.as_mut() {
            Some(session) if session.id == host.session() && session.host.is_none() => {
                session.host = Some(host);
                true
            }
            _ => false,
        }
    }

    /// Ends a loading session with `error` without a host, e.g. after a
    /// parse failure.
    pub fn fail(&mut self, error: &PreviewError) -> bool {
        let message = error.display_message();
        match self.session.as_mut() {
            Some(session) if session.status == PreviewStatus::Loading => {
                info!(session = session.id, error = %message, "preview failed before mounting");
                session.status = PreviewStatus::Error;
                session.message = Some(message);
            }
            _ => return false,
        }
        self.publish();
        true
    }

    pub fn deliver(&mut self, envelope: Envelope) -> Delivery {
        let Some(session) = self.session.as_mut() else {
            debug!(origin = %envelope.origin, "signal dropped, nothing mounted");
            return Delivery::Detached;
        };
        if session.host != Some(envelope.origin) {
            debug!(
                origin = %envelope.origin,
                session = session.id,
                "stale signal ignored"
            );
            return Delivery::Stale;
        }
        if session.status.is_terminal() {
            debug!(session = session.id, "signal after terminal state ignored");
            return Delivery::Settled;
        }

        match envelope.signal {
            Signal::Loaded => {
                session.status = PreviewStatus::Ready;
                session.message = None;
            }
            Signal::Error { message } => {
                session.status = PreviewStatus::Error;
                session.message = Some(message);
            }
        }
        let status = session.status;
        info!(session = session.id, status = ?status, "preview settled");
        self.publish();
        Delivery::Applied(status)
    }

    /// Moves a session that is still loading to `error` after a timeout.
    pub fn expire(&mut self, elapsed_ms: u64) -> bool {
        let message = PreviewError::Timeout { elapsed_ms }.display_message();
        match self.session.as_mut() {
            Some(session) if session.status == PreviewStatus::Loading => {
                info!(session = session.id, elapsed_ms, "preview timed out");
                session.status = PreviewStatus::Error;
                session.message = Some(message);
            }
            _ => return false,
        }
        self.publish();
        true
    }

    /// Stores the document rendered by `host`, if it is still the bound one.
    pub fn attach_document(&mut self, host: HostId, document: String) -> bool {
        if self.active_host() != Some(host) {
            return false;
        }
        self.document = Some(document);
        self.publish();
        true
    }

    /// Drops the session; later signals are reported as `Detached`.
    pub fn detach(&mut self) {
        if self.session.take().is_some() {
            self.document = None;
            self.publish();
        }
    }

    pub fn active_host(&self) -> Option<HostId> {
        self.session.as_ref().and_then(|s| s.host)
    }

    pub fn session(&self) -> Option<&PreviewSession> {
        self.session.as_ref()
    }

    pub fn snapshot(&self) -> Option<PreviewSnapshot> {
        self.session.as_ref().map(|s| PreviewSnapshot {
            session: s.id,
            status: s.status,
            message: s.message.clone(),
            document: self.document.clone(),
        })
    }

    fn publish(&self) {
        self.tx.send_replace(self.snapshot());
    }
}
