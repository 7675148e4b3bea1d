//! The mounted preview view.
//!
//! A [`Preview`] owns the render bridge, the view-scoped signal channel and
//! the single active host. Rendering new code tears the previous host down
//! before the next one is created.
//!
//! With [`SignalSource::Frame`] the embedder loads [`Preview::document`] into
//! a sandboxed frame and forwards the frame's messages through a
//! [`WireSender`]; otherwise hosts settle their sessions in-process.

use crate::bridge::{Delivery, PreviewSnapshot, PreviewStatus, RenderBridge};
use crate::channel::{signal_channel, wire_channel, SignalPort, SignalReceiver, WireSender};
use crate::code::{strip_artifacts, unwrap_component, GeneratedCode};
use crate::component::compile_component;
use crate::config::PreviewConfig;
use crate::error::{PreviewError, PreviewResult};
use crate::host::{HostId, HostPayload, HostSettings, IsolatedHost, SignalSource};
use crate::sanitize::{sanitize_markup, validate_markup};
use crate::signal::{parse_wire, Envelope};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Channel tokens of replaced hosts still recognised as stale rather than untrusted.
const RETIRED_TOKENS: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    /// Sanitize the code as HTML and inject it into the document body.
    #[default]
    Markup,
    /// Compile the code as a component and mount it in a sandbox.
    Component,
}

impl FromStr for PreviewMode {
    type Err = PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "markup" | "html" => Ok(PreviewMode::Markup),
            "component" => Ok(PreviewMode::Component),
            other => Err(PreviewError::Config(format!(
                "unknown preview mode '{}' (expected markup or component)",
                other
            ))),
        }
    }
}

impl fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreviewMode::Markup => "markup",
            PreviewMode::Component => "component",
        })
    }
}

pub struct Preview {
    config: PreviewConfig,
    runtime: Handle,
    bridge: RenderBridge,
    port: SignalPort,
    signals: SignalReceiver,
    wire: WireSender,
    wire_inbox: mpsc::UnboundedReceiver<String>,
    host: Option<IsolatedHost>,
    retired: VecDeque<String>,
    started: Option<Instant>,
}

impl Preview {
    /// Must be called inside a tokio runtime; hosts run on its blocking pool.
    pub fn new(config: PreviewConfig) -> PreviewResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| PreviewError::Config(format!("preview needs a tokio runtime: {}", e)))?;
        let (port, signals) = signal_channel();
        let (wire, wire_inbox) = wire_channel();
        Ok(Preview {
            config,
            runtime,
            bridge: RenderBridge::new(),
            port,
            signals,
            wire,
            wire_inbox,
            host: None,
            retired: VecDeque::with_capacity(RETIRED_TOKENS),
            started: None,
        })
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    pub fn mode(&self) -> PreviewMode {
        self.config.mode
    }

    pub fn signal_source(&self) -> SignalSource {
        self.config.signal_source
    }

    /// Sender for raw messages posted by the frame showing the document.
    /// They are authenticated like [`Preview::post_wire`] input while
    /// [`Preview::settle`] runs.
    pub fn wire_sender(&self) -> WireSender {
        self.wire.clone()
    }

    /// Starts a new session for `code`.
    ///
    /// On a validation failure the session ends in `error` immediately, no
    /// host is created, and the error is returned.
    pub fn render(&mut self, code: &GeneratedCode) -> PreviewResult<HostId> {
        self.teardown_host();
        let session = self.bridge.begin();
        self.started = Some(Instant::now());

        let payload = match self.prepare(code) {
            Ok(payload) => payload,
            Err(err) => {
                self.bridge.fail(&err);
                return Err(err);
            }
        };

        let id = HostId::new(session);
        self.bridge.bind(id);
        let settings = HostSettings {
            limits: self.config.sandbox_limits(),
            title: self.config.title.clone(),
            styling_runtime: self.config.styling_runtime().map(str::to_string),
            signal_source: self.config.signal_source,
        };
        info!(
            session,
            mode = %self.config.mode,
            signals = %self.config.signal_source,
            bytes = code.len(),
            "rendering preview"
        );
        self.host = Some(IsolatedHost::spawn(
            &self.runtime,
            id,
            payload,
            settings,
            self.port.for_host(id),
        ));
        Ok(id)
    }

    fn prepare(&self, code: &GeneratedCode) -> PreviewResult<HostPayload> {
        if code.len() > self.config.max_source_bytes {
            return Err(PreviewError::LimitExceeded {
                what: format!("source of {} bytes", code.len()),
                limit: self.config.max_source_bytes,
            });
        }
        let cleaned = strip_artifacts(code.as_str());
        match self.config.mode {
            PreviewMode::Markup => {
                if self.config.strict_markup {
                    validate_markup(&cleaned)?;
                }
                Ok(HostPayload::Markup(sanitize_markup(&cleaned)))
            }
            PreviewMode::Component => {
                let component = compile_component(unwrap_component(&cleaned))?;
                debug!(
                    expressions = component.expression_count(),
                    setup = component.has_setup(),
                    "component compiled"
                );
                Ok(HostPayload::Component(Arc::new(component)))
            }
        }
    }

    /// Waits for the active host's document.
    ///
    /// With a frame signal source this is what the embedder loads into the
    /// frame; the session stays `loading` until the frame reports.
    pub async fn document(&self) -> PreviewResult<String> {
        let host = self.host.as_ref().ok_or(PreviewError::HostTornDown)?;
        match tokio::time::timeout(self.remaining(), host.rendered()).await {
            Ok(report) => Ok(report?.document),
            Err(_) => Err(PreviewError::Timeout {
                elapsed_ms: self.elapsed_ms(),
            }),
        }
    }

    /// Waits until the current session is terminal, expiring it after the
    /// load timeout. Returns `None` when nothing is mounted.
    pub async fn settle(&mut self) -> Option<PreviewSnapshot> {
        loop {
            let session = self.bridge.session()?;
            if session.status.is_terminal() {
                return self.bridge.snapshot();
            }

            let remaining = self.remaining();
            let signals = &mut self.signals;
            let wire = &mut self.wire_inbox;
            let inbound = tokio::time::timeout(remaining, async move {
                tokio::select! {
                    envelope = signals.recv() => Inbound::Host(envelope),
                    Some(raw) = wire.recv() => Inbound::Wire(raw),
                }
            })
            .await;

            match inbound {
                Ok(Inbound::Host(Some(envelope))) => {
                    self.post(envelope);
                }
                Ok(Inbound::Host(None)) => return self.bridge.snapshot(),
                Ok(Inbound::Wire(raw)) => {
                    if let Err(err) = self.post_wire(&raw) {
                        warn!(error = %err, "frame message rejected");
                    }
                }
                Err(_) => {
                    let elapsed_ms = self.elapsed_ms();
                    warn!(elapsed_ms, "preview host did not signal in time");
                    self.bridge.expire(elapsed_ms);
                    self.teardown_host();
                    return self.bridge.snapshot();
                }
            }
        }
    }

    /// Renders and waits for the terminal state.
    pub async fn render_and_settle(&mut self, code: &GeneratedCode) -> Option<PreviewSnapshot> {
        match self.render(code) {
            Ok(_) => self.settle().await,
            Err(_) => self.bridge.snapshot(),
        }
    }

    /// Hands a signal to the bridge; the document of the reporting host is
    /// attached once its signal is applied.
    pub fn post(&mut self, envelope: Envelope) -> Delivery {
        let origin = envelope.origin;
        let delivery = self.bridge.deliver(envelope);
        if let Delivery::Applied(_) = delivery {
            if let Some(report) = self.host.as_ref().filter(|h| h.id() == origin).and_then(IsolatedHost::report) {
                if !report.boundary_errors.is_empty() {
                    debug!(count = report.boundary_errors.len(), "render errors caught by boundaries");
                }
                self.bridge.attach_document(origin, report.document);
            }
        }
        delivery
    }

    /// Accepts a raw message posted by a host document.
    ///
    /// The channel token must belong to the active host; tokens of replaced
    /// hosts are reported as stale, anything else is untrusted.
    pub fn post_wire(&mut self, raw: &str) -> PreviewResult<Delivery> {
        let message = parse_wire(raw)?;
        if let Some(active) = self.bridge.active_host() {
            if active.channel_token() == message.channel {
                return Ok(self.post(Envelope {
                    origin: active,
                    signal: message.signal,
                }));
            }
        }
        if self.retired.iter().any(|t| *t == message.channel) {
            debug!("wire message from a replaced host ignored");
            return Ok(if self.bridge.session().is_some() {
                Delivery::Stale
            } else {
                Delivery::Detached
            });
        }
        Err(PreviewError::UntrustedMessage {
            reason: "channel token does not belong to this preview".to_string(),
        })
    }

    pub fn snapshot(&self) -> Option<PreviewSnapshot> {
        self.bridge.snapshot()
    }

    pub fn status(&self) -> Option<PreviewStatus> {
        self.bridge.session().map(|s| s.status)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PreviewSnapshot>> {
        self.bridge.subscribe()
    }

    pub fn active_host(&self) -> Option<HostId> {
        self.bridge.active_host()
    }

    /// Console lines captured by the active host.
    pub fn console(&self) -> Vec<String> {
        self.host
            .as_ref()
            .and_then(IsolatedHost::report)
            .map(|r| r.console)
            .unwrap_or_default()
    }

    /// Tears down the host and detaches the view.
    pub fn unmount(mut self) {
        self.teardown_host();
        self.bridge.detach();
        self.signals.close();
        self.wire_inbox.close();
    }

    fn remaining(&self) -> Duration {
        let elapsed = self.started.map(|t| t.elapsed()).unwrap_or_default();
        self.config.load_timeout().saturating_sub(elapsed)
    }

    fn elapsed_ms(&self) -> u64 {
        self.started
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(self.config.load_timeout_ms)
    }

    fn teardown_host(&mut self) {
        if let Some(host) = self.host.take() {
            host.teardown();
            if self.retired.len() == RETIRED_TOKENS {
                self.retired.pop_front();
            }
            self.retired.push_back(host.id().channel_token());
        }
    }
}

enum Inbound {
    Host(Option<Envelope>),
    Wire(String),
}

impl Drop for Preview {
    fn drop(&mut self) {
        self.teardown_host();
    }
}

impl fmt::Debug for Preview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preview")
            .field("mode", &self.config.mode)
            .field("session", &self.bridge.session())
            .field("host", &self.host)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("component".parse::<PreviewMode>().unwrap(), PreviewMode::Component);
        assert_eq!(" HTML ".parse::<PreviewMode>().unwrap(), PreviewMode::Markup);
        assert!("react".parse::<PreviewMode>().is_err());
        assert_eq!(PreviewMode::Component.to_string(), "component");
    }

    #[test]
    fn test_new_requires_runtime() {
        let err = Preview::new(PreviewConfig::default()).unwrap_err();
        assert!(matches!(err, PreviewError::Config(_)));
    }

    #[tokio::test]
    async fn test_source_size_limit() {
        let mut preview = Preview::new(PreviewConfig {
            max_source_bytes: 8,
            ..PreviewConfig::default()
        })
        .unwrap();
        let err = preview.render(&GeneratedCode::new("<div>too long</div>")).unwrap_err();
        assert!(matches!(err, PreviewError::LimitExceeded { .. }));
        assert_eq!(preview.status(), Some(PreviewStatus::Error));
        assert_eq!(preview.active_host(), None);
    }

    #[tokio::test]
    async fn test_fenced_markup_is_stripped() {
        let mut preview = Preview::new(PreviewConfig::default()).unwrap();
        let snap = preview
            .render_and_settle(&GeneratedCode::new("```html\n<p>hi</p>\n```"))
            .await
            .unwrap();
        assert_eq!(snap.status, PreviewStatus::Ready);
        assert!(snap.document.unwrap().contains("<div id=\"root\"><p>hi</p></div>"));
    }

    #[tokio::test]
    async fn test_surrounding_whitespace_is_kept() {
        let mut preview = Preview::new(PreviewConfig::default()).unwrap();
        let snap = preview
            .render_and_settle(&GeneratedCode::new("\n  <p>hi</p>\n"))
            .await
            .unwrap();
        assert!(snap
            .document
            .unwrap()
            .contains("<div id=\"root\">\n  <p>hi</p>\n</div>"));
    }

    #[tokio::test]
    async fn test_document_without_host() {
        let preview = Preview::new(PreviewConfig::default()).unwrap();
        assert_eq!(preview.document().await, Err(PreviewError::HostTornDown));
    }

    #[tokio::test]
    async fn test_settle_without_render() {
        let mut preview = Preview::new(PreviewConfig::default()).unwrap();
        assert_eq!(preview.settle().await, None);
    }
}
