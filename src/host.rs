//! Isolated execution host: one per code string, never reused.
//!
//! A host builds the standalone preview document and, for compiled
//! components, mounts the component inside a fresh sandbox on the blocking
//! pool. Exactly one party reports the terminal signal: the host itself
//! through its [`HostSender`], or the frame displaying the document through
//! the bridge script (see [`SignalSource`]).

use crate::channel::HostSender;
use crate::component::{mount, CompiledComponent};
use crate::document::{build_document, DocumentShell, FrameBridge};
use crate::error::{PreviewError, PreviewResult};
use crate::runtime::{Sandbox, SandboxLimits};
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one host: the session it was created for plus a random token.
/// The token is also the channel token embedded in the host's document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostId {
    session: u64,
    token: Uuid,
}

impl HostId {
    pub fn new(session: u64) -> Self {
        HostId {
            session,
            token: Uuid::new_v4(),
        }
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn channel_token(&self) -> String {
        self.token.to_string()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host#{}/{}", self.session, self.token)
    }
}

/// Who posts a host's terminal signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    /// The host signals once its document is built. The document carries
    /// no bridge script.
    #[default]
    Host,
    /// The document is shown in an external frame whose bridge script
    /// posts the signal over the wire; the host stays silent.
    Frame,
}

impl FromStr for SignalSource {
    type Err = PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "host" => Ok(SignalSource::Host),
            "frame" => Ok(SignalSource::Frame),
            other => Err(PreviewError::Config(format!(
                "unknown signal source '{}' (expected host or frame)",
                other
            ))),
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalSource::Host => "host",
            SignalSource::Frame => "frame",
        })
    }
}

/// What a host renders: sanitized markup, or a compiled component.
#[derive(Debug, Clone)]
pub enum HostPayload {
    Markup(String),
    Component(Arc<CompiledComponent>),
}

#[derive(Debug, Clone)]
pub struct HostSettings {
    pub limits: SandboxLimits,
    pub title: String,
    pub styling_runtime: Option<String>,
    pub signal_source: SignalSource,
}

/// Written once by the host before it posts its terminal signal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostReport {
    pub document: String,
    /// Lines captured from `print` inside the sandbox.
    pub console: Vec<String>,
    pub boundary_errors: Vec<PreviewError>,
}

pub struct IsolatedHost {
    id: HostId,
    cancel: Arc<AtomicBool>,
    report: Arc<OnceLock<HostReport>>,
    rendered: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Wakes `rendered` waiters when the host task ends, even if it never ran.
struct NotifyOnDrop(Arc<Notify>);

impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
        self.0.notify_waiters();
    }
}

impl IsolatedHost {
    /// Starts the host on the blocking pool of `runtime`.
    pub fn spawn(
        runtime: &Handle,
        id: HostId,
        payload: HostPayload,
        settings: HostSettings,
        sender: HostSender,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let report = Arc::new(OnceLock::new());
        let rendered = Arc::new(Notify::new());

        let task = {
            let cancel = cancel.clone();
            let report = report.clone();
            let done = NotifyOnDrop(rendered.clone());
            runtime.spawn_blocking(move || {
                let _done = done;
                let (host_report, signal) = run_host(id, payload, &settings, cancel.clone());
                let _ = report.set(host_report);
                if cancel.load(Ordering::Relaxed) {
                    debug!(host = %id, "host torn down before signalling");
                    return;
                }
                if settings.signal_source == SignalSource::Frame {
                    debug!(host = %id, "document ready, frame reports the signal");
                    return;
                }
                if !sender.send(signal) {
                    debug!(host = %id, "view unsubscribed, signal dropped");
                }
            })
        };

        debug!(host = %id, "host spawned");
        IsolatedHost {
            id,
            cancel,
            report,
            rendered,
            task,
        }
    }

    pub fn id(&self) -> HostId {
        self.id
    }

    /// Available once the host has finished rendering.
    pub fn report(&self) -> Option<HostReport> {
        self.report.get().cloned()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the host has built its document.
    pub async fn rendered(&self) -> PreviewResult<HostReport> {
        loop {
            let mut notified = pin!(self.rendered.notified());
            notified.as_mut().enable();
            if let Some(report) = self.report() {
                return Ok(report);
            }
            if self.task.is_finished() || self.cancel.load(Ordering::Relaxed) {
                return Err(PreviewError::HostTornDown);
            }
            notified.await;
        }
    }

    /// Stops the host: the sandbox interrupt aborts any running script and
    /// no signal is posted afterwards.
    pub fn teardown(&self) {
        if !self.cancel.swap(true, Ordering::Relaxed) {
            debug!(host = %self.id, "host torn down");
        }
        self.task.abort();
    }
}

impl Drop for IsolatedHost {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}

impl fmt::Debug for IsolatedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedHost")
            .field("id", &self.id)
            .field("cancelled", &self.cancel.load(Ordering::Relaxed))
            .finish()
    }
}

fn run_host(
    id: HostId,
    payload: HostPayload,
    settings: &HostSettings,
    cancel: Arc<AtomicBool>,
) -> (HostReport, Signal) {
    let channel = id.channel_token();
    let document = |body: &str, signal: &Signal| {
        let failure = match signal {
            Signal::Error { message } => Some(message.as_str()),
            Signal::Loaded => None,
        };
        let bridge = (settings.signal_source == SignalSource::Frame).then_some(FrameBridge {
            channel: &channel,
            failure,
        });
        build_document(
            body,
            &DocumentShell {
                title: &settings.title,
                styling_runtime: settings.styling_runtime.as_deref(),
                bridge,
            },
        )
    };

    match payload {
        HostPayload::Markup(body) => {
            let signal = Signal::Loaded;
            let report = HostReport {
                document: document(&body, &signal),
                ..HostReport::default()
            };
            (report, signal)
        }
        HostPayload::Component(component) => {
            let sandbox = match Sandbox::new(settings.limits, cancel) {
                Ok(sandbox) => sandbox,
                Err(err) => {
                    warn!(host = %id, error = %err, "failed to create sandbox");
                    let signal = Signal::error(err.display_message());
                    let report = HostReport {
                        document: document("", &signal),
                        ..HostReport::default()
                    };
                    return (report, signal);
                }
            };

            let (output, signal) = match mount(&component, &sandbox) {
                Ok(output) => (output, Signal::Loaded),
                Err((err, output)) => {
                    debug!(host = %id, error = %err, "component failed to mount");
                    (output, Signal::error(err.display_message()))
                }
            };
            debug!(
                host = %id,
                memory = sandbox.memory_used(),
                caught = output.boundary_errors.len(),
                "component mounted"
            );
            let report = HostReport {
                document: document(&output.html, &signal),
                console: sandbox.console(),
                boundary_errors: output.boundary_errors,
            };
            (report, signal)
        }
    }
}
