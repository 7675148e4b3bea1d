//! # MediaByte Generated-UI Preview
//!
//! Renders untrusted, LLM-generated UI source inside an isolated host and
//! reports `loading → ready | error` through a typed signal bridge.
//!
//! ## Features
//! - Markup mode: allow-list HTML sanitizing, injected into a standalone document
//! - Component mode: JSX-shaped markup with Luau expressions, compiled up
//!   front and mounted in a fresh sandboxed VM per render
//! - Error boundaries, execution budget, heap limit and load timeout
//! - Stale-signal protection: only the active host can settle a session
//! - Typed clients for the UI generation providers
//!
//! ## Example
//! ```ignore
//! use mediabyte_preview::{GeneratedCode, Preview, PreviewConfig, PreviewStatus};
//!
//! let mut preview = Preview::new(PreviewConfig::default())?;
//! let snapshot = preview
//!     .render_and_settle(&GeneratedCode::new("<div>Hello</div>"))
//!     .await
//!     .unwrap();
//! assert_eq!(snapshot.status, PreviewStatus::Ready);
//! ```

pub mod bridge;
pub mod channel;
pub mod code;
pub mod component;
pub mod config;
pub mod document;
pub mod error;
pub mod generate;
pub mod host;
pub mod preview;
pub mod runtime;
pub mod sanitize;
pub mod signal;

// --- Core types ---
pub use bridge::{Delivery, PreviewSession, PreviewSnapshot, PreviewStatus, RenderBridge};
pub use code::GeneratedCode;
pub use config::{AppConfig, GeneratorSettings, PreviewConfig};
pub use error::{PreviewError, PreviewResult};
pub use host::{HostId, SignalSource};
pub use preview::{Preview, PreviewMode};
pub use signal::{Envelope, Signal};

// --- Validation ---
pub use component::{compile_component, CompiledComponent};
pub use sanitize::{sanitize_markup, validate_markup};

// --- Generation ---
pub use generate::{GenerateError, GeneratedUi, Provider, ProviderConfig, UiGenerator};

/// Checks generated code without rendering it: sanitizer validation in
/// markup mode, full compilation in component mode.
pub fn check_source(source: &str, mode: PreviewMode) -> PreviewResult<()> {
    let cleaned = code::strip_artifacts(source);
    match mode {
        PreviewMode::Markup => validate_markup(&cleaned),
        PreviewMode::Component => compile_component(code::unwrap_component(&cleaned)).map(|_| ()),
    }
}
