//! Component-compilation mode.
//!
//! Component source is JSX-shaped markup whose `{...}` expressions and
//! optional top-level `<script>` block are Luau:
//!
//! ```text
//! <script>
//!   plans = { "Free", "Pro" }
//! </script>
//! <section className="p-6 bg-black text-white">
//!   <h1>{#plans} plans</h1>
//!   <ErrorBoundary fallback="Pricing unavailable">
//!     <ul>{plans}</ul>
//!   </ErrorBoundary>
//! </section>
//! ```
//!
//! [`compile_component`] parses and syntax-checks everything up front; the
//! result is mounted inside a fresh sandbox by the preview host.

mod compile;
mod mount;
mod parser;

pub use compile::{compile_component, CompiledComponent, ERROR_BOUNDARY};
pub use mount::{mount, MountOutput};
pub use parser::{
    parse_component, AttrValue, Attribute, ComponentSource, Element, Expr, Node, Script,
    MAX_NESTING_DEPTH,
};
