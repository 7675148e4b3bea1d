use super::compile::{Chunk, CompiledComponent, Template, TemplateAttr};
use crate::error::{PreviewError, PreviewResult};
use crate::runtime::Sandbox;
use crate::sanitize::{attribute_is_safe, escape_html};
use mlua::Value;
use std::fmt::Write;
use tracing::debug;

/// Markup produced by mounting a compiled component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MountOutput {
    pub html: String,
    /// Errors caught and replaced by an `<ErrorBoundary>` fallback.
    pub boundary_errors: Vec<PreviewError>,
}

/// Runs the setup script and renders the template inside `sandbox`.
///
/// The root acts as an implicit boundary: an error that escapes every
/// explicit boundary is returned, with the fallback markup that replaces
/// the whole tree.
pub fn mount(
    component: &CompiledComponent,
    sandbox: &Sandbox,
) -> Result<MountOutput, (PreviewError, MountOutput)> {
    let mut output = MountOutput::default();

    if let Some(setup) = &component.setup {
        if let Err(err) = sandbox.exec("setup", setup) {
            output.html = fallback_html(None, &err);
            return Err((err, output));
        }
    }

    let mut renderer = Renderer {
        sandbox,
        boundary_errors: Vec::new(),
        emitted: 0,
        limit: sandbox.max_output_bytes(),
    };
    let mut html = String::new();
    let result = component
        .nodes
        .iter()
        .try_for_each(|node| renderer.render(node, &mut html));
    output.boundary_errors = renderer.boundary_errors;

    match result {
        Ok(()) => {
            output.html = html;
            Ok(output)
        }
        Err(err) => {
            output.html = fallback_html(None, &err);
            Err((err, output))
        }
    }
}

fn fallback_html(fallback: Option<&str>, err: &PreviewError) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "<div role=\"alert\" data-preview-boundary=\"\" class=\"p-4 bg-red-100 text-red-500\">"
    );
    if let Some(text) = fallback {
        let _ = write!(out, "<p>{}</p>", escape_html(text));
    }
    let _ = write!(out, "<pre>{}</pre></div>", escape_html(&err.display_message()));
    out
}

struct Renderer<'a> {
    sandbox: &'a Sandbox,
    boundary_errors: Vec<PreviewError>,
    /// Bytes produced so far, including output later replaced by a fallback.
    emitted: usize,
    limit: usize,
}

impl Renderer<'_> {
    fn render(&mut self, node: &Template, out: &mut String) -> PreviewResult<()> {
        self.sandbox.check_limits()?;
        match node {
            Template::Text(text) => {
                self.emit(out, &text.replace('>', "&gt;"))?;
            }
            Template::Expr(chunk) => {
                let value = self.eval(chunk)?;
                self.push_value(&value, out, 0)?;
            }
            Template::Fragment(children) => {
                for child in children {
                    self.render(child, out)?;
                }
            }
            Template::Boundary { fallback, children } => {
                let mut inner = String::new();
                let result = children.iter().try_for_each(|c| self.render(c, &mut inner));
                match result {
                    Ok(()) => out.push_str(&inner),
                    Err(err) => {
                        // budget, teardown and output limits are not recoverable locally
                        if let Some(fatal) = self.sandbox.tripped() {
                            return Err(fatal);
                        }
                        if matches!(err, PreviewError::LimitExceeded { .. }) {
                            return Err(err);
                        }
                        debug!(error = %err, "render error caught by boundary");
                        self.emit(out, &fallback_html(Some(fallback), &err))?;
                        self.boundary_errors.push(PreviewError::RenderBoundaryError {
                            message: err.display_message(),
                        });
                    }
                }
            }
            Template::Element {
                tag,
                attrs,
                children,
                void,
            } => {
                self.emit(out, &format!("<{}", tag))?;
                for (name, attr) in attrs {
                    self.render_attr(name, attr, out)?;
                }
                if *void {
                    return self.emit(out, " />");
                }
                self.emit(out, ">")?;
                for child in children {
                    self.render(child, out)?;
                }
                self.emit(out, &format!("</{}>", tag))?;
            }
        }
        Ok(())
    }

    fn render_attr(&mut self, name: &str, attr: &TemplateAttr, out: &mut String) -> PreviewResult<()> {
        let value = match attr {
            TemplateAttr::Flag => return self.emit(out, &format!(" {}", name)),
            TemplateAttr::Static(s) => s.clone(),
            TemplateAttr::Dynamic(chunk) => match self.eval(chunk)? {
                Value::Nil | Value::Boolean(false) => return Ok(()),
                Value::Boolean(true) => return self.emit(out, &format!(" {}", name)),
                Value::Table(t) if name == "style" => self.style_from_table(&t)?,
                other => scalar_to_string(&other).ok_or_else(|| PreviewError::RuntimeError {
                    message: format!(
                        "attribute '{}' cannot be set from a {} value",
                        name,
                        other.type_name()
                    ),
                })?,
            },
        };
        if !attribute_is_safe(name, Some(&value)) {
            debug!(attribute = name, "dropping unsafe attribute value");
            return Ok(());
        }
        self.emit(out, &format!(" {}=\"{}\"", name, escape_html(&value)))
    }

    fn eval(&self, chunk: &Chunk) -> PreviewResult<Value> {
        self.sandbox.eval(&chunk.name, &chunk.source)
    }

    /// Appends `s`, failing once the output limit is passed.
    fn emit(&mut self, out: &mut String, s: &str) -> PreviewResult<()> {
        self.reserve(s.len())?;
        out.push_str(s);
        Ok(())
    }

    fn reserve(&mut self, len: usize) -> PreviewResult<()> {
        self.emitted = self.emitted.saturating_add(len);
        if self.emitted > self.limit {
            return Err(PreviewError::LimitExceeded {
                what: "rendered markup".to_string(),
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// JSX rendering rules: nil and booleans render nothing, arrays render
    /// each element in order.
    fn push_value(&mut self, value: &Value, out: &mut String, depth: usize) -> PreviewResult<()> {
        match value {
            Value::Nil | Value::Boolean(_) => {}
            Value::Table(t) => {
                if depth > 8 {
                    return Err(PreviewError::RuntimeError {
                        message: "nested tables are too deep to render".to_string(),
                    });
                }
                for item in t.sequence_values::<Value>() {
                    self.sandbox.check_limits()?;
                    self.push_value(&item?, out, depth + 1)?;
                }
            }
            other => match scalar_to_string(other) {
                Some(s) => self.emit(out, &escape_html(&s))?,
                None => {
                    return Err(PreviewError::RuntimeError {
                        message: format!("cannot render a {} value", other.type_name()),
                    });
                }
            },
        }
        Ok(())
    }

    /// `{ backgroundColor = "#111", padding = 4 }` → `background-color:#111;padding:4px`
    fn style_from_table(&mut self, table: &mlua::Table) -> PreviewResult<String> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for pair in table.pairs::<String, Value>() {
            self.sandbox.check_limits()?;
            let (key, value) = pair?;
            let Some(v) = scalar_to_string(&value) else {
                continue;
            };
            let needs_px = matches!(value, Value::Integer(_) | Value::Number(_)) && !unitless(&key);
            let v = if needs_px && v != "0" { format!("{}px", v) } else { v };
            self.reserve(key.len() + v.len() + 2)?;
            entries.push((kebab_case(&key), v));
        }
        entries.sort();
        Ok(entries
            .into_iter()
            .map(|(k, v)| format!("{}:{}", k, v))
            .collect::<Vec<_>>()
            .join(";"))
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string_lossy()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(format_number(*n)),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn unitless(key: &str) -> bool {
    matches!(
        key,
        "opacity" | "zIndex" | "fontWeight" | "lineHeight" | "flex" | "flexGrow" | "flexShrink" | "order"
    )
}

fn kebab_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('-');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
