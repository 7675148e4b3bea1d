use super::parser::{parse_component, AttrValue, Element, Node};
use crate::error::{PreviewError, PreviewResult};
use crate::runtime::check_syntax;
use crate::sanitize::{attribute_is_safe, decode_entities, is_allowed_tag, is_void_tag};
use tracing::debug;

/// Name of the element that catches render errors in its subtree.
pub const ERROR_BOUNDARY: &str = "ErrorBoundary";

const DEFAULT_FALLBACK: &str = "Something went wrong while rendering this section.";

/// Component source compiled into a render template. Every embedded
/// expression has been syntax-checked but nothing has been executed.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledComponent {
    pub(crate) setup: Option<String>,
    pub(crate) nodes: Vec<Template>,
    expressions: usize,
}

impl CompiledComponent {
    pub fn expression_count(&self) -> usize {
        self.expressions
    }

    pub fn has_setup(&self) -> bool {
        self.setup.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Template {
    Element {
        tag: String,
        attrs: Vec<(String, TemplateAttr)>,
        children: Vec<Template>,
        void: bool,
    },
    Boundary {
        fallback: String,
        children: Vec<Template>,
    },
    Fragment(Vec<Template>),
    Text(String),
    Expr(Chunk),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TemplateAttr {
    Static(String),
    Flag,
    Dynamic(Chunk),
}

/// A compiled expression and the chunk name used in error messages.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Chunk {
    pub name: String,
    pub source: String,
}

/// Parses and compiles component source. Parse and syntax failures are
/// reported as [`PreviewError::ParseError`].
pub fn compile_component(src: &str) -> PreviewResult<CompiledComponent> {
    let parsed = parse_component(src)?;

    let setup = match parsed.setup {
        Some(script) => {
            check_syntax("setup", &script.source)
                .map_err(|msg| PreviewError::parse_at(src, script.offset, msg))?;
            Some(script.source)
        }
        None => None,
    };

    let mut compiler = Compiler { src, expressions: 0 };
    let nodes = parsed
        .nodes
        .iter()
        .map(|n| compiler.node(n))
        .collect::<PreviewResult<Vec<_>>>()?
        .into_iter()
        .flatten()
        .collect();

    debug!(expressions = compiler.expressions, "component compiled");
    Ok(CompiledComponent {
        setup,
        nodes,
        expressions: compiler.expressions,
    })
}

struct Compiler<'a> {
    src: &'a str,
    expressions: usize,
}

impl Compiler<'_> {
    fn node(&mut self, node: &Node) -> PreviewResult<Option<Template>> {
        Ok(match node {
            Node::Text(text) => Some(Template::Text(text.clone())),
            Node::Expr(expr) => Some(Template::Expr(self.chunk(&expr.source, expr.offset)?)),
            Node::Fragment(children) => Some(Template::Fragment(self.children(children)?)),
            Node::Element(el) => self.element(el)?,
        })
    }

    fn children(&mut self, nodes: &[Node]) -> PreviewResult<Vec<Template>> {
        let mut out = Vec::with_capacity(nodes.len());
        for n in nodes {
            if let Some(t) = self.node(n)? {
                out.push(t);
            }
        }
        Ok(out)
    }

    fn element(&mut self, el: &Element) -> PreviewResult<Option<Template>> {
        if el.tag == ERROR_BOUNDARY {
            let fallback = el
                .attrs
                .iter()
                .find(|a| a.name == "fallback")
                .map(|a| match &a.value {
                    AttrValue::Literal(s) => Ok(decode_entities(s)),
                    _ => Err(PreviewError::parse_at(
                        self.src,
                        a.offset,
                        "ErrorBoundary fallback must be a quoted string",
                    )),
                })
                .transpose()?
                .unwrap_or_else(|| DEFAULT_FALLBACK.to_string());
            return Ok(Some(Template::Boundary {
                fallback,
                children: self.children(&el.children)?,
            }));
        }

        if el.tag == "Fragment" || el.tag == "React.Fragment" {
            return Ok(Some(Template::Fragment(self.children(&el.children)?)));
        }

        if el.tag.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(PreviewError::parse_at(
                self.src,
                el.offset,
                format!("unknown component <{}>", el.tag),
            ));
        }

        if el.tag.eq_ignore_ascii_case("script") {
            return Err(PreviewError::parse_at(
                self.src,
                el.offset,
                "<script> is only allowed once at the top level",
            ));
        }

        if !is_allowed_tag(&el.tag) {
            return Err(PreviewError::parse_at(
                self.src,
                el.offset,
                format!("element <{}> is not allowed in previews", el.tag),
            ));
        }

        let void = is_void_tag(&el.tag);
        if void && !el.children.is_empty() {
            return Err(PreviewError::parse_at(
                self.src,
                el.offset,
                format!("<{}> cannot have children", el.tag),
            ));
        }

        let mut attrs = Vec::with_capacity(el.attrs.len());
        for attr in &el.attrs {
            let Some(name) = html_attr_name(&attr.name) else {
                debug!(attribute = %attr.name, "dropping attribute");
                continue;
            };
            let value = match &attr.value {
                AttrValue::Flag => TemplateAttr::Flag,
                AttrValue::Literal(s) => {
                    // literals hold text, not markup; output escaping re-encodes them
                    let s = decode_entities(s);
                    if !attribute_is_safe(&name, Some(&s)) {
                        debug!(attribute = %name, "dropping unsafe attribute");
                        continue;
                    }
                    TemplateAttr::Static(s)
                }
                AttrValue::Expr(expr) => TemplateAttr::Dynamic(self.chunk(&expr.source, expr.offset)?),
            };
            if matches!(value, TemplateAttr::Flag) && !attribute_is_safe(&name, None) {
                continue;
            }
            attrs.push((name, value));
        }

        Ok(Some(Template::Element {
            tag: el.tag.clone(),
            attrs,
            children: self.children(&el.children)?,
            void,
        }))
    }

    fn chunk(&mut self, source: &str, offset: usize) -> PreviewResult<Chunk> {
        self.expressions += 1;
        let name = format!("expr{}", self.expressions);
        let wrapped = format!("return {}\n", source);
        check_syntax(&name, &wrapped).map_err(|msg| PreviewError::parse_at(self.src, offset, msg))?;
        Ok(Chunk {
            name,
            source: source.to_string(),
        })
    }
}

/// Maps a JSX attribute name to its HTML name. `None` means the attribute
/// has no meaning in a static preview and is dropped.
pub(crate) fn html_attr_name(jsx: &str) -> Option<String> {
    let mapped = match jsx {
        "className" => "class",
        "htmlFor" => "for",
        "key" | "ref" | "dangerouslySetInnerHTML" | "suppressHydrationWarning" => return None,
        "tabIndex" => "tabindex",
        "readOnly" => "readonly",
        "maxLength" => "maxlength",
        "minLength" => "minlength",
        "colSpan" => "colspan",
        "rowSpan" => "rowspan",
        "autoComplete" => "autocomplete",
        "autoPlay" => "autoplay",
        "playsInline" => "playsinline",
        "defaultValue" => "value",
        "defaultChecked" => "checked",
        "strokeWidth" => "stroke-width",
        "strokeLinecap" => "stroke-linecap",
        "strokeLinejoin" => "stroke-linejoin",
        "strokeDasharray" => "stroke-dasharray",
        "strokeOpacity" => "stroke-opacity",
        "fillOpacity" => "fill-opacity",
        "fillRule" => "fill-rule",
        "clipRule" => "clip-rule",
        "clipPath" => "clip-path",
        "stopColor" => "stop-color",
        "stopOpacity" => "stop-opacity",
        "textAnchor" => "text-anchor",
        "xlinkHref" => "xlink:href",
        other => {
            let is_handler = other.len() > 2
                && other.starts_with("on")
                && other[2..].starts_with(|c: char| c.is_ascii_uppercase());
            if is_handler || other.to_ascii_lowercase().starts_with("on") {
                return None;
            }
            other
        }
    };
    Some(mapped.to_string())
}
