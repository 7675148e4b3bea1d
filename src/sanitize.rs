//! Markup-mode sanitizer: keeps an allow-list of tags and attributes so the
//! result can be injected as inert markup into a preview document.
//! No script, no inline event handlers, no script URLs.

use crate::error::{PreviewError, PreviewResult};
use std::collections::HashSet;
use std::sync::OnceLock;

/// Elements removed together with everything inside them.
const DROP_WITH_CONTENT: &[&str] = &[
    "script", "style", "iframe", "object", "embed", "frame", "frameset", "noscript", "template",
    "base", "meta", "link", "title", "applet", "xmp", "plaintext", "noembed", "noframes",
];

/// Elements that never have a closing tag.
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const ALLOWED_TAGS: &[&str] = &[
    // structure and text
    "a", "abbr", "address", "article", "aside", "b", "bdi", "bdo", "blockquote", "br", "button",
    "caption", "cite", "code", "col", "colgroup", "data", "dd", "del", "details", "dfn", "div",
    "dl", "dt", "em", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "header", "hr", "i", "img", "input", "ins", "kbd", "label", "legend", "li",
    "main", "mark", "nav", "ol", "optgroup", "option", "output", "p", "picture", "pre",
    "progress", "q", "s", "samp", "section", "select", "small", "source", "span", "strong",
    "sub", "summary", "sup", "table", "tbody", "td", "textarea", "tfoot", "th", "thead", "time",
    "tr", "u", "ul", "var", "wbr", "audio", "video", "track", "meter", "hgroup", "menu",
    // inline svg (icons)
    "svg", "g", "path", "circle", "ellipse", "line", "polyline", "polygon", "rect", "defs",
    "lineargradient", "radialgradient", "stop", "clippath", "mask", "symbol", "use", "text",
    "tspan",
];

const ALLOWED_ATTRS: &[&str] = &[
    "class", "id", "style", "title", "role", "lang", "dir", "tabindex", "hidden", "href",
    "src", "alt", "width", "height", "type", "name", "value", "placeholder", "for", "colspan",
    "rowspan", "scope", "target", "rel", "disabled", "checked", "selected", "readonly",
    "required", "multiple", "min", "max", "step", "maxlength", "minlength", "pattern", "rows",
    "cols", "open", "datetime", "cite", "start", "reversed", "span", "label", "loading",
    "decoding", "controls", "muted", "loop", "poster", "autocomplete", "autoplay",
    "playsinline", "srcset", "sizes", "headers", "abbr", "download", "hreflang", "wrap",
    // svg presentation attributes
    "xmlns", "viewbox", "fill", "stroke", "stroke-width", "stroke-linecap", "stroke-linejoin",
    "stroke-dasharray", "stroke-opacity", "fill-opacity", "fill-rule", "clip-rule", "opacity",
    "d", "cx", "cy", "r", "rx", "ry", "x", "y", "x1", "x2", "y1", "y2", "points", "transform",
    "offset", "stop-color", "stop-opacity", "gradientunits", "gradienttransform",
    "preserveaspectratio", "xlink:href", "clip-path", "focusable", "text-anchor",
];

/// Attributes whose value is a URL and must pass the scheme check.
const URL_ATTRS: &[&str] = &[
    "href", "src", "action", "formaction", "xlink:href", "poster", "background", "cite",
];

fn set(items: &'static [&'static str]) -> HashSet<&'static str> {
    items.iter().copied().collect()
}

fn allowed_tags() -> &'static HashSet<&'static str> {
    static TAGS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    TAGS.get_or_init(|| set(ALLOWED_TAGS))
}

fn allowed_attrs() -> &'static HashSet<&'static str> {
    static ATTRS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    ATTRS.get_or_init(|| set(ALLOWED_ATTRS))
}

pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// A markup token with its byte range in the source.
#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Text(&'a str),
    Comment,
    Declaration,
    StartTag {
        name: &'a str,
        attrs: Vec<Attr<'a>>,
        self_closing: bool,
        raw: &'a str,
        offset: usize,
    },
    EndTag {
        name: &'a str,
        offset: usize,
    },
    /// A `<` that does not open a tag.
    StrayLt,
}

#[derive(Debug, Clone, PartialEq)]
struct Attr<'a> {
    name: &'a str,
    value: Option<&'a str>,
}

/// Splits markup into tokens. Never fails: malformed tags degrade to text.
fn tokenize(html: &str) -> Vec<Token<'_>> {
    let bytes = html.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'<' {
            let end = find_byte(bytes, i, b'<').unwrap_or(bytes.len());
            tokens.push(Token::Text(&html[i..end]));
            i = end;
            continue;
        }

        if html[i..].starts_with("<!--") {
            tokens.push(Token::Comment);
            i = match html[i + 4..].find("-->") {
                Some(p) => i + 4 + p + 3,
                None => bytes.len(),
            };
            continue;
        }

        if html[i..].starts_with("<!") || html[i..].starts_with("<?") {
            tokens.push(Token::Declaration);
            i = match find_byte(bytes, i, b'>') {
                Some(p) => p + 1,
                None => bytes.len(),
            };
            continue;
        }

        let closing = bytes.get(i + 1) == Some(&b'/');
        let name_start = if closing { i + 2 } else { i + 1 };
        if !bytes.get(name_start).is_some_and(|b| b.is_ascii_alphabetic()) {
            tokens.push(Token::StrayLt);
            i += 1;
            continue;
        }

        let mut j = name_start;
        while j < bytes.len() && is_name_byte(bytes[j]) {
            j += 1;
        }
        let name = &html[name_start..j];

        if closing {
            match find_byte(bytes, j, b'>') {
                Some(end) => {
                    tokens.push(Token::EndTag { name, offset: i });
                    i = end + 1;
                }
                None => {
                    tokens.push(Token::StrayLt);
                    i += 1;
                }
            }
            continue;
        }

        match parse_attributes(html, j) {
            Some((attrs, self_closing, end)) => {
                tokens.push(Token::StartTag {
                    name,
                    attrs,
                    self_closing,
                    raw: &html[i..end],
                    offset: i,
                });
                i = end;
            }
            None => {
                tokens.push(Token::StrayLt);
                i += 1;
            }
        }
    }

    tokens
}

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b':' || b == b'_'
}

fn find_byte(bytes: &[u8], start: usize, needle: u8) -> Option<usize> {
    bytes[start..]
        .iter()
        .position(|&b| b == needle)
        .map(|p| start + p)
}

/// Parses attributes starting after the tag name. Returns the attributes,
/// whether the tag is self-closing, and the index just past `>`.
fn parse_attributes(html: &str, mut i: usize) -> Option<(Vec<Attr<'_>>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut attrs = Vec::new();

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return None;
        }
        match bytes[i] {
            b'>' => return Some((attrs, false, i + 1)),
            b'/' if bytes.get(i + 1) == Some(&b'>') => return Some((attrs, true, i + 2)),
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }

        let name_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let name = &html[name_start..i];

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            attrs.push(Attr { name, value: None });
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let value = match bytes.get(i) {
            Some(&q) if q == b'"' || q == b'\'' => {
                let close = find_byte(bytes, i + 1, q)?;
                let v = &html[i + 1..close];
                i = close + 1;
                v
            }
            Some(_) => {
                let start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                &html[start..i]
            }
            None => return None,
        };
        attrs.push(Attr {
            name,
            value: Some(value),
        });
    }
}

/// Sanitizes untrusted markup for inert injection into a preview document.
///
/// Safe markup is returned byte-for-byte. The input is never modified.
pub fn sanitize_markup(html: &str) -> String {
    let tokens = tokenize(html);
    let mut out = String::with_capacity(html.len());
    let mut skip_until: Option<String> = None;

    for token in tokens {
        if let Some(ref dropped) = skip_until {
            if let Token::EndTag { name, .. } = token {
                if name.eq_ignore_ascii_case(dropped) {
                    skip_until = None;
                }
            }
            continue;
        }

        match token {
            Token::Text(text) => out.push_str(text),
            Token::Comment | Token::Declaration => {}
            Token::StrayLt => out.push_str("&lt;"),
            Token::StartTag {
                name,
                attrs,
                self_closing,
                raw,
                ..
            } => {
                let lower = name.to_ascii_lowercase();
                if DROP_WITH_CONTENT.contains(&lower.as_str()) {
                    if !self_closing && !VOID_TAGS.contains(&lower.as_str()) {
                        skip_until = Some(lower);
                    }
                    continue;
                }
                if !allowed_tags().contains(lower.as_str()) {
                    continue;
                }
                let kept: Vec<&Attr> = attrs.iter().filter(|a| attribute_allowed(a)).collect();
                if kept.len() == attrs.len() {
                    out.push_str(raw);
                } else {
                    out.push('<');
                    out.push_str(name);
                    for attr in kept {
                        push_attr(&mut out, attr);
                    }
                    out.push_str(if self_closing { " />" } else { ">" });
                }
            }
            Token::EndTag { name, .. } => {
                let lower = name.to_ascii_lowercase();
                if allowed_tags().contains(lower.as_str()) && !VOID_TAGS.contains(&lower.as_str())
                {
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
            }
        }
    }

    out
}

fn push_attr(out: &mut String, attr: &Attr) {
    out.push(' ');
    out.push_str(attr.name);
    if let Some(value) = attr.value {
        out.push_str("=\"");
        out.push_str(&value.replace('"', "&quot;"));
        out.push('"');
    }
}

fn attribute_allowed(attr: &Attr) -> bool {
    attribute_is_safe(attr.name, attr.value)
}

pub(crate) fn is_allowed_tag(tag: &str) -> bool {
    allowed_tags().contains(tag.to_ascii_lowercase().as_str())
}

pub(crate) fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag.to_ascii_lowercase().as_str())
}

/// Allow-list check for one attribute. `value` is `None` for bare attributes.
pub(crate) fn attribute_is_safe(name: &str, value: Option<&str>) -> bool {
    let name = name.to_ascii_lowercase();
    if name.starts_with("on") {
        return false;
    }
    let known = allowed_attrs().contains(name.as_str())
        || name.starts_with("aria-")
        || name.starts_with("data-");
    if !known {
        return false;
    }
    let Some(value) = value else {
        return true;
    };
    if URL_ATTRS.contains(&name.as_str()) && !url_is_safe(value) {
        return false;
    }
    if name == "srcset" && value.split(',').any(|c| !url_is_safe(c.trim())) {
        return false;
    }
    if name == "style" {
        let folded = normalize_for_check(value);
        if folded.contains("expression(")
            || folded.contains("javascript:")
            || folded.contains("behavior:")
            || folded.contains("-moz-binding")
        {
            return false;
        }
    }
    true
}

/// Lower-cases, decodes character references the way a browser does, and
/// drops whitespace/control characters so obfuscated schemes are caught.
fn normalize_for_check(value: &str) -> String {
    decode_entities(value)
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Decodes numeric references (any number of digits, `;` optional) and a
/// few named ones. Unknown references are kept verbatim.
pub(crate) fn decode_entities(value: &str) -> String {
    let mut decoded = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        match decode_reference(after) {
            Some((ch, consumed)) => {
                decoded.push(ch);
                rest = &after[consumed..];
            }
            None => {
                decoded.push('&');
                rest = after;
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

/// Decodes the reference following an `&`. Returns the character and the
/// number of bytes consumed.
fn decode_reference(after: &str) -> Option<(char, usize)> {
    if let Some(numeric) = after.strip_prefix('#') {
        let (radix, digits_at) = match numeric.as_bytes().first() {
            Some(b'x' | b'X') => (16, 2),
            _ => (10, 1),
        };
        let digits = after[digits_at..]
            .bytes()
            .take_while(|b| (*b as char).is_digit(radix))
            .count();
        if digits == 0 {
            return None;
        }
        let code = after[digits_at..digits_at + digits]
            .chars()
            .filter_map(|c| c.to_digit(radix))
            .fold(0u32, |acc, d| acc.saturating_mul(radix).saturating_add(d));
        let ch = match code {
            0 => char::REPLACEMENT_CHARACTER,
            _ => char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER),
        };
        let mut consumed = digits_at + digits;
        if after[consumed..].starts_with(';') {
            consumed += 1;
        }
        return Some((ch, consumed));
    }

    let end = after.find(';').filter(|&e| e <= 10)?;
    let ch = match &after[..end] {
        "colon" => ':',
        "tab" => '\t',
        "newline" => '\n',
        "lpar" => '(',
        "rpar" => ')',
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => return None,
    };
    Some((ch, end + 1))
}

pub(crate) fn url_is_safe(value: &str) -> bool {
    let folded = normalize_for_check(value);
    match folded.find(':') {
        None => true,
        Some(colon) => {
            // a colon after a path or query separator is not a scheme
            if folded[..colon].contains(['/', '?', '#']) {
                return true;
            }
            let scheme = &folded[..colon];
            match scheme {
                "http" | "https" | "mailto" | "tel" => true,
                "data" => {
                    let rest = &folded[colon + 1..];
                    ["image/png", "image/gif", "image/jpeg", "image/webp"]
                        .iter()
                        .any(|mime| rest.starts_with(mime))
                }
                _ => false,
            }
        }
    }
}

/// Checks that every non-void element is closed in order.
pub fn validate_markup(html: &str) -> PreviewResult<()> {
    let mut stack: Vec<(String, usize)> = Vec::new();

    for token in tokenize(html) {
        match token {
            Token::StartTag {
                name,
                self_closing,
                offset,
                ..
            } => {
                let lower = name.to_ascii_lowercase();
                if !self_closing && !VOID_TAGS.contains(&lower.as_str()) {
                    stack.push((lower, offset));
                }
            }
            Token::EndTag { name, offset } => {
                let lower = name.to_ascii_lowercase();
                match stack.pop() {
                    Some((open, _)) if open == lower => {}
                    Some((open, _)) => {
                        return Err(PreviewError::parse_at(
                            html,
                            offset,
                            format!("expected </{}> but found </{}>", open, lower),
                        ));
                    }
                    None => {
                        return Err(PreviewError::parse_at(
                            html,
                            offset,
                            format!("unexpected closing tag </{}>", lower),
                        ));
                    }
                }
            }
            _ => {}
        }
    }

    match stack.pop() {
        Some((open, offset)) => Err(PreviewError::parse_at(
            html,
            offset,
            format!("unclosed element <{}>", open),
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_safe_markup_passes_unchanged() {
        assert_eq!(sanitize_markup("<div>Hello</div>"), "<div>Hello</div>");
    }

    #[test]
    fn test_tailwind_markup_passes_unchanged() {
        let html = r#"<section class="p-4 bg-[#111]"><button aria-label="Buy" class="hover:bg-blue-600">Buy</button></section>"#;
        assert_eq!(sanitize_markup(html), html);
    }

    #[test]
    fn test_script_removed_with_content() {
        assert_eq!(
            sanitize_markup("<p>a</p><script>alert(1)</script><p>b</p>"),
            "<p>a</p><p>b</p>"
        );
    }

    #[test]
    fn test_uppercase_script_removed() {
        assert_eq!(sanitize_markup("x<SCRIPT src=evil.js></SCRIPT>y"), "xy");
    }

    #[test]
    fn test_event_handlers_dropped() {
        assert_eq!(
            sanitize_markup(r#"<img src="a.png" onerror="alert(1)">"#),
            r#"<img src="a.png">"#
        );
    }

    #[test]
    fn test_javascript_href_dropped() {
        assert_eq!(
            sanitize_markup(r#"<a href="javascript:alert(1)" class="x">go</a>"#),
            r#"<a class="x">go</a>"#
        );
    }

    #[test]
    fn test_obfuscated_scheme_dropped() {
        let html = r#"<a href="jav&#x61;script&colon;alert(1)">go</a>"#;
        assert_eq!(sanitize_markup(html), "<a>go</a>");
    }

    #[test]
    fn test_numeric_reference_without_semicolon_dropped() {
        let html = r#"<a href="javascript&#58alert(1)">go</a>"#;
        assert_eq!(sanitize_markup(html), "<a>go</a>");
        let html = r#"<a href="javascript&#x3aalert(1)">go</a>"#;
        assert_eq!(sanitize_markup(html), "<a>go</a>");
    }

    #[test]
    fn test_zero_padded_reference_dropped() {
        let html = r#"<a href="javascript&#0000000000058;alert(1)">go</a>"#;
        assert_eq!(sanitize_markup(html), "<a>go</a>");
        let html = r#"<img src="javascript&#x00000000003A;alert(1)">"#;
        assert_eq!(sanitize_markup(html), "<img>");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(decode_entities("a&#58b&#x3A;c&amp;d"), "a:b:c&d");
        assert_eq!(decode_entities("&#99999999999999;"), "\u{fffd}");
        assert_eq!(decode_entities("&unknown; & &#;"), "&unknown; & &#;");
    }

    #[test]
    fn test_relative_and_https_urls_kept() {
        let html = r#"<a href="/videos?id=1:2">v</a><img src="https://res.cloudinary.com/x.png">"#;
        assert_eq!(sanitize_markup(html), html);
    }

    #[test]
    fn test_unknown_tag_unwrapped() {
        assert_eq!(sanitize_markup("<blink>hi</blink>"), "hi");
    }

    #[test]
    fn test_comments_removed() {
        assert_eq!(sanitize_markup("<p><!-- note -->x</p>"), "<p>x</p>");
    }

    #[test]
    fn test_stray_lt_escaped() {
        assert_eq!(sanitize_markup("<p>1 < 2</p>"), "<p>1 &lt; 2</p>");
    }

    #[test]
    fn test_svg_icon_kept() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 24 24" fill="none"><path d="M4 12h16" stroke-width="2"/></svg>"#;
        assert_eq!(sanitize_markup(svg), svg);
    }

    #[test]
    fn test_style_expression_dropped() {
        assert_eq!(
            sanitize_markup(r#"<div style="width: expression(alert(1))">x</div>"#),
            "<div>x</div>"
        );
    }

    #[test]
    fn test_iframe_dropped() {
        assert_eq!(sanitize_markup(r#"<iframe src="https://x"></iframe>ok"#), "ok");
    }

    #[test]
    fn test_validate_balanced() {
        assert!(validate_markup("<div><p>a<br>b</p><img src=x /></div>").is_ok());
    }

    #[test]
    fn test_validate_unclosed() {
        let err = validate_markup("<div><p>a</p>").unwrap_err();
        assert!(matches!(err, PreviewError::ParseError { line: 1, column: 1, .. }));
    }

    #[test]
    fn test_validate_mismatched() {
        let err = validate_markup("<div>\n<span></div>").unwrap_err();
        match err {
            PreviewError::ParseError { line, detail, .. } => {
                assert_eq!(line, 2);
                assert!(detail.contains("expected </span>"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
