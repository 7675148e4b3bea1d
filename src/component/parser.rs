use crate::error::{PreviewError, PreviewResult};

/// Maximum element nesting depth in component source.
pub const MAX_NESTING_DEPTH: usize = 64;

/// A parsed component source: optional setup script plus top-level nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSource {
    pub setup: Option<Script>,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub source: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Fragment(Vec<Node>),
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<Attribute>,
    pub children: Vec<Node>,
    pub self_closing: bool,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Literal(String),
    Expr(Expr),
    Flag,
}

/// An embedded `{...}` expression with the byte offset of its first character.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub source: String,
    pub offset: usize,
}

/// Parse component source (JSX-like markup with Luau expressions).
pub fn parse_component(src: &str) -> PreviewResult<ComponentSource> {
    let mut parser = Parser { src, pos: 0 };
    parser.parse_document()
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, offset: usize, detail: impl Into<String>) -> PreviewError {
        PreviewError::parse_at(self.src, offset, detail)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eof(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, s: &str) -> bool {
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn parse_document(&mut self) -> PreviewResult<ComponentSource> {
        let mut setup: Option<Script> = None;
        let mut nodes = Vec::new();

        loop {
            self.skip_ws();
            if self.eof() {
                break;
            }
            if self.at_script_tag() {
                let script = self.parse_script()?;
                if setup.is_some() {
                    return Err(self.error(script.offset, "only one <script> block is allowed"));
                }
                setup = Some(script);
                continue;
            }
            if self.rest().starts_with("{/*") {
                let start = self.pos;
                let expr = self.parse_expression()?;
                if !is_comment(&expr.source) {
                    return Err(self.error(start, "expressions must be inside an element"));
                }
                continue;
            }
            match self.peek() {
                Some('<') => nodes.push(self.parse_element(0)?),
                Some(_) => {
                    return Err(self.error(self.pos, "expected an element"));
                }
                None => break,
            }
        }

        if nodes.is_empty() {
            return Err(self.error(self.src.len(), "component has no elements"));
        }

        Ok(ComponentSource { setup, nodes })
    }

    fn at_script_tag(&self) -> bool {
        let rest = self.rest();
        rest.len() >= 7
            && rest.is_char_boundary(7)
            && rest[..7].eq_ignore_ascii_case("<script")
            && rest[7..]
                .chars()
                .next()
                .is_some_and(|c| c == '>' || c.is_whitespace())
    }

    fn parse_script(&mut self) -> PreviewResult<Script> {
        let start = self.pos;
        let open_end = self.rest().find('>').ok_or_else(|| self.error(start, "unterminated <script> tag"))?;
        self.pos += open_end + 1;
        let body_start = self.pos;
        let close = find_ignore_case(self.rest(), "</script>")
            .ok_or_else(|| self.error(start, "missing </script>"))?;
        let source = self.src[body_start..body_start + close].to_string();
        self.pos = body_start + close + "</script>".len();
        Ok(Script {
            source,
            offset: body_start,
        })
    }

    fn parse_element(&mut self, depth: usize) -> PreviewResult<Node> {
        let start = self.pos;
        if depth >= MAX_NESTING_DEPTH {
            return Err(self.error(
                start,
                format!("maximum nesting depth ({}) exceeded", MAX_NESTING_DEPTH),
            ));
        }
        if !self.eat("<") {
            return Err(self.error(start, "expected '<'"));
        }

        if self.eat(">") {
            let children = self.parse_children(depth, "")?;
            return Ok(Node::Fragment(children));
        }

        if self.peek() == Some('/') {
            return Err(self.error(start, "unexpected closing tag"));
        }

        let tag = self.parse_name();
        if tag.is_empty() {
            return Err(self.error(self.pos, "expected a tag name"));
        }

        let mut attrs = Vec::new();
        loop {
            self.skip_ws();
            let attr_start = self.pos;
            match self.peek() {
                None => return Err(self.error(start, format!("unterminated <{}> tag", tag))),
                Some('>') => {
                    self.bump();
                    break;
                }
                Some('/') => {
                    self.bump();
                    if !self.eat(">") {
                        return Err(self.error(self.pos, "expected '>' after '/'"));
                    }
                    return Ok(Node::Element(Element {
                        tag,
                        attrs,
                        children: Vec::new(),
                        self_closing: true,
                        offset: start,
                    }));
                }
                Some('{') => {
                    return Err(self.error(attr_start, "spread attributes are not supported"));
                }
                Some(_) => {}
            }

            let name = self.parse_name();
            if name.is_empty() {
                return Err(self.error(attr_start, "invalid attribute name"));
            }
            self.skip_ws();
            let value = if self.eat("=") {
                self.skip_ws();
                match self.peek() {
                    Some(q @ ('"' | '\'')) => {
                        self.bump();
                        let body_start = self.pos;
                        let close = self.rest().find(q).ok_or_else(|| {
                            self.error(body_start - 1, format!("unterminated value for '{}'", name))
                        })?;
                        let literal = self.src[body_start..body_start + close].to_string();
                        self.pos = body_start + close + 1;
                        AttrValue::Literal(literal)
                    }
                    Some('{') => {
                        let expr = self.parse_expression()?;
                        if expr.source.trim().is_empty() {
                            return Err(self.error(expr.offset, "empty attribute expression"));
                        }
                        AttrValue::Expr(expr)
                    }
                    _ => {
                        return Err(self.error(
                            self.pos,
                            format!("expected a quoted value or {{expression}} for '{}'", name),
                        ));
                    }
                }
            } else {
                AttrValue::Flag
            };
            attrs.push(Attribute {
                name,
                value,
                offset: attr_start,
            });
        }

        let children = self.parse_children(depth, &tag)?;
        Ok(Node::Element(Element {
            tag,
            attrs,
            children,
            self_closing: false,
            offset: start,
        }))
    }

    /// Parses children up to and including the closing tag for `tag`
    /// (empty tag name closes a fragment).
    fn parse_children(&mut self, depth: usize, tag: &str) -> PreviewResult<Vec<Node>> {
        let mut children = Vec::new();
        let open_label = if tag.is_empty() { "<>".to_string() } else { format!("<{}>", tag) };

        loop {
            if self.eof() {
                return Err(self.error(self.src.len(), format!("unclosed element {}", open_label)));
            }

            if self.rest().starts_with("</") {
                let close_start = self.pos;
                self.pos += 2;
                let name = self.parse_name();
                self.skip_ws();
                if !self.eat(">") {
                    return Err(self.error(self.pos, "expected '>' in closing tag"));
                }
                if name != tag {
                    let found = if name.is_empty() { "</>".to_string() } else { format!("</{}>", name) };
                    let expected = if tag.is_empty() { "</>".to_string() } else { format!("</{}>", tag) };
                    return Err(self.error(
                        close_start,
                        format!("expected {} but found {}", expected, found),
                    ));
                }
                return Ok(children);
            }

            match self.peek() {
                Some('<') => children.push(self.parse_element(depth + 1)?),
                Some('{') => {
                    let expr = self.parse_expression()?;
                    if !expr.source.trim().is_empty() && !is_comment(&expr.source) {
                        children.push(Node::Expr(expr));
                    }
                }
                Some('}') => return Err(self.error(self.pos, "unexpected '}' in text")),
                Some(_) => {
                    let text_start = self.pos;
                    while let Some(ch) = self.peek() {
                        if ch == '<' || ch == '{' || ch == '}' {
                            break;
                        }
                        self.bump();
                    }
                    let text = normalize_text(&self.src[text_start..self.pos]);
                    if !text.is_empty() {
                        children.push(Node::Text(text));
                    }
                }
                None => {}
            }
        }
    }

    fn parse_name(&mut self) -> String {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | ':' | '.') {
                self.bump();
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    /// Parses `{ ... }` with brace balancing; string literals and comments
    /// may contain braces.
    fn parse_expression(&mut self) -> PreviewResult<Expr> {
        let open = self.pos;
        if !self.eat("{") {
            return Err(self.error(open, "expected '{'"));
        }
        let body_start = self.pos;
        let mut depth = 1usize;

        while let Some(ch) = self.bump() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let source = self.src[body_start..self.pos - 1].to_string();
                        return Ok(Expr {
                            source,
                            offset: body_start,
                        });
                    }
                }
                '"' | '\'' | '`' => self.skip_string(ch, open)?,
                '/' if self.peek() == Some('*') => {
                    let end = self
                        .rest()
                        .find("*/")
                        .ok_or_else(|| self.error(open, "unterminated comment in expression"))?;
                    self.pos += end + 2;
                }
                '-' if self.peek() == Some('-') => {
                    let end = self.rest().find('\n').unwrap_or(self.rest().len());
                    self.pos += end;
                }
                _ => {}
            }
        }

        Err(self.error(open, "unterminated expression: missing '}'"))
    }

    fn skip_string(&mut self, quote: char, open: usize) -> PreviewResult<()> {
        while let Some(ch) = self.bump() {
            if ch == '\\' {
                self.bump();
            } else if ch == quote {
                return Ok(());
            } else if ch == '\n' && quote != '`' {
                break;
            }
        }
        Err(self.error(open, "unterminated string in expression"))
    }
}

fn is_comment(expr: &str) -> bool {
    let t = expr.trim();
    t.starts_with("/*") && t.ends_with("*/")
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let lower = haystack.to_ascii_lowercase();
    lower.find(needle)
}

/// JSX whitespace rules: lines are trimmed, blank lines dropped, the rest
/// joined by single spaces. Text on a single line keeps its spacing.
fn normalize_text(raw: &str) -> String {
    if !raw.contains('\n') {
        return raw.to_string();
    }
    let lines: Vec<&str> = raw.lines().collect();
    let last = lines.len().saturating_sub(1);
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let mut l = *line;
            if i != 0 {
                l = l.trim_start();
            }
            if i != last {
                l = l.trim_end();
            }
            l
        })
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
