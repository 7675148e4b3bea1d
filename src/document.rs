//! Standalone preview document for an iframe `srcdoc`.
//! The body carries only sanitized or rendered markup. Documents whose frame
//! reports the terminal signal get one inline script: the bridge that posts
//! `loaded`/`error` to the parent with the channel token.

use crate::sanitize::escape_html;
use std::fmt::Write;

/// Styling runtime referenced from the document head.
pub const DEFAULT_STYLING_RUNTIME: &str = "https://cdn.tailwindcss.com";

/// Sandbox attribute for the frame that displays the document: scripts run,
/// but without same-origin access, forms, popups or top navigation.
pub const SANDBOX_ATTRIBUTES: &str = "allow-scripts";

pub const DEFAULT_TITLE: &str = "Generated UI Preview";

/// Base document styles.
const BASE_STYLES: &str = "html,body{margin:0;min-height:100vh;}#root{min-height:100vh;}";

#[derive(Debug, Clone, Copy)]
pub struct DocumentShell<'a> {
    pub title: &'a str,
    pub styling_runtime: Option<&'a str>,
    /// Adds the bridge script; `None` when the host signals in-process.
    pub bridge: Option<FrameBridge<'a>>,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameBridge<'a> {
    /// Token the bridge script attaches to every message.
    pub channel: &'a str,
    /// Error found while rendering the body; posted instead of `loaded`.
    pub failure: Option<&'a str>,
}

/// Wraps body markup into a complete HTML document.
pub fn build_document(body_html: &str, shell: &DocumentShell<'_>) -> String {
    let mut html = String::with_capacity(body_html.len() + 1024);
    let runtime_tag = shell
        .styling_runtime
        .map(|src| format!("<script src=\"{}\"></script>\n", escape_html(src)))
        .unwrap_or_default();

    // Writing into a String cannot fail.
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<meta http-equiv="Content-Security-Policy" content="{csp}">
{runtime}<title>{title}</title>
<style>{styles}</style>
</head>
<body>
<div id="root">{body}</div>
{bridge}</body>
</html>
"#,
        csp = escape_html(&content_security_policy(shell.styling_runtime)),
        runtime = runtime_tag,
        title = escape_html(shell.title),
        styles = BASE_STYLES,
        body = body_html,
        bridge = shell
            .bridge
            .map(|b| format!("<script>{}</script>\n", bridge_script(&b)))
            .unwrap_or_default(),
    );
    html
}

fn content_security_policy(styling_runtime: Option<&str>) -> String {
    let runtime_origin = styling_runtime.and_then(origin_of).unwrap_or_default();
    let script_src = if runtime_origin.is_empty() {
        "'unsafe-inline'".to_string()
    } else {
        format!("'unsafe-inline' {}", runtime_origin)
    };
    format!(
        "default-src 'none'; script-src {}; style-src 'unsafe-inline'; img-src https: data:; \
         font-src https: data:; media-src https:; connect-src 'none'; form-action 'none'; base-uri 'none'",
        script_src
    )
}

/// `https://cdn.example.com/path` → `https://cdn.example.com`
fn origin_of(url: &str) -> Option<String> {
    let (scheme, rest) = url.split_once("://")?;
    if scheme != "https" && scheme != "http" {
        return None;
    }
    let host = rest.split(['/', '?', '#']).next().filter(|h| !h.is_empty())?;
    Some(format!("{}://{}", scheme, host))
}

/// Posts exactly one terminal message: `loaded` on window load (or the
/// render failure, if there was one), or `error` for the first uncaught
/// error before that.
fn bridge_script(bridge: &FrameBridge<'_>) -> String {
    format!(
        "(function(){{var c={channel},f={failure},done=false;\
function post(m){{if(done)return;done=true;m.channel=c;window.parent.postMessage(m,'*');}}\
window.addEventListener('error',function(e){{post({{type:'error',message:String((e&&e.message)||'Script error.')}});e.preventDefault();}});\
window.addEventListener('load',function(){{post(f===null?{{type:'loaded'}}:{{type:'error',message:f}});}});}})();",
        channel = script_literal(Some(bridge.channel)),
        failure = script_literal(bridge.failure),
    )
}

/// JSON literal that cannot close the surrounding `<script>` element.
fn script_literal(value: Option<&str>) -> String {
    serde_json::to_string(&value)
        .unwrap_or_else(|_| "null".to_string())
        .replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> DocumentShell<'static> {
        DocumentShell {
            title: DEFAULT_TITLE,
            styling_runtime: Some(DEFAULT_STYLING_RUNTIME),
            bridge: Some(FrameBridge {
                channel: "token-1",
                failure: None,
            }),
        }
    }

    #[test]
    fn test_document_structure() {
        let doc = build_document("<div>Hello</div>", &shell());
        assert!(doc.starts_with("<!DOCTYPE html>"));
        assert!(doc.contains("<div id=\"root\"><div>Hello</div></div>"));
        assert!(doc.contains("<script src=\"https://cdn.tailwindcss.com\"></script>"));
        assert!(doc.contains("<title>Generated UI Preview</title>"));
        assert!(doc.contains("var c=\"token-1\",f=null"));
    }

    #[test]
    fn test_in_process_document_has_no_bridge() {
        let doc = build_document(
            "<p>x</p>",
            &DocumentShell {
                bridge: None,
                ..shell()
            },
        );
        assert!(!doc.contains("postMessage"));
        assert!(doc.contains("<div id=\"root\"><p>x</p></div>\n</body>"));
    }

    #[test]
    fn test_failure_is_posted_by_bridge() {
        let doc = build_document(
            "",
            &DocumentShell {
                bridge: Some(FrameBridge {
                    channel: "token-2",
                    failure: Some("boom </script><script>alert(1)"),
                }),
                ..shell()
            },
        );
        assert!(doc.contains("f=\"boom \\u003c/script>\\u003cscript>alert(1)\""));
        assert!(!doc.contains("boom </script>"));
    }

    #[test]
    fn test_csp_allows_only_runtime_origin() {
        let doc = build_document("", &shell());
        assert!(doc.contains("script-src 'unsafe-inline' https://cdn.tailwindcss.com;"));
        assert!(doc.contains("connect-src 'none'"));
    }

    #[test]
    fn test_without_styling_runtime() {
        let doc = build_document(
            "",
            &DocumentShell {
                title: "t",
                styling_runtime: None,
                bridge: None,
            },
        );
        assert!(!doc.contains("<script src="));
    }

    #[test]
    fn test_title_is_escaped() {
        let doc = build_document(
            "",
            &DocumentShell {
                title: "<b>x</b>",
                styling_runtime: None,
                bridge: None,
            },
        );
        assert!(doc.contains("<title>&lt;b&gt;x&lt;/b&gt;</title>"));
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://cdn.tailwindcss.com/3.4?plugins=forms").as_deref(),
            Some("https://cdn.tailwindcss.com")
        );
        assert_eq!(origin_of("javascript:alert(1)"), None);
    }
}
