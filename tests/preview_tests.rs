use mediabyte_preview::{
    check_source, Delivery, Envelope, GeneratedCode, HostId, Preview, PreviewConfig, PreviewError,
    PreviewMode, PreviewStatus, Signal, SignalSource,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::PathBuf;

fn fixture(filename: &str) -> GeneratedCode {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(filename);
    GeneratedCode::new(fs::read_to_string(&path).unwrap())
}

fn config(mode: PreviewMode) -> PreviewConfig {
    PreviewConfig {
        mode,
        load_timeout_ms: 2_000,
        ..PreviewConfig::default()
    }
}

fn component_preview() -> Preview {
    Preview::new(config(PreviewMode::Component)).unwrap()
}

// Markup mode

#[tokio::test]
async fn test_plain_markup_passes_unchanged_and_is_ready() {
    let mut preview = Preview::new(config(PreviewMode::Markup)).unwrap();
    let snap = preview
        .render_and_settle(&GeneratedCode::new("<div>Hello</div>"))
        .await
        .unwrap();
    assert_eq!(snap.status, PreviewStatus::Ready);
    assert_eq!(snap.message, None);
    let document = snap.document.unwrap();
    assert!(document.contains("<div id=\"root\"><div>Hello</div></div>"));
    assert!(document.starts_with("<!DOCTYPE html>"));
}

#[tokio::test]
async fn test_markup_is_sanitized() {
    let mut preview = Preview::new(config(PreviewMode::Markup)).unwrap();
    let snap = preview.render_and_settle(&fixture("landing.html")).await.unwrap();
    assert_eq!(snap.status, PreviewStatus::Ready);
    let document = snap.document.unwrap();
    assert!(document.contains("<h1 class=\"text-4xl font-semibold\">MediaByte</h1>"));
    assert!(!document.contains("javascript:"));
    assert!(!document.contains("onerror"));
    assert!(!document.contains("evil.example"));
    assert!(document.contains("Store, compress and share your media."));
}

#[tokio::test]
async fn test_strict_markup_rejects_unbalanced_tags() {
    let mut preview = Preview::new(PreviewConfig {
        strict_markup: true,
        ..config(PreviewMode::Markup)
    })
    .unwrap();
    let err = preview
        .render(&GeneratedCode::new("<div><span>x</div>"))
        .unwrap_err();
    assert!(err.is_parse_error());
    assert_eq!(preview.status(), Some(PreviewStatus::Error));
    assert_eq!(preview.active_host(), None);
}

// Component mode

#[tokio::test]
async fn test_valid_component_reaches_ready_with_one_signal() {
    let mut preview = component_preview();
    let mut updates = preview.subscribe();
    let host = preview.render(&fixture("pricing-card.jsx")).unwrap();
    let snap = preview.settle().await.unwrap();

    assert_eq!(snap.status, PreviewStatus::Ready);
    let document = snap.document.unwrap();
    assert!(document.contains("3 plans"));
    assert!(document.contains("Pro $12/mo"));
    assert!(document.contains("Comparison unavailable"));
    assert!(!document.contains("onclick"));

    // A second signal from the same host is not applied.
    assert_eq!(
        preview.post(Envelope {
            origin: host,
            signal: Signal::Loaded
        }),
        Delivery::Settled
    );
    assert!(updates.has_changed().unwrap());
    assert_eq!(
        updates.borrow_and_update().as_ref().unwrap().status,
        PreviewStatus::Ready
    );
}

#[tokio::test]
async fn test_throwing_component_reaches_error() {
    let mut preview = component_preview();
    let snap = preview.render_and_settle(&fixture("throws.jsx")).await.unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    let message = snap.message.unwrap();
    assert!(!message.is_empty());
    assert!(message.contains("failed to load widgets"));
    assert!(snap.document.unwrap().contains("role=\"alert\""));
}

#[tokio::test]
async fn test_syntax_error_creates_no_host() {
    let mut preview = component_preview();
    let err = preview.render(&fixture("unclosed.jsx")).unwrap_err();
    match &err {
        PreviewError::ParseError { line, .. } => assert_eq!(*line, 3),
        other => panic!("expected parse error, got {other:?}"),
    }
    assert_eq!(preview.active_host(), None);
    let snap = preview.snapshot().unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    assert!(snap.message.unwrap().contains("line 3"));
    assert_eq!(snap.document, None);
}

#[tokio::test]
async fn test_unterminated_expression_is_parse_failure() {
    let mut preview = component_preview();
    let err = preview.render(&GeneratedCode::new("<div>{")).unwrap_err();
    assert_eq!(
        err,
        PreviewError::ParseError {
            line: 1,
            column: 6,
            detail: "unterminated expression: missing '}'".to_string(),
        }
    );
    assert_eq!(preview.active_host(), None);
    assert_eq!(preview.status(), Some(PreviewStatus::Error));
}

#[tokio::test]
async fn test_rendering_twice_shares_no_state() {
    let code = GeneratedCode::new(
        "<script>counter = (counter or 0) + 1</script>\n<p>render {counter}</p>",
    );
    let mut preview = component_preview();
    for _ in 0..2 {
        let snap = preview.render_and_settle(&code).await.unwrap();
        assert_eq!(snap.status, PreviewStatus::Ready);
        assert!(snap.document.unwrap().contains("<p>render 1</p>"));
    }
}

#[tokio::test]
async fn test_component_wrapper_is_unwrapped() {
    let code = GeneratedCode::new(
        "```jsx\nconst Component = () => {\n  return (\n    <div className=\"bg-black\">Hi</div>\n  );\n};\n```",
    );
    let mut preview = component_preview();
    let snap = preview.render_and_settle(&code).await.unwrap();
    assert_eq!(snap.status, PreviewStatus::Ready);
    assert!(snap
        .document
        .unwrap()
        .contains("<div id=\"root\"><div class=\"bg-black\">Hi</div></div>"));
}

#[tokio::test]
async fn test_sandbox_blocks_dangerous_globals() {
    let mut preview = component_preview();
    let snap = preview
        .render_and_settle(&GeneratedCode::new("<p>{require(\"os\")}</p>"))
        .await
        .unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    assert!(snap.message.unwrap().contains("not available"));
}

#[tokio::test]
async fn test_runaway_script_hits_execution_budget() {
    let mut preview = Preview::new(PreviewConfig {
        execution_budget_ms: 50,
        ..config(PreviewMode::Component)
    })
    .unwrap();
    let snap = preview
        .render_and_settle(&GeneratedCode::new("<script>while true do end</script><p>x</p>"))
        .await
        .unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    assert!(snap.message.unwrap().contains("execution budget"));
}

#[tokio::test]
async fn test_load_timeout_expires_session() {
    let mut preview = Preview::new(PreviewConfig {
        load_timeout_ms: 50,
        execution_budget_ms: 5_000,
        ..config(PreviewMode::Component)
    })
    .unwrap();
    let snap = preview
        .render_and_settle(&GeneratedCode::new("<script>while true do end</script><p>x</p>"))
        .await
        .unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    assert!(snap.message.unwrap().contains("did not finish loading"));
}

// Session replacement

#[tokio::test]
async fn test_stale_signal_never_overwrites_newer_session() {
    let mut preview = component_preview();
    let old = preview.render(&GeneratedCode::new("<p>first</p>")).unwrap();
    let new = preview.render(&GeneratedCode::new("<p>second</p>")).unwrap();
    assert_ne!(old, new);
    assert_eq!(preview.active_host(), Some(new));

    let snap = preview.settle().await.unwrap();
    assert_eq!(snap.status, PreviewStatus::Ready);

    // delayed error from the replaced host
    let delivery = preview.post(Envelope {
        origin: old,
        signal: Signal::error("late failure"),
    });
    assert_eq!(delivery, Delivery::Stale);
    let snap = preview.snapshot().unwrap();
    assert_eq!(snap.status, PreviewStatus::Ready);
    assert!(snap.document.unwrap().contains("<p>second</p>"));
}

#[tokio::test]
async fn test_stale_signal_while_new_session_loading() {
    let mut preview = component_preview();
    let old = preview.render(&GeneratedCode::new("<p>first</p>")).unwrap();
    preview
        .render(&GeneratedCode::new("<script>while true do end</script><p>x</p>"))
        .unwrap();
    assert_eq!(
        preview.post(Envelope {
            origin: old,
            signal: Signal::Loaded
        }),
        Delivery::Stale
    );
    assert_eq!(preview.status(), Some(PreviewStatus::Loading));
}

// Wire messages

#[tokio::test]
async fn test_wire_message_from_active_host() {
    let mut preview = Preview::new(PreviewConfig {
        execution_budget_ms: 5_000,
        ..config(PreviewMode::Component)
    })
    .unwrap();
    let host = preview
        .render(&GeneratedCode::new("<script>while true do end</script><p>x</p>"))
        .unwrap();
    let raw = format!(
        r#"{{"type":"error","message":"","channel":"{}"}}"#,
        host.channel_token()
    );
    assert_eq!(
        preview.post_wire(&raw).unwrap(),
        Delivery::Applied(PreviewStatus::Error)
    );
    assert_eq!(
        preview.snapshot().unwrap().message.as_deref(),
        Some("Unknown runtime error")
    );
}

#[tokio::test]
async fn test_wire_message_with_foreign_token_is_untrusted() {
    let mut preview = Preview::new(config(PreviewMode::Markup)).unwrap();
    preview.render(&GeneratedCode::new("<p>x</p>")).unwrap();
    let raw = format!(
        r#"{{"type":"loaded","channel":"{}"}}"#,
        HostId::new(1).channel_token()
    );
    assert!(matches!(
        preview.post_wire(&raw),
        Err(PreviewError::UntrustedMessage { .. })
    ));
}

#[tokio::test]
async fn test_wire_message_from_replaced_host_is_stale() {
    let mut preview = Preview::new(config(PreviewMode::Markup)).unwrap();
    let old = preview.render(&GeneratedCode::new("<p>old</p>")).unwrap();
    preview.render(&GeneratedCode::new("<p>new</p>")).unwrap();
    let raw = format!(r#"{{"type":"loaded","channel":"{}"}}"#, old.channel_token());
    assert_eq!(preview.post_wire(&raw).unwrap(), Delivery::Stale);
}

// Frame-driven signalling

fn frame_preview(mode: PreviewMode) -> Preview {
    Preview::new(PreviewConfig {
        signal_source: SignalSource::Frame,
        ..config(mode)
    })
    .unwrap()
}

#[tokio::test]
async fn test_in_process_markup_host_has_single_signal_source() {
    let mut preview = Preview::new(config(PreviewMode::Markup)).unwrap();
    let snap = preview
        .render_and_settle(&GeneratedCode::new("<p>x</p>"))
        .await
        .unwrap();
    assert_eq!(snap.status, PreviewStatus::Ready);
    assert!(!snap.document.unwrap().contains("postMessage"));
}

#[tokio::test]
async fn test_frame_error_settles_markup_session() {
    let mut preview = frame_preview(PreviewMode::Markup);
    let host = preview.render(&GeneratedCode::new("<p>x</p>")).unwrap();
    let document = preview.document().await.unwrap();
    assert!(document.contains(&host.channel_token()));
    assert_eq!(preview.status(), Some(PreviewStatus::Loading));

    // the frame's global error handler fires before load
    let raw = format!(
        r#"{{"type":"error","message":"Uncaught TypeError: x is undefined","channel":"{}"}}"#,
        host.channel_token()
    );
    assert!(preview.wire_sender().send(raw));
    let snap = preview.settle().await.unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    assert_eq!(
        snap.message.as_deref(),
        Some("Uncaught TypeError: x is undefined")
    );
    assert_eq!(snap.document, Some(document));
}

#[tokio::test]
async fn test_frame_loaded_settles_component_session() {
    let mut preview = frame_preview(PreviewMode::Component);
    let host = preview.render(&fixture("pricing-card.jsx")).unwrap();
    preview.document().await.unwrap();

    let wire = preview.wire_sender();
    assert!(wire.send(format!(
        r#"{{"type":"loaded","channel":"{}"}}"#,
        HostId::new(1).channel_token()
    )));
    assert!(wire.send(format!(
        r#"{{"type":"loaded","channel":"{}"}}"#,
        host.channel_token()
    )));
    let snap = preview.settle().await.unwrap();
    assert_eq!(snap.status, PreviewStatus::Ready);
    assert!(snap.document.unwrap().contains("Pro $12/mo"));
}

#[tokio::test]
async fn test_frame_that_never_reports_times_out() {
    let mut preview = Preview::new(PreviewConfig {
        signal_source: SignalSource::Frame,
        load_timeout_ms: 50,
        ..config(PreviewMode::Markup)
    })
    .unwrap();
    let snap = preview
        .render_and_settle(&GeneratedCode::new("<p>x</p>"))
        .await
        .unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    assert!(snap.message.unwrap().contains("did not finish loading"));
}

// Limits

#[tokio::test]
async fn test_rendered_markup_is_capped() {
    let mut preview = Preview::new(PreviewConfig {
        max_document_bytes: 16 * 1024,
        ..config(PreviewMode::Component)
    })
    .unwrap();
    let code = GeneratedCode::new(
        "<script>\nlocal node = string.rep(\"x\", 1000)\nfor level = 1, 6 do\n  local wide = {}\n  for i = 1, 10 do wide[i] = node end\n  node = wide\nend\npage = node\n</script>\n<div>{page}</div>",
    );
    let snap = preview.render_and_settle(&code).await.unwrap();
    assert_eq!(snap.status, PreviewStatus::Error);
    assert!(snap.message.unwrap().contains("rendered markup exceeds limit of 16384"));
    assert!(snap.document.unwrap().len() < 16 * 1024);
}

#[tokio::test]
async fn test_unmount_publishes_detached_state() {
    let mut preview = Preview::new(config(PreviewMode::Markup)).unwrap();
    let updates = preview.subscribe();
    preview.render_and_settle(&GeneratedCode::new("<p>x</p>")).await;
    preview.unmount();
    assert_eq!(*updates.borrow(), None);
}

// Validation helper

#[test]
fn test_check_source() {
    assert!(check_source("<div>Hello</div>", PreviewMode::Markup).is_ok());
    assert!(check_source(fixture("pricing-card.jsx").as_str(), PreviewMode::Component).is_ok());
    assert!(check_source("<div>{", PreviewMode::Component).is_err());
    assert!(check_source("<Chart data={1} />", PreviewMode::Component).is_err());
}

#[test]
fn test_preview_requires_runtime() {
    let result = Preview::new(PreviewConfig::default());
    assert!(matches!(result, Err(PreviewError::Config(_))));
}
