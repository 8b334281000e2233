//! Content processor: rewrites fetched HTML fragments for the host page.
//!
//! [`Processor::process`] is a pure transform. It:
//! 1. Parses the fragment with scraper (unterminated `<script>`/`<style>` blocks are rejected)
//! 2. Prepends theme variable declarations to every `<style>` body
//! 3. Rebuilds `<script>` nodes so the host re-executes them
//! 4. Applies data bindings (`data-builder-key`)
//! 5. Adds the responsive marker class to every `class` attribute
//!
//! Processed output can run arbitrary script. The processor therefore only
//! accepts a [`TrustedFragment`], which call sites construct explicitly for
//! first-party content sources.

mod passes;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::{debug, instrument};

use fragmentsync_shared::{FragmentSyncError, Result, Theme};

pub use passes::{
    BINDING_ATTR, BINDING_VALUE_ATTR, RESPONSIVE_MARKER, SCRIPT_EXEC_ATTR, theme_block,
};

/// Data-binding dictionary: binding key to live value.
pub type Bindings = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Trusted input
// ---------------------------------------------------------------------------

/// Fragment HTML from a source treated as first-party code.
///
/// There is deliberately no `From<String>`: constructing one is an explicit
/// statement that the source is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedFragment(String);

impl TrustedFragment {
    /// Wrap HTML served from the site's own content path.
    pub fn from_first_party(html: impl Into<String>) -> Self {
        Self(html.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Values the processor injects into fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessContext {
    /// Colour scheme written into the theme block.
    pub theme: Theme,
    /// Live values for `data-builder-key` elements.
    pub bindings: Bindings,
}

/// Result of processing one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFragment {
    pub component: String,
    /// Rewritten HTML, ready to be placed in the page.
    pub html: String,
    /// Bodies of the rebuilt script nodes, in execution order.
    pub scripts: Vec<String>,
}

/// Cheaply clonable fragment rewriter.
#[derive(Debug, Clone, Default)]
pub struct Processor {
    ctx: Arc<ProcessContext>,
}

impl Processor {
    pub fn new(ctx: ProcessContext) -> Self {
        Self { ctx: Arc::new(ctx) }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.ctx
    }

    /// A processor with the same theme and new bindings.
    pub fn with_bindings(&self, bindings: Bindings) -> Self {
        Self::new(ProcessContext {
            theme: self.ctx.theme,
            bindings,
        })
    }

    /// Rewrite a fragment for `component`.
    #[instrument(skip(self, fragment), fields(len = fragment.as_str().len()))]
    pub fn process(&self, fragment: &TrustedFragment, component: &str) -> Result<ProcessedFragment> {
        if let Some(tag) = unterminated_raw_text(fragment.as_str()) {
            return Err(FragmentSyncError::processing(
                component,
                format!("unterminated <{tag}> block"),
            ));
        }

        let mut doc = Html::parse_fragment(fragment.as_str());

        passes::inject_theme(&mut doc, self.ctx.theme);
        let scripts = passes::rebuild_scripts(&mut doc);
        passes::bind_data(&mut doc, &self.ctx.bindings);
        passes::tag_responsive(&mut doc);

        let html = doc.root_element().inner_html();

        debug!(
            scripts = scripts.len(),
            out_len = html.len(),
            "fragment processed"
        );

        Ok(ProcessedFragment {
            component: component.to_string(),
            html,
            scripts,
        })
    }
}

/// First `<script>` or `<style>` opened without a closing tag.
///
/// The parser silently runs such a block to the end of input. Comments and
/// the text-only `<textarea>`/`<title>` elements are skipped over.
fn unterminated_raw_text(html: &str) -> Option<&'static str> {
    static OPEN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)<!--|<(script|style|textarea|title)(?:[\s/][^>]*)?>").expect("valid regex")
    });
    static CLOSE: LazyLock<HashMap<&'static str, Regex>> = LazyLock::new(|| {
        ["script", "style", "textarea", "title"]
            .into_iter()
            .map(|tag| {
                let re = Regex::new(&format!(r"(?i)</{tag}\s*>")).expect("valid regex");
                (tag, re)
            })
            .collect()
    });

    let mut pos = 0;
    while let Some(open) = OPEN.captures_at(html, pos) {
        let Some(whole) = open.get(0) else {
            break;
        };
        let rest = whole.end();

        let Some(name) = open.get(1) else {
            // Comment: resume after its end, or stop if it never ends.
            match html[rest..].find("-->") {
                Some(end) => pos = rest + end + 3,
                None => return None,
            }
            continue;
        };

        let (tag, close) = CLOSE.get_key_value(name.as_str().to_ascii_lowercase().as_str())?;
        match close.find_at(html, rest) {
            Some(end) => pos = end.end(),
            None if *tag == "script" || *tag == "style" => return Some(*tag),
            None => return None,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

/// Structural facts about a fragment, read with a real HTML parser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentSummary {
    /// Distinct binding keys, sorted.
    pub binding_keys: Vec<String>,
    pub script_count: usize,
    pub style_count: usize,
    /// Elements with a `class` attribute.
    pub classed_elements: usize,
    /// Elements with a `class` attribute but without the responsive marker.
    pub unmarked_elements: usize,
}

/// Summarize a (raw or processed) fragment.
pub fn summarize(html: &str) -> FragmentSummary {
    static BINDING_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("[data-builder-key]").expect("valid selector"));
    static SCRIPT_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("script").expect("valid selector"));
    static STYLE_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("style").expect("valid selector"));
    static CLASSED_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("[class]").expect("valid selector"));

    let doc = Html::parse_fragment(html);

    let mut binding_keys: Vec<String> = doc
        .select(&BINDING_SEL)
        .filter_map(|el| el.value().attr(BINDING_ATTR).map(String::from))
        .collect();
    binding_keys.sort();
    binding_keys.dedup();

    let classed: Vec<_> = doc.select(&CLASSED_SEL).collect();
    let unmarked_elements = classed
        .iter()
        .filter(|el| !el.value().classes().any(|c| c == RESPONSIVE_MARKER))
        .count();

    FragmentSummary {
        binding_keys,
        script_count: doc.select(&SCRIPT_SEL).count(),
        style_count: doc.select(&STYLE_SEL).count(),
        classed_elements: classed.len(),
        unmarked_elements,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn processor() -> Processor {
        Processor::new(ProcessContext {
            theme: Theme::Light,
            bindings: Bindings::from([
                ("cta-primary".to_string(), json!("Get Started Free")),
                ("user".to_string(), Value::Null),
            ]),
        })
    }

    fn process(html: &str) -> ProcessedFragment {
        processor()
            .process(&TrustedFragment::from_first_party(html), "hero")
            .expect("process")
    }

    #[test]
    fn theme_block_precedes_original_rule() {
        let out = process("<style>body{color:#000}</style>");
        let block_at = out.html.find(":root{").expect("theme block present");
        let rule_at = out.html.find("body{color:#000}").expect("original rule kept");
        assert!(block_at < rule_at);
        assert!(out.html.contains(&theme_block(Theme::Light)));
    }

    #[test]
    fn classes_preserved_and_marker_added() {
        let out = process(
            r#"<section class="hero dark"><h1 class="title">Hi</h1><a class='btn btn-primary' href="/x">Go</a></section>"#,
        );
        assert!(out.html.contains(r#"class="builder-responsive hero dark""#));
        assert!(out.html.contains(r#"class="builder-responsive title""#));
        assert!(out.html.contains(r#"class="builder-responsive btn btn-primary""#));

        let summary = summarize(&out.html);
        assert_eq!(summary.classed_elements, 3);
        assert_eq!(summary.unmarked_elements, 0);
    }

    #[test]
    fn plain_paragraph_passes_through() {
        let out = process("<p>Hi</p>");
        assert_eq!(out.html, "<p>Hi</p>");
        assert!(out.scripts.is_empty());
        assert_eq!(out.component, "hero");
    }

    #[test]
    fn scripts_collected_in_order() {
        let out = process(
            r#"<div class="x"><script>window.a = 1;</script></div><script type="text/javascript">window.b = 2;</script>"#,
        );
        assert_eq!(out.scripts, vec!["window.a = 1;", "window.b = 2;"]);
        assert_eq!(summarize(&out.html).script_count, 2);
        assert!(out.html.contains(r#"<script data-fragment-exec="1">window.b = 2;</script>"#));
    }

    #[test]
    fn bindings_applied() {
        let out = process(
            r#"<div data-builder-key="cta-primary">placeholder</div><div data-builder-key="user"></div>"#,
        );
        assert!(out.html.contains(">Get Started Free</div>"));
        assert!(out.html.contains(r#"data-builder-value="null""#));
    }

    #[test]
    fn malformed_fragment_is_processing_error() {
        let err = processor()
            .process(
                &TrustedFragment::from_first_party("<p>ok</p><style>p{color:red}"),
                "pricing",
            )
            .unwrap_err();
        match err {
            FragmentSyncError::Processing { component, message } => {
                assert_eq!(component, "pricing");
                assert!(message.contains("style"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unterminated_script_is_rejected() {
        let err = processor()
            .process(
                &TrustedFragment::from_first_party(r#"<div class="a"></div><SCRIPT type="x">run()"#),
                "hero",
            )
            .unwrap_err();
        assert!(err.to_string().contains("script"));
    }

    #[test]
    fn raw_text_inside_textarea_or_comment_is_not_a_block() {
        assert_eq!(unterminated_raw_text("<textarea><style></textarea><p>x</p>"), None);
        assert_eq!(unterminated_raw_text("<!-- <script> --><p>x</p>"), None);
        assert_eq!(unterminated_raw_text("<style>a{}</style><style>b{}"), Some("style"));
        assert_eq!(unterminated_raw_text("<scripts>not a script"), None);
    }

    #[test]
    fn textarea_content_is_left_as_text() {
        let input = r#"<textarea name="t"><div class="a">x</div></textarea>"#;
        let out = process(input);
        let doc = Html::parse_fragment(&out.html);
        let textarea = doc
            .select(&Selector::parse("textarea").unwrap())
            .next()
            .expect("textarea kept");
        assert_eq!(textarea.text().collect::<String>(), r#"<div class="a">x</div>"#);
        assert_eq!(summarize(&out.html).classed_elements, 0);
    }

    #[test]
    fn title_content_is_not_rewritten() {
        let out = process(r#"<title><b class="x">T</b></title><p class="y">p</p>"#);
        assert!(!out.html.contains(r#"<b class="builder-responsive x">"#));
        assert!(out.html.contains(r#"<p class="builder-responsive y">p</p>"#));
    }

    #[test]
    fn processing_is_idempotent_for_markup() {
        let once = process(r#"<div class="card"><p>Text</p></div>"#);
        let twice = processor()
            .process(&TrustedFragment::from_first_party(once.html.clone()), "hero")
            .unwrap();
        assert_eq!(once.html, twice.html);
    }

    #[test]
    fn with_bindings_keeps_theme() {
        let dark = Processor::new(ProcessContext {
            theme: Theme::Dark,
            bindings: Bindings::new(),
        });
        let rebound = dark.with_bindings(Bindings::from([("k".to_string(), json!("v"))]));
        assert_eq!(rebound.context().theme, Theme::Dark);
        assert_eq!(rebound.context().bindings.len(), 1);
    }

    #[test]
    fn summarize_reports_binding_keys() {
        let summary = summarize(
            r#"<div data-builder-key="b"></div><span data-builder-key="a"></span><i data-builder-key="a"></i><style>p{}</style>"#,
        );
        assert_eq!(summary.binding_keys, vec!["a", "b"]);
        assert_eq!(summary.style_count, 1);
    }
}
