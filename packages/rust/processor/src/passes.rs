//! Rewrite passes applied to a parsed fragment.
//!
//! Each pass walks the scraper tree and edits it in place. The pipeline runs
//! them in a fixed order: theme, scripts, data binding, responsive tagging.

use std::collections::BTreeMap;

use ego_tree::NodeId;
use html5ever::{LocalName, Namespace, QualName};
use scraper::node::{Element, Text};
use scraper::{Html, Node, StrTendril};
use serde_json::Value;
use tracing::debug;

use fragmentsync_shared::Theme;

/// Marker class added to every element that carries a `class` attribute.
pub const RESPONSIVE_MARKER: &str = "builder-responsive";

/// Attribute naming the binding key of an element.
pub const BINDING_ATTR: &str = "data-builder-key";

/// Attribute receiving serialized non-string binding values.
pub const BINDING_VALUE_ATTR: &str = "data-builder-value";

/// Attribute tagging a rebuilt script node with its execution order.
pub const SCRIPT_EXEC_ATTR: &str = "data-fragment-exec";

/// Host colour tokens re-exported to fragment CSS as `--fragment-<token>`.
const THEME_TOKENS: [&str; 10] = [
    "primary",
    "primary-foreground",
    "secondary",
    "background",
    "foreground",
    "muted",
    "muted-foreground",
    "accent",
    "border",
    "ring",
];

/// Elements that never have content.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

// ---------------------------------------------------------------------------
// Tree helpers
// ---------------------------------------------------------------------------

/// Element nodes matching `pred`, in document order.
fn element_ids(doc: &Html, pred: impl Fn(&Element) -> bool) -> Vec<NodeId> {
    doc.tree
        .root()
        .descendants()
        .filter(|node| node.value().as_element().is_some_and(&pred))
        .map(|node| node.id())
        .collect()
}

/// Run `f` on the element at `id`. `None` if the node is not an element.
fn with_element<R>(doc: &mut Html, id: NodeId, f: impl FnOnce(&mut Element) -> R) -> Option<R> {
    let mut node = doc.tree.get_mut(id)?;
    match node.value() {
        Node::Element(el) => Some(f(el)),
        _ => None,
    }
}

fn attr_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(""), LocalName::from(local))
}

fn set_attr(el: &mut Element, name: &str, value: impl Into<String>) {
    el.attrs
        .insert(attr_name(name), StrTendril::from(value.into()));
}

/// Concatenated text children of a node.
fn text_content(doc: &Html, id: NodeId) -> String {
    doc.tree
        .get(id)
        .map(|node| {
            node.children()
                .filter_map(|child| child.value().as_text().map(|t| String::from(&**t)))
                .collect()
        })
        .unwrap_or_default()
}

/// Drop every child of `id` and give it a single text child.
fn replace_children_with_text(doc: &mut Html, id: NodeId, text: &str) {
    let children: Vec<NodeId> = doc
        .tree
        .get(id)
        .map(|node| node.children().map(|c| c.id()).collect())
        .unwrap_or_default();
    for child in children {
        if let Some(mut node) = doc.tree.get_mut(child) {
            node.detach();
        }
    }
    if let Some(mut node) = doc.tree.get_mut(id) {
        node.append(Node::Text(Text {
            text: StrTendril::from(text.to_string()),
        }));
    }
}

// ---------------------------------------------------------------------------
// Pass 1: Theme variables
// ---------------------------------------------------------------------------

/// The declaration block prepended to every `<style>` body.
pub fn theme_block(theme: Theme) -> String {
    let mut block = format!(":root{{color-scheme:{theme};");
    for token in THEME_TOKENS {
        block.push_str(&format!("--fragment-{token}:hsl(var(--{token}));"));
    }
    block.push('}');
    block
}

pub(crate) fn inject_theme(doc: &mut Html, theme: Theme) {
    let block = theme_block(theme);
    for id in element_ids(doc, |el| el.name() == "style") {
        let body = format!("{block}{}", text_content(doc, id));
        replace_children_with_text(doc, id, &body);
    }
}

// ---------------------------------------------------------------------------
// Pass 2: Script re-execution
// ---------------------------------------------------------------------------

/// Rebuild every `<script>` as a fresh node with the same text content.
///
/// Original attributes (including `src` and `type`) are dropped. Returns the
/// script bodies in document order.
pub(crate) fn rebuild_scripts(doc: &mut Html) -> Vec<String> {
    let mut scripts = Vec::new();

    for id in element_ids(doc, |el| el.name() == "script") {
        let body = text_content(doc, id);
        let order = scripts.len();

        with_element(doc, id, |el| {
            if let Some(src) = el.attr("src") {
                debug!(src, "dropping src from rebuilt script");
            }
            el.attrs.clear();
            set_attr(el, SCRIPT_EXEC_ATTR, order.to_string());
        });

        scripts.push(body);
    }

    scripts
}

// ---------------------------------------------------------------------------
// Pass 3: Data binding
// ---------------------------------------------------------------------------

/// Apply `bindings` to elements carrying [`BINDING_ATTR`].
///
/// String values replace the element's content. Anything else is serialized
/// into [`BINDING_VALUE_ATTR`]. Void elements always get the attribute.
pub(crate) fn bind_data(doc: &mut Html, bindings: &BTreeMap<String, Value>) {
    if bindings.is_empty() {
        return;
    }

    for id in element_ids(doc, |el| el.attr(BINDING_ATTR).is_some()) {
        let binding = with_element(doc, id, |el| {
            let value = el.attr(BINDING_ATTR).and_then(|key| bindings.get(key))?;
            Some((value, VOID_ELEMENTS.contains(&el.name())))
        })
        .flatten();
        let Some((value, void)) = binding else {
            continue;
        };

        match value {
            Value::String(text) if !void => replace_children_with_text(doc, id, text),
            Value::String(text) => {
                with_element(doc, id, |el| set_attr(el, BINDING_VALUE_ATTR, text.as_str()));
            }
            other => {
                with_element(doc, id, |el| set_attr(el, BINDING_VALUE_ATTR, other.to_string()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Pass 4: Responsive tagging
// ---------------------------------------------------------------------------

/// Prepend [`RESPONSIVE_MARKER`] to every `class` attribute, keeping the original classes.
pub(crate) fn tag_responsive(doc: &mut Html) {
    for id in element_ids(doc, |el| el.attr("class").is_some()) {
        with_element(doc, id, |el| {
            let Some(classes) = el.attr("class") else {
                return;
            };
            if classes.split_whitespace().any(|c| c == RESPONSIVE_MARKER) {
                return;
            }

            let trimmed = classes.trim();
            let tagged = if trimmed.is_empty() {
                RESPONSIVE_MARKER.to_string()
            } else {
                format!("{RESPONSIVE_MARKER} {trimmed}")
            };
            set_attr(el, "class", tagged);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(html: &str, pass: impl FnOnce(&mut Html)) -> String {
        let mut doc = Html::parse_fragment(html);
        pass(&mut doc);
        doc.root_element().inner_html()
    }

    #[test]
    fn theme_block_lists_host_tokens() {
        let block = theme_block(Theme::Dark);
        assert!(block.starts_with(":root{color-scheme:dark;"));
        assert!(block.contains("--fragment-primary:hsl(var(--primary));"));
        assert!(block.ends_with('}'));
    }

    #[test]
    fn inject_theme_only_touches_style() {
        let out = run(
            "<style>h1{color:red}</style><script>var s='h1{}'</script>",
            |d| inject_theme(d, Theme::Light),
        );
        let block = theme_block(Theme::Light);
        assert!(out.contains(&format!("<style>{block}h1{{color:red}}</style>")));
        assert!(out.contains("var s='h1{}'"));
        assert_eq!(out.matches(":root{").count(), 1);
    }

    #[test]
    fn inject_theme_fills_empty_style() {
        let out = run("<style></style>", |d| inject_theme(d, Theme::Dark));
        assert_eq!(out, format!("<style>{}</style>", theme_block(Theme::Dark)));
    }

    #[test]
    fn rebuild_scripts_drops_attributes_and_numbers_nodes() {
        let mut doc = Html::parse_fragment(
            r#"<script type="module" defer>one()</script><p>x</p><script src="/a.js"></script>"#,
        );
        let scripts = rebuild_scripts(&mut doc);
        let out = doc.root_element().inner_html();

        assert_eq!(scripts, vec!["one()".to_string(), String::new()]);
        assert!(out.starts_with(r#"<script data-fragment-exec="0">one()</script>"#));
        assert!(out.contains(r#"<script data-fragment-exec="1"></script>"#));
        assert!(!out.contains("type=\"module\""));
        assert!(!out.contains("src="));
    }

    #[test]
    fn bind_string_replaces_content() {
        let bindings = BTreeMap::from([("cta-primary".to_string(), json!("Get <Started>"))]);
        let out = run(
            r#"<div data-builder-key="cta-primary"><div>old</div><span>old</span></div><p>keep</p>"#,
            |d| bind_data(d, &bindings),
        );
        assert_eq!(
            out,
            r#"<div data-builder-key="cta-primary">Get &lt;Started&gt;</div><p>keep</p>"#
        );
    }

    #[test]
    fn bind_non_string_sets_value_attribute() {
        let bindings = BTreeMap::from([
            ("user".to_string(), json!({"id": "u1", "plan": "pro"})),
            ("current-timestamp".to_string(), json!(1700000000000_i64)),
        ]);
        let out = run(
            r#"<div data-builder-key="user">x</div><input data-builder-key="current-timestamp">"#,
            |d| bind_data(d, &bindings),
        );
        assert!(out.contains(
            r#"data-builder-value="{&quot;id&quot;:&quot;u1&quot;,&quot;plan&quot;:&quot;pro&quot;}">x</div>"#
        ));
        assert!(out.contains(r#"data-builder-value="1700000000000">"#));
    }

    #[test]
    fn bind_string_on_void_element_uses_attribute() {
        let bindings = BTreeMap::from([("name".to_string(), json!("Ada"))]);
        let out = run(r#"<input data-builder-key="name" />"#, |d| {
            bind_data(d, &bindings)
        });
        assert_eq!(out, r#"<input data-builder-key="name" data-builder-value="Ada">"#);
    }

    #[test]
    fn bind_ignores_unknown_keys() {
        let bindings = BTreeMap::from([("other".to_string(), json!("x"))]);
        let html = r#"<span data-builder-key="cta">Default</span>"#;
        assert_eq!(run(html, |d| bind_data(d, &bindings)), html);
    }

    #[test]
    fn responsive_marker_prepended_once() {
        let out = run(
            r#"<div class="grid  gap-4"><p class="builder-responsive lead">x</p><span>y</span><i class="">z</i></div>"#,
            tag_responsive,
        );
        assert_eq!(
            out,
            r#"<div class="builder-responsive grid  gap-4"><p class="builder-responsive lead">x</p><span>y</span><i class="builder-responsive">z</i></div>"#
        );
    }

    #[test]
    fn responsive_marker_keeps_attribute_order() {
        let out = run(r#"<a href="/x" class="btn" id="go">Go</a>"#, tag_responsive);
        assert_eq!(
            out,
            r#"<a href="/x" class="builder-responsive btn" id="go">Go</a>"#
        );
    }
}
