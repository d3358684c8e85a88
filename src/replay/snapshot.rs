//! Masked DOM snapshot serialization.
//!
//! The initial snapshot serializes the whole document tree.  Sensitive
//! attribute values are replaced with the masked literal; elements matching
//! the sensitive selector set (plus any configured blocked selectors) keep
//! their shell but have the entire subtree replaced by one masked text
//! node.

use lookout_protocol::{DomNode, DomSnapshot, NodePath};

use crate::host::Page;
use crate::redact::MASKED;

/// Attribute names whose values are always masked.
const SENSITIVE_ATTRS: [&str; 3] = ["data-secret", "data-token", "data-api-key"];

/// Fixed selector set for subtree masking.
const SENSITIVE_SELECTORS: [&str; 7] = [
    "input[type=password]",
    "input[type=email]",
    "input[type=tel]",
    "[data-sensitive]",
    ".password",
    ".credit-card",
    ".sensitive",
];

/// Minimal selector matcher: `tag`, `#id`, `.class`, `[attr]`,
/// `[attr=value]`, and a tag combined with one suffix
/// (e.g. `input[type=password]`).
pub fn matches_selector(node: &DomNode, selector: &str) -> bool {
    let DomNode::Element { tag_name, attributes, .. } = node else {
        return false;
    };

    let selector = selector.trim();
    let suffix_start = selector
        .find(['#', '.', '['])
        .unwrap_or(selector.len());
    let (tag_part, suffix) = selector.split_at(suffix_start);

    if !tag_part.is_empty() && !tag_part.eq_ignore_ascii_case(tag_name) {
        return false;
    }

    match suffix.chars().next() {
        None => !tag_part.is_empty(),
        Some('#') => attributes.get("id").map(String::as_str) == Some(&suffix[1..]),
        Some('.') => attributes
            .get("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == &suffix[1..])),
        Some('[') => {
            let body = suffix.trim_start_matches('[').trim_end_matches(']');
            match body.split_once('=') {
                Some((attr, value)) => {
                    let value = value.trim_matches(['"', '\'']);
                    attributes.get(attr).map(String::as_str) == Some(value)
                }
                None => attributes.contains_key(body),
            }
        }
        Some(_) => false,
    }
}

fn is_sensitive_element(node: &DomNode, blocked: &[String]) -> bool {
    SENSITIVE_SELECTORS.iter().any(|s| matches_selector(node, s))
        || blocked.iter().any(|s| matches_selector(node, s))
}

/// Serialize a tree with masking applied.
///
/// Idempotent: masking an already-masked tree changes nothing.
pub fn mask_tree(node: &DomNode, blocked: &[String]) -> DomNode {
    match node {
        DomNode::Text { text_content } => DomNode::Text {
            text_content: text_content.clone(),
        },
        DomNode::Element { tag_name, attributes, children } => {
            let masked_attrs = attributes
                .iter()
                .map(|(k, v)| {
                    if SENSITIVE_ATTRS.contains(&k.as_str()) {
                        (k.clone(), MASKED.to_owned())
                    } else {
                        (k.clone(), v.clone())
                    }
                })
                .collect();

            if is_sensitive_element(node, blocked) {
                return DomNode::Element {
                    tag_name: tag_name.clone(),
                    attributes: masked_attrs,
                    children: vec![DomNode::text(MASKED)],
                };
            }

            DomNode::Element {
                tag_name: tag_name.clone(),
                attributes: masked_attrs,
                children: children.iter().map(|c| mask_tree(c, blocked)).collect(),
            }
        }
    }
}

/// Build the full snapshot record body for the current document.
pub fn snapshot_document(page: &Page, blocked: &[String]) -> DomSnapshot {
    DomSnapshot {
        full_snapshot: true,
        node: mask_tree(&page.document_root(), blocked),
        viewport: page.viewport(),
        url: page.url(),
        doctype: page.doctype(),
    }
}

/// Paths of all `<img>` and `<video>` elements, for intersection tracking.
pub fn media_paths(root: &DomNode) -> Vec<NodePath> {
    let mut paths = Vec::new();
    walk_media(root, &mut Vec::new(), &mut paths);
    paths
}

fn walk_media(node: &DomNode, current: &mut Vec<usize>, out: &mut Vec<NodePath>) {
    if matches!(node.tag(), Some("img") | Some("video")) {
        out.push(current.clone());
    }
    if let DomNode::Element { children, .. } = node {
        for (idx, child) in children.iter().enumerate() {
            current.push(idx);
            walk_media(child, current, out);
            current.pop();
        }
    }
}
