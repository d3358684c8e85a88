// lookout-protocol: Event model and wire types for the lookout SDK.
//
// Every captured record is an envelope (shared header fields) plus a payload
// discriminated by a top-level `type` field.  Field names follow the frozen
// collector wire format: camelCase inside events, snake_case on the batch
// body itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Device/browser context captured once per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub platform: String,
    pub language: String,
    pub timezone: String,
    /// Effective connection type if the host exposes one (e.g. "4g").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

/// Common header carried by every captured record.
///
/// `session_id` is immutable for the life of one browsing session; changing
/// `user_id` does not rotate it.  `event_id` is unique within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_id: String,
    pub app_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Wall-clock milliseconds at capture.
    pub timestamp: i64,
    pub page_url: String,
    pub user_agent: String,
    pub device_info: DeviceInfo,
}

// ---------------------------------------------------------------------------
// Error payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Javascript,
    Network,
    Promise,
    Custom,
}

/// Totally ordered: `Low < Medium < High < Critical`.
///
/// The ordering backs the sampler override ("severity >= high always
/// passes"), so variant order is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error_type: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    /// Stable short hash of `(message, fileName, line, column)`.
    /// Duplicate fingerprints within a session are dropped at capture.
    pub fingerprint: String,
}

// ---------------------------------------------------------------------------
// Performance payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fid: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cls: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<f64>,
    pub page_load_time: f64,
    pub dom_ready_time: f64,
    pub resource_load_time: f64,
    pub custom_metrics: BTreeMap<String, f64>,
}

/// One resource-timing entry, trimmed to the fields the collector stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    pub name: String,
    pub entry_type: String,
    pub start_time: f64,
    pub duration: f64,
    pub transfer_size: u64,
    pub encoded_body_size: u64,
    pub decoded_body_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformancePayload {
    pub metrics: PerformanceMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceTiming>>,
}

// ---------------------------------------------------------------------------
// Behavior payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BehaviorAction {
    Click,
    Scroll,
    Input,
    Change,
    Navigate,
    Focus,
    Blur,
    Visibility,
    Resize,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorPayload {
    pub action: BehaviorAction,
    /// CSS-path string identifying the target element.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Action-specific value.  Sensitive inputs carry the literal
    /// `"[MASKED]"`; non-sensitive inputs carry a length/emptiness summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Replay payload
// ---------------------------------------------------------------------------

/// A serialized DOM node.
///
/// Shared vocabulary of the replay full snapshot, mutation deltas, and the
/// path rule: a node is addressed by the child-index path from the document
/// root (`NodePath`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DomNode {
    Element {
        #[serde(rename = "tagName")]
        tag_name: String,
        attributes: BTreeMap<String, String>,
        children: Vec<DomNode>,
    },
    Text {
        #[serde(rename = "textContent")]
        text_content: String,
    },
}

/// Root-to-leaf child-index path addressing a node inside a `DomNode` tree.
pub type NodePath = Vec<usize>;

impl DomNode {
    pub fn element(tag: &str) -> DomNode {
        DomNode::Element {
            tag_name: tag.to_owned(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn text(content: &str) -> DomNode {
        DomNode::Text {
            text_content: content.to_owned(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> DomNode {
        if let DomNode::Element { attributes, .. } = &mut self {
            attributes.insert(key.to_owned(), value.to_owned());
        }
        self
    }

    pub fn with_children(mut self, nodes: Vec<DomNode>) -> DomNode {
        if let DomNode::Element { children, .. } = &mut self {
            *children = nodes;
        }
        self
    }

    /// Resolve a child-index path against this node.
    ///
    /// An empty path resolves to `self`.  Returns `None` when any index is
    /// out of range or descends through a text node.
    pub fn node_at(&self, path: &[usize]) -> Option<&DomNode> {
        let mut current = self;
        for &idx in path {
            match current {
                DomNode::Element { children, .. } => current = children.get(idx)?,
                DomNode::Text { .. } => return None,
            }
        }
        Some(current)
    }

    /// Attribute lookup; `None` for text nodes and missing keys.
    pub fn attr(&self, key: &str) -> Option<&str> {
        match self {
            DomNode::Element { attributes, .. } => attributes.get(key).map(String::as_str),
            DomNode::Text { .. } => None,
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            DomNode::Element { tag_name, .. } => Some(tag_name.as_str()),
            DomNode::Text { .. } => None,
        }
    }

    /// Count of element (non-text) children.
    pub fn element_child_count(&self) -> usize {
        match self {
            DomNode::Element { children, .. } => children
                .iter()
                .filter(|c| matches!(c, DomNode::Element { .. }))
                .count(),
            DomNode::Text { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// The full snapshot carried by the first record of any replay transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshot {
    pub full_snapshot: bool,
    pub node: DomNode,
    pub viewport: Viewport,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctype: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRecord {
    pub path: NodePath,
    pub added: Vec<DomNode>,
    pub removed: Vec<DomNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRecord {
    pub path: NodePath,
    /// Masked or summarized; raw sensitive text never enters a record.
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<NodePath>,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionRecord {
    pub path: NodePath,
    pub is_intersecting: bool,
    pub ratio: f64,
}

/// A pointer/focus/visibility interaction delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionRecord {
    pub kind: InteractionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<NodePath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    Focus,
    Blur,
    Visibility,
    MouseMove,
}

/// Replay delta kinds form a closed set; `dom` appears exactly once per
/// transmission, first, as the full snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ReplayData {
    Dom(DomSnapshot),
    Input(InputRecord),
    Scroll(ScrollRecord),
    Mutation(MutationRecord),
    Resize(Viewport),
    Intersection(IntersectionRecord),
    Interaction(InteractionRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub timestamp: i64,
    #[serde(flatten)]
    pub data: ReplayData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayPayload {
    pub events: Vec<ReplayRecord>,
}

// ---------------------------------------------------------------------------
// Top-level discriminated union
// ---------------------------------------------------------------------------

/// Discriminator values for the four payload kinds.
///
/// Used as the sampling key and the flush-policy dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Performance,
    Error,
    Behavior,
    Replay,
}

/// Per-kind payload, discriminated by the `type` field.
///
/// ```json
/// { "type": "error", "errorType": "javascript", ... }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Payload {
    Performance(PerformancePayload),
    Error(ErrorPayload),
    Behavior(BehaviorPayload),
    Replay(ReplayPayload),
}

impl Payload {
    pub fn category(&self) -> EventCategory {
        match self {
            Payload::Performance(_) => EventCategory::Performance,
            Payload::Error(_) => EventCategory::Error,
            Payload::Behavior(_) => EventCategory::Behavior,
            Payload::Replay(_) => EventCategory::Replay,
        }
    }
}

/// One captured record: envelope fields and payload fields merged flat,
/// with `type` as the discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Event {
    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }
}

// ---------------------------------------------------------------------------
// Batch body
// ---------------------------------------------------------------------------

/// HTTP POST (and beacon) body.
///
/// ```json
/// { "events": [...], "timestamp": 1700000000000, "sdk_version": "0.3.0" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub events: Vec<Event>,
    /// Wall-clock ms at serialization time.
    pub timestamp: i64,
    pub sdk_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> Envelope {
        Envelope {
            event_id: "evt-1".to_owned(),
            app_id: "app-1".to_owned(),
            session_id: "sess-1".to_owned(),
            user_id: None,
            timestamp: 1_700_000_000_000,
            page_url: "https://example.com/checkout".to_owned(),
            user_agent: "test-agent".to_owned(),
            device_info: DeviceInfo {
                screen_width: 1920,
                screen_height: 1080,
                viewport_width: 1280,
                viewport_height: 720,
                platform: "linux".to_owned(),
                language: "en-US".to_owned(),
                timezone: "UTC".to_owned(),
                connection: None,
            },
        }
    }

    /// Wire shape: envelope and payload fields are flattened around the
    /// `type` discriminator, camelCase throughout.
    #[test]
    fn error_event_serializes_flat_with_type_tag() {
        let event = Event {
            envelope: envelope(),
            payload: Payload::Error(ErrorPayload {
                error_type: ErrorKind::Javascript,
                message: "Boom".to_owned(),
                stack_trace: None,
                file_name: Some("app.js".to_owned()),
                line_number: Some(10),
                column_number: Some(3),
                severity: Severity::High,
                context: None,
                fingerprint: "deadbeefdeadbeef".to_owned(),
            }),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["errorType"], "javascript");
        assert_eq!(value["eventId"], "evt-1");
        assert_eq!(value["severity"], "high");
        assert_eq!(value["lineNumber"], 10);
        // Absent optional fields are omitted, not null.
        assert!(value.get("userId").is_none());
        assert!(value.get("stackTrace").is_none());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn severity_ordering_backs_threshold_overrides() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::High >= Severity::High);
    }

    #[test]
    fn replay_record_uses_type_and_data_fields() {
        let record = ReplayRecord {
            timestamp: 42,
            data: ReplayData::Scroll(ScrollRecord {
                path: None,
                x: 0.0,
                y: 300.0,
            }),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "scroll");
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["data"]["y"], 300.0);
    }

    #[test]
    fn node_at_resolves_child_index_paths() {
        let tree = DomNode::element("html").with_children(vec![
            DomNode::element("head"),
            DomNode::element("body").with_children(vec![
                DomNode::text("hello"),
                DomNode::element("div").with_attr("id", "main"),
            ]),
        ]);

        assert_eq!(tree.node_at(&[]).and_then(DomNode::tag), Some("html"));
        assert_eq!(tree.node_at(&[1, 1]).and_then(|n| n.attr("id")), Some("main"));
        // Text nodes terminate descent.
        assert!(tree.node_at(&[1, 0, 0]).is_none());
        assert!(tree.node_at(&[5]).is_none());
    }

    #[test]
    fn batch_body_uses_snake_case_keys() {
        let batch = Batch {
            events: vec![],
            timestamp: 7,
            sdk_version: "0.3.0".to_owned(),
        };
        let value = serde_json::to_value(&batch).unwrap();
        assert!(value.get("sdk_version").is_some());
        assert!(value.get("events").is_some());
    }
}
