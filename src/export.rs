// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! JSON parsing for ChatGPT conversation exports.
//!
//! This module handles deserialization of the `conversations.json` document
//! found in a ChatGPT data export. Each conversation stores its messages as a
//! graph of nodes linked by parent and child ids rather than as a list.
//!
//! # Format Overview
//!
//! A conversation object contains:
//! - Metadata (id, title, creation and update times)
//! - A `mapping` from node id to node
//! - Each node has an optional `parent`, an ordered `children` list, and an
//!   optional `message` payload
//!
//! Nodes are stored in a flat arena addressed by index, with an id lookup
//! table, so malformed or cyclic graphs never turn into reference cycles.
//!
//! # Example
//!
//! ```
//! use portus_unpack::export::parse_export;
//!
//! let json = r#"[{
//!     "id": "c1",
//!     "title": "Greetings",
//!     "create_time": 1733356800.0,
//!     "mapping": {
//!         "root": { "parent": null, "children": ["n1"], "message": null },
//!         "n1": {
//!             "parent": "root",
//!             "children": [],
//!             "message": {
//!                 "author": { "role": "user" },
//!                 "content": { "content_type": "text", "parts": ["Hello"] }
//!             }
//!         }
//!     }
//! }]"#;
//!
//! let conversations = parse_export(json).unwrap();
//! assert_eq!(conversations.len(), 1);
//! assert_eq!(conversations[0].meta.title, "Greetings");
//! assert_eq!(conversations[0].root().unwrap().id, "root");
//! ```

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::prelude::*;
use std::collections::HashMap;

/// Title used when a conversation has no usable title.
pub const UNTITLED: &str = "untitled";

/// Error type for export parsing failures.
#[derive(Debug, Snafu)]
pub enum ParseError {
    /// Failed to parse JSON content.
    #[snafu(display("failed to parse JSON: {source}"))]
    Json {
        /// The underlying JSON parsing error.
        source: serde_json::Error,
    },
}

/// Immutable conversation metadata, carried through to every output part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMeta {
    /// The conversation's opaque identifier.
    pub id: String,

    /// Display title, or [`UNTITLED`] when the export has none.
    pub title: String,

    /// When the conversation was started.
    pub created_at: Option<DateTime<Utc>>,

    /// When the conversation was last updated.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A single conversation: its metadata plus its node graph.
///
/// Nodes live in a flat arena. Lookups by id go through an index map built
/// once at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Metadata carried through unchanged.
    pub meta: ConversationMeta,

    nodes: Vec<Node>,
    index: HashMap<String, usize>,
}

/// One entry in a conversation's graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// The node's id, unique within its conversation.
    pub id: String,

    /// The parent node's id, or `None` for the root.
    pub parent_id: Option<String>,

    /// Child node ids. Order is significant: the first child is the one
    /// the exported conversation continues through.
    pub children_ids: Vec<String>,

    /// The message payload. Structural nodes carry none.
    pub message: Option<NodeMessage>,
}

/// The message payload attached to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMessage {
    /// Who authored the message.
    pub role: Role,

    /// The message content, still tagged by content type.
    pub content: Content,

    /// When the message was created.
    pub created_at: Option<DateTime<Utc>>,

    /// The model that produced the message (e.g., "gpt-4o").
    pub model_id: Option<String>,

    /// Whether the export marks this message as hidden from the conversation.
    pub hidden: bool,
}

/// The author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message typed by the user.
    User,
    /// A model response.
    Assistant,
    /// A system prompt or system notice.
    System,
    /// Output from a tool or plugin call.
    Tool,
    /// Any role this crate does not recognize.
    Other,
}

impl Role {
    /// Maps an export's role string onto a [`Role`].
    #[must_use]
    pub fn from_export(role: &str) -> Self {
        match role {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            "system" => Self::System,
            "tool" | "function" => Self::Tool,
            _ => Self::Other,
        }
    }
}

/// Message content, tagged by the export's `content_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Plain text. Only the first entry of `parts` is kept.
    Text {
        /// The first part, if it was a string.
        first_part: Option<String>,
    },

    /// A code block.
    Code {
        /// The code body.
        code: Option<String>,
    },

    /// Any other content type (images, browsing results, etc.).
    Unsupported {
        /// The raw content type, empty if the export had none.
        content_type: String,
    },
}

impl Conversation {
    /// Builds a conversation from metadata and a list of nodes.
    ///
    /// If two nodes share an id, lookups resolve to the first one.
    #[must_use]
    pub fn new(meta: ConversationMeta, nodes: Vec<Node>) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            index.entry(node.id.clone()).or_insert(i);
        }
        Self { meta, nodes, index }
    }

    /// All nodes, in export order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    /// Returns the root: the first node without a parent.
    #[must_use]
    pub fn root(&self) -> Option<&Node> {
        self.nodes.iter().find(|node| node.parent_id.is_none())
    }
}

impl<'de> Deserialize<'de> for Conversation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if !value.is_object() {
            return Err(D::Error::custom("conversation must be a JSON object"));
        }

        let title = get_str(&value, &["title"])
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(UNTITLED)
            .to_owned();

        let meta = ConversationMeta {
            id: get_string(&value, &["id"])
                .or_else(|| get_string(&value, &["conversation_id"]))
                .unwrap_or_default(),
            title,
            created_at: parse_timestamp(value.get("create_time")),
            updated_at: parse_timestamp(value.get("update_time")),
        };

        let nodes = value
            .get("mapping")
            .and_then(Value::as_object)
            .into_iter()
            .flatten()
            .map(|(id, node)| parse_node(id, node))
            .collect();

        Ok(Self::new(meta, nodes))
    }
}

fn parse_node(id: &str, value: &Value) -> Node {
    let children_ids = value
        .get("children")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect();

    Node {
        id: id.to_owned(),
        parent_id: get_string(value, &["parent"]),
        children_ids,
        message: value
            .get("message")
            .filter(|m| m.is_object())
            .map(parse_message),
    }
}

fn parse_message(value: &Value) -> NodeMessage {
    let role = get_str(value, &["author", "role"]).map_or(Role::Other, Role::from_export);

    let hidden = value
        .get("metadata")
        .and_then(|m| m.get("is_visually_hidden_from_conversation"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    NodeMessage {
        role,
        content: value
            .get("content")
            .map_or_else(|| unsupported(""), parse_content),
        created_at: parse_timestamp(value.get("create_time")),
        model_id: get_string(value, &["metadata", "model_slug"]),
        hidden,
    }
}

fn parse_content(value: &Value) -> Content {
    match get_str(value, &["content_type"]).unwrap_or("") {
        "text" => Content::Text {
            first_part: value
                .get("parts")
                .and_then(Value::as_array)
                .and_then(|parts| parts.first())
                .and_then(Value::as_str)
                .map(str::to_owned),
        },
        "code" => Content::Code {
            code: get_string(value, &["code"]).or_else(|| get_string(value, &["text"])),
        },
        other => unsupported(other),
    }
}

fn unsupported(content_type: &str) -> Content {
    Content::Unsupported {
        content_type: content_type.to_owned(),
    }
}

/// Converts an export timestamp to UTC.
///
/// Exports use fractional epoch seconds; RFC 3339 strings are accepted too.
#[allow(clippy::cast_possible_truncation)]
fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => {
            let micros = (n.as_f64()? * 1_000_000.0).round();
            if !micros.is_finite() {
                return None;
            }
            DateTime::from_timestamp_micros(micros as i64)
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Navigates a JSON path and returns the string value at the end.
fn get_str<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(*key)?;
    }
    current.as_str()
}

/// Like [`get_str`] but returns an owned `String`.
fn get_string(value: &Value, path: &[&str]) -> Option<String> {
    get_str(value, path).map(str::to_owned)
}

/// Parses the contents of a `conversations.json` file.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or is not an array of
/// conversation objects.
///
/// # Example
///
/// ```
/// use portus_unpack::export::parse_export;
///
/// let conversations = parse_export("[]").unwrap();
/// assert!(conversations.is_empty());
/// ```
pub fn parse_export(json_str: &str) -> Result<Vec<Conversation>, ParseError> {
    serde_json::from_str(json_str).context(JsonSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation_json(mapping_json: &str) -> String {
        format!(
            r#"[{{
                "id": "conv-1",
                "title": "Test chat",
                "create_time": 1733356800.5,
                "update_time": 1733360400.0,
                "mapping": {{ {mapping_json} }}
            }}]"#
        )
    }

    fn parse_one(mapping_json: &str) -> Conversation {
        let mut conversations = parse_export(&conversation_json(mapping_json)).unwrap();
        assert_eq!(conversations.len(), 1);
        conversations.remove(0)
    }

    #[test]
    fn parses_metadata() {
        let conv = parse_one("");

        assert_eq!(conv.meta.id, "conv-1");
        assert_eq!(conv.meta.title, "Test chat");
        assert_eq!(
            conv.meta.created_at.unwrap().to_rfc3339(),
            "2024-12-05T00:00:00.500+00:00"
        );
        assert_eq!(
            conv.meta.updated_at.unwrap().to_rfc3339(),
            "2024-12-05T01:00:00+00:00"
        );
        assert!(conv.nodes().is_empty());
    }

    #[test]
    fn falls_back_to_conversation_id_and_untitled() {
        let json = r#"[{ "conversation_id": "abc", "title": null, "mapping": {} }]"#;
        let conv = &parse_export(json).unwrap()[0];

        assert_eq!(conv.meta.id, "abc");
        assert_eq!(conv.meta.title, UNTITLED);
        assert!(conv.meta.created_at.is_none());
    }

    #[test]
    fn keeps_title_whitespace() {
        let json = r#"[{ "id": "x", "title": "  Spaced Title  ", "mapping": {} }]"#;
        assert_eq!(parse_export(json).unwrap()[0].meta.title, "  Spaced Title  ");
    }

    #[test]
    fn blank_title_becomes_untitled() {
        let json = r#"[{ "id": "x", "title": "   ", "mapping": {} }]"#;
        assert_eq!(parse_export(json).unwrap()[0].meta.title, UNTITLED);
    }

    #[test]
    fn parses_rfc3339_timestamps() {
        let json = r#"[{ "id": "x", "create_time": "2024-12-05T00:00:00Z", "mapping": {} }]"#;
        let conv = &parse_export(json).unwrap()[0];

        assert_eq!(
            conv.meta.created_at.unwrap().to_rfc3339(),
            "2024-12-05T00:00:00+00:00"
        );
    }

    #[test]
    fn parses_node_links() {
        let conv = parse_one(
            r#"
            "a": { "parent": null, "children": ["b", "c"], "message": null },
            "b": { "parent": "a", "children": [] },
            "c": { "parent": "a", "children": [] }
            "#,
        );

        let root = conv.root().unwrap();
        assert_eq!(root.id, "a");
        assert_eq!(root.children_ids, vec!["b", "c"]);
        assert!(root.message.is_none());
        assert_eq!(conv.node("b").unwrap().parent_id.as_deref(), Some("a"));
        assert!(conv.node("missing").is_none());
    }

    #[test]
    fn root_is_absent_when_every_node_has_a_parent() {
        let conv = parse_one(
            r#"
            "a": { "parent": "b", "children": ["b"] },
            "b": { "parent": "a", "children": ["a"] }
            "#,
        );

        assert!(conv.root().is_none());
    }

    #[test]
    fn parses_text_message() {
        let conv = parse_one(
            r#"
            "a": {
                "parent": null,
                "children": [],
                "message": {
                    "author": { "role": "assistant" },
                    "create_time": 1733356800.0,
                    "content": { "content_type": "text", "parts": ["first", "second"] },
                    "metadata": { "model_slug": "gpt-4o" }
                }
            }
            "#,
        );

        let msg = conv.node("a").unwrap().message.as_ref().unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert_eq!(
            msg.content,
            Content::Text {
                first_part: Some("first".into())
            }
        );
        assert_eq!(msg.model_id.as_deref(), Some("gpt-4o"));
        assert!(msg.created_at.is_some());
        assert!(!msg.hidden);
    }

    #[test]
    fn non_string_first_part_is_absent() {
        let conv = parse_one(
            r#"
            "a": {
                "parent": null,
                "children": [],
                "message": {
                    "author": { "role": "user" },
                    "content": { "content_type": "text", "parts": [{ "asset_pointer": "file-1" }] }
                }
            }
            "#,
        );

        let msg = conv.node("a").unwrap().message.as_ref().unwrap();
        assert_eq!(msg.content, Content::Text { first_part: None });
    }

    #[test]
    fn parses_code_message() {
        let conv = parse_one(
            r#"
            "a": {
                "parent": null,
                "children": [],
                "message": {
                    "author": { "role": "assistant" },
                    "content": { "content_type": "code", "language": "python", "text": "print(1)" }
                }
            }
            "#,
        );

        let msg = conv.node("a").unwrap().message.as_ref().unwrap();
        assert_eq!(
            msg.content,
            Content::Code {
                code: Some("print(1)".into())
            }
        );
    }

    #[test]
    fn parses_unknown_content_type_as_unsupported() {
        let conv = parse_one(
            r#"
            "a": {
                "parent": null,
                "children": [],
                "message": {
                    "author": { "role": "user" },
                    "content": { "content_type": "image" }
                }
            }
            "#,
        );

        let msg = conv.node("a").unwrap().message.as_ref().unwrap();
        assert_eq!(
            msg.content,
            Content::Unsupported {
                content_type: "image".into()
            }
        );
    }

    #[test]
    fn parses_hidden_flag() {
        let conv = parse_one(
            r#"
            "a": {
                "parent": null,
                "children": [],
                "message": {
                    "author": { "role": "system" },
                    "content": { "content_type": "text", "parts": [""] },
                    "metadata": { "is_visually_hidden_from_conversation": true }
                }
            }
            "#,
        );

        let msg = conv.node("a").unwrap().message.as_ref().unwrap();
        assert_eq!(msg.role, Role::System);
        assert!(msg.hidden);
    }

    #[test]
    fn maps_role_aliases() {
        assert_eq!(Role::from_export("user"), Role::User);
        assert_eq!(Role::from_export("human"), Role::Other);
        assert_eq!(Role::from_export("function"), Role::Tool);
        assert_eq!(Role::from_export("critic"), Role::Other);
    }

    #[test]
    fn duplicate_ids_resolve_to_first_node() {
        let meta = ConversationMeta {
            id: "c".into(),
            title: "t".into(),
            created_at: None,
            updated_at: None,
        };
        let node = |parent: Option<&str>| Node {
            id: "same".into(),
            parent_id: parent.map(str::to_owned),
            children_ids: Vec::new(),
            message: None,
        };
        let conv = Conversation::new(meta, vec![node(None), node(Some("x"))]);

        assert!(conv.node("same").unwrap().parent_id.is_none());
    }

    #[test]
    fn returns_error_for_invalid_json() {
        assert!(parse_export("not valid json").is_err());
    }

    #[test]
    fn returns_error_for_non_object_conversation() {
        assert!(parse_export("[1, 2]").is_err());
        assert!(parse_export(r#"{"id": "x"}"#).is_err());
    }
}
