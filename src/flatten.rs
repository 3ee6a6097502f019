// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Linearization of a conversation's node graph.
//!
//! A ChatGPT conversation is a tree: every regenerated response or edited
//! prompt starts a new branch. [`flatten`] walks from the root, always taking
//! the first child, and keeps the user and assistant turns found along that
//! single path. Sibling branches are not exported.
//!
//! # Example
//!
//! ```
//! use portus_unpack::export::parse_export;
//! use portus_unpack::flatten::{flatten, FlattenOptions};
//!
//! let json = r#"[{
//!     "id": "c1",
//!     "mapping": {
//!         "root": { "parent": null, "children": ["n1"] },
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
//! let messages = flatten(&conversations[0], &FlattenOptions::default());
//!
//! assert_eq!(messages.len(), 1);
//! assert_eq!(messages[0].text, "Hello");
//! ```

use crate::export::{Content, Conversation, NodeMessage, Role};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// Placeholder text for content types that cannot be rendered as text.
pub const UNSUPPORTED_CONTENT: &str = "[Unsupported content]";

/// Controls which optional fields are copied onto flattened messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenOptions {
    /// Attach each message's creation time.
    pub include_time: bool,

    /// Attach the id of the model that produced each message.
    pub include_model: bool,
}

/// A user or assistant turn, ready to be packed into parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// Either [`Role::User`] or [`Role::Assistant`].
    pub role: Role,

    /// The extracted text. Never empty or whitespace-only.
    pub text: String,

    /// Creation time, present only when requested and known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Model id, present only when requested and known.
    #[serde(rename = "model", skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
}

/// Flattens a conversation into its ordered list of relevant messages.
///
/// The walk starts at the root and follows the first child of each node. A
/// conversation without a root yields no messages. Revisiting a node, or
/// reaching a child id that is not in the graph, ends the walk; whatever was
/// collected up to that point is returned.
#[must_use]
pub fn flatten(conversation: &Conversation, opts: &FlattenOptions) -> Vec<Message> {
    let mut messages = Vec::new();

    let Some(mut node) = conversation.root() else {
        debug!(conversation = %conversation.meta.id, "no root node");
        return messages;
    };
    let mut visited = HashSet::new();

    loop {
        if !visited.insert(node.id.as_str()) {
            debug!(
                conversation = %conversation.meta.id,
                node = %node.id,
                "cycle detected, stopping walk"
            );
            break;
        }

        if let Some(message) = node.message.as_ref().and_then(|m| to_message(m, opts)) {
            messages.push(message);
        }

        let Some(next_id) = node.children_ids.first() else {
            break;
        };
        let Some(next) = conversation.node(next_id) else {
            debug!(conversation = %conversation.meta.id, child = %next_id, "dangling child id");
            break;
        };
        node = next;
    }

    messages
}

/// Applies the relevance filter and content extraction to a node's payload.
fn to_message(message: &NodeMessage, opts: &FlattenOptions) -> Option<Message> {
    if !matches!(message.role, Role::User | Role::Assistant) || message.hidden {
        return None;
    }

    let text = extract_text(&message.content)?;
    if text.trim().is_empty() {
        return None;
    }

    Some(Message {
        role: message.role,
        text: text.to_owned(),
        created_at: message.created_at.filter(|_| opts.include_time),
        model_id: if opts.include_model {
            message.model_id.clone()
        } else {
            None
        },
    })
}

fn extract_text(content: &Content) -> Option<&str> {
    match content {
        Content::Text { first_part } => first_part.as_deref(),
        Content::Code { code } => code.as_deref(),
        Content::Unsupported { .. } => Some(UNSUPPORTED_CONTENT),
    }
}
