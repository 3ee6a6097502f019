// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Unpack ChatGPT conversation exports into token-bounded parts.
//!
//! This crate turns the node graphs stored in a ChatGPT `conversations.json`
//! export into ordered message lists, then splits each list into parts that
//! fit a token budget.
//!
//! # Overview
//!
//! Each conversation goes through the same steps:
//!
//! 1. [`export`] parses the JSON into an arena of linked nodes
//! 2. [`flatten`] walks the graph from its root into a list of user and
//!    assistant messages
//! 3. [`split`] packs those messages into parts, pricing each one with a
//!    [`tokens::TokenCounter`]
//!
//! Conversations are independent of each other. [`unpack`] runs steps 2 and
//! 3 for one of them, and [`unpack_all`] runs them over a whole export,
//! keeping a tokenizer failure confined to the conversation that caused it.
//!
//! # Example
//!
//! ```no_run
//! use portus_unpack::{export, flatten::FlattenOptions, split, tokens};
//!
//! let json = std::fs::read_to_string("conversations.json").unwrap();
//! let counter = tokens::TiktokenCounter::for_model(tokens::TOKENIZER_MODEL).unwrap();
//!
//! for conversation in export::parse_export(&json).unwrap() {
//!     let parts = portus_unpack::unpack(
//!         &conversation,
//!         &FlattenOptions::default(),
//!         Some(split::DEFAULT_MAX_TOKENS),
//!         &counter,
//!     )
//!     .unwrap();
//!
//!     for part in &parts {
//!         let record = split::PartRecord::new(&conversation.meta, part);
//!         println!("{}", serde_json::to_string(&record).unwrap());
//!     }
//! }
//! ```
//!
//! # Modules
//!
//! - [`export`]: JSON parsing and the node graph model
//! - [`flatten`]: first-child traversal and message filtering
//! - [`split`]: greedy token-budget packing and the persisted part shape
//! - [`tokens`]: the token counter seam and its tiktoken implementation

#![deny(missing_docs)]

pub mod export;
pub mod flatten;
pub mod split;
pub mod tokens;

use tracing::{debug, warn};

/// Counters for a batch of unpacked conversations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Conversations that produced at least one part.
    pub conversations: usize,
    /// Parts produced across all exported conversations.
    pub parts: usize,
    /// Conversations with nothing worth exporting.
    pub skipped: usize,
    /// Conversations abandoned because a message could not be tokenized.
    pub failed: usize,
}

/// Flattens one conversation and splits it into parts.
///
/// An empty result means the conversation has nothing worth exporting and
/// should be skipped.
///
/// # Errors
///
/// Returns an error if a message cannot be tokenized.
pub fn unpack<C>(
    conversation: &export::Conversation,
    opts: &flatten::FlattenOptions,
    max_tokens: Option<usize>,
    counter: &C,
) -> Result<Vec<split::Part>, tokens::TokenError>
where
    C: tokens::TokenCounter + ?Sized,
{
    let messages = flatten::flatten(conversation, opts);
    split::split(messages, max_tokens, counter)
}

/// Unpacks every conversation of an export, accumulating into `summary`.
///
/// A conversation whose messages cannot be tokenized is logged, counted as
/// failed and left out; the remaining conversations are still unpacked.
/// Returns each exported conversation's metadata with its parts, in input
/// order.
pub fn unpack_all<C>(
    conversations: Vec<export::Conversation>,
    opts: &flatten::FlattenOptions,
    max_tokens: Option<usize>,
    counter: &C,
    summary: &mut Summary,
) -> Vec<(export::ConversationMeta, Vec<split::Part>)>
where
    C: tokens::TokenCounter + ?Sized,
{
    let mut exported = Vec::with_capacity(conversations.len());
    for conversation in conversations {
        match unpack(&conversation, opts, max_tokens, counter) {
            Ok(parts) if parts.is_empty() => {
                debug!(conversation = %conversation.meta.id, "nothing to export, skipping");
                summary.skipped += 1;
            }
            Ok(parts) => {
                summary.conversations += 1;
                summary.parts += parts.len();
                exported.push((conversation.meta, parts));
            }
            Err(err) => {
                warn!(
                    conversation = %conversation.meta.id,
                    title = %conversation.meta.title,
                    "{err}"
                );
                summary.failed += 1;
            }
        }
    }
    exported
}
