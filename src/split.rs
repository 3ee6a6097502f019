// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Splitting flattened conversations into token-bounded parts.
//!
//! Messages are packed greedily, in order, into parts whose total cost stays
//! within a token budget. A message is never divided; one that is larger
//! than the whole budget gets a part of its own. If packing leaves a single
//! message alone in the last part, that message is folded back into the
//! part before it.
//!
//! Each message costs its token count plus [`MESSAGE_OVERHEAD`].
//!
//! # Example
//!
//! ```
//! use portus_unpack::export::Role;
//! use portus_unpack::flatten::Message;
//! use portus_unpack::split::split;
//! use portus_unpack::tokens::TokenError;
//!
//! let message = |text: &str| Message {
//!     role: Role::User,
//!     text: text.into(),
//!     created_at: None,
//!     model_id: None,
//! };
//! let words = |text: &str| Ok::<_, TokenError>(text.split_whitespace().count());
//!
//! let messages = vec![message("a b c d"), message("e f g h"), message("i j")];
//! let parts = split(messages, Some(10), &words).unwrap();
//!
//! assert_eq!(parts.len(), 2);
//! assert_eq!(parts[0].token_count, 8);
//! assert_eq!(parts[1].token_count, 14);
//! assert_eq!(parts[1].total_parts, 2);
//! ```

use crate::export::ConversationMeta;
use crate::flatten::Message;
use crate::tokens::{TokenCounter, TokenError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use snafu::prelude::*;
use tracing::debug;

/// Per-message framing cost charged on top of the text's own tokens.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Budget used when splitting is requested without an explicit size.
pub const DEFAULT_MAX_TOKENS: usize = 8_000;

/// Error type for token budget parsing.
#[derive(Debug, Snafu)]
pub enum BudgetError {
    /// The value is not a number, optionally suffixed with `k`.
    #[snafu(display("invalid split value '{value}': use formats like 8000, 4k or 10.5k"))]
    Invalid {
        /// The rejected input.
        value: String,
    },

    /// The value parsed, but is not a positive token count.
    #[snafu(display("split value '{value}' must be at least 1 token"))]
    NotPositive {
        /// The rejected input.
        value: String,
    },
}

/// One bounded slice of a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// 1-based position among the conversation's parts.
    pub index: usize,

    /// How many parts the conversation was split into.
    pub total_parts: usize,

    /// Cost of this part's messages, overhead included.
    pub token_count: usize,

    /// The messages, in conversation order.
    pub messages: Vec<Message>,
}

/// Returns what a message costs inside a part.
///
/// # Errors
///
/// Returns an error if the counter cannot tokenize the message text.
pub fn message_cost<C>(message: &Message, counter: &C) -> Result<usize, TokenError>
where
    C: TokenCounter + ?Sized,
{
    Ok(counter.count(&message.text)? + MESSAGE_OVERHEAD)
}

/// Splits messages into parts of at most `max_tokens` each.
///
/// With `max_tokens` set to `None` the result is a single part holding every
/// message. An empty message list yields no parts.
///
/// Only a part produced by folding in a trailing single message, or a part
/// holding one oversized message, may exceed the budget.
///
/// # Errors
///
/// Returns an error if any message cannot be tokenized. No partial result is
/// returned in that case.
pub fn split<C>(
    messages: Vec<Message>,
    max_tokens: Option<usize>,
    counter: &C,
) -> Result<Vec<Part>, TokenError>
where
    C: TokenCounter + ?Sized,
{
    let mut packed: Vec<(Vec<Message>, usize)> = Vec::new();
    let mut current = Vec::new();
    let mut tokens = 0;

    for message in messages {
        let cost = message_cost(&message, counter)?;

        if let Some(limit) = max_tokens
            && tokens + cost > limit
            && !current.is_empty()
        {
            debug!(messages = current.len(), tokens, "closing part");
            packed.push((std::mem::take(&mut current), tokens));
            tokens = 0;
        }

        current.push(message);
        tokens += cost;
    }

    if !current.is_empty() {
        packed.push((current, tokens));
    }

    if packed.len() > 1
        && packed.last().is_some_and(|(last, _)| last.len() == 1)
        && let Some((orphan, orphan_tokens)) = packed.pop()
        && let Some((previous, previous_tokens)) = packed.last_mut()
    {
        debug!(tokens = orphan_tokens, "folding trailing single message into previous part");
        previous.extend(orphan);
        *previous_tokens += orphan_tokens;
    }

    let total_parts = packed.len();
    Ok(packed
        .into_iter()
        .enumerate()
        .map(|(i, (messages, token_count))| Part {
            index: i + 1,
            total_parts,
            token_count,
            messages,
        })
        .collect())
}

/// Parses a token budget such as `8000`, `4k` or `10.5k`.
///
/// A `k` suffix multiplies by one thousand; fractions of a token are
/// dropped.
///
/// # Errors
///
/// Returns an error if the value is not a number or is below one token.
///
/// # Example
///
/// ```
/// use portus_unpack::split::parse_budget;
///
/// assert_eq!(parse_budget("4k").unwrap(), 4_000);
/// assert_eq!(parse_budget("10.5K").unwrap(), 10_500);
/// assert_eq!(parse_budget("2500").unwrap(), 2_500);
/// assert!(parse_budget("lots").is_err());
/// ```
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn parse_budget(value: &str) -> Result<usize, BudgetError> {
    let trimmed = value.trim().to_ascii_lowercase();
    let (number, scale) = match trimmed.strip_suffix('k') {
        Some(number) => (number, 1_000.0),
        None => (trimmed.as_str(), 1.0),
    };

    let parsed: f64 = number
        .trim()
        .parse()
        .ok()
        .filter(|n: &f64| n.is_finite())
        .context(InvalidSnafu { value })?;

    let tokens = (parsed * scale).floor();
    ensure!(tokens >= 1.0, NotPositiveSnafu { value });
    ensure!(tokens <= usize::MAX as f64, InvalidSnafu { value });

    Ok(tokens as usize)
}

/// Budget information attached to every persisted part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartMeta {
    /// 1-based part number.
    pub part: usize,
    /// Number of parts in the conversation.
    pub total_parts: usize,
    /// Token cost of the part.
    pub tokens: usize,
}

/// The persisted shape of one part: conversation metadata, part metadata,
/// then the messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartRecord<'a> {
    /// Conversation id.
    pub id: &'a str,
    /// Conversation title.
    pub title: &'a str,
    /// Conversation creation time.
    pub created: Option<DateTime<Utc>>,
    /// Conversation update time.
    pub updated: Option<DateTime<Utc>>,
    /// Position and size of this part.
    pub meta: PartMeta,
    /// The part's messages.
    pub messages: &'a [Message],
}

impl<'a> PartRecord<'a> {
    /// Pairs a part with the metadata of the conversation it came from.
    #[must_use]
    pub fn new(conversation: &'a ConversationMeta, part: &'a Part) -> Self {
        Self {
            id: &conversation.id,
            title: &conversation.title,
            created: conversation.created_at,
            updated: conversation.updated_at,
            meta: PartMeta {
                part: part.index,
                total_parts: part.total_parts,
                tokens: part.token_count,
            },
            messages: &part.messages,
        }
    }
}
