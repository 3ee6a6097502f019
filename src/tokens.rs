// SPDX-License-Identifier: GPL-3.0-only
// Copyright (C) 2025 Brian Hetro <whee@smaertness.net>

//! Token counting.
//!
//! The splitter prices messages through the [`TokenCounter`] trait, so any
//! tokenizer (or a stub in tests) can be plugged in. [`TiktokenCounter`] is
//! the production implementation, bound to one model's BPE encoding.
//!
//! Any function from `&str` to `Result<usize, TokenError>` is also a counter:
//!
//! ```
//! use portus_unpack::tokens::{TokenCounter, TokenError};
//!
//! let words = |text: &str| Ok::<_, TokenError>(text.split_whitespace().count());
//! assert_eq!(words.count("one two three").unwrap(), 3);
//! ```

use snafu::prelude::*;
use tiktoken_rs::CoreBPE;

/// The model whose encoding is used to price messages.
pub const TOKENIZER_MODEL: &str = "gpt-3.5-turbo";

/// Error type for token counting failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TokenError {
    /// The encoding for a model could not be loaded.
    #[snafu(display("no tokenizer available for model {model}: {message}"))]
    LoadEncoding {
        /// The requested model name.
        model: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// A piece of text could not be tokenized.
    #[snafu(display("failed to count tokens: {message}"))]
    Count {
        /// Description of the underlying failure.
        message: String,
    },
}

/// Prices text in tokens.
///
/// Implementations must be deterministic: the same text always yields the
/// same count, regardless of call order.
pub trait TokenCounter {
    /// Returns the number of tokens in `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be tokenized.
    fn count(&self, text: &str) -> Result<usize, TokenError>;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> Result<usize, TokenError>,
{
    fn count(&self, text: &str) -> Result<usize, TokenError> {
        self(text)
    }
}

/// A [`TokenCounter`] backed by a tiktoken BPE encoding.
///
/// The encoding is loaded once at construction and never mutated afterwards.
pub struct TiktokenCounter {
    model: String,
    bpe: CoreBPE,
}

impl TiktokenCounter {
    /// Loads the encoding used by `model` (e.g., "gpt-3.5-turbo").
    ///
    /// # Errors
    ///
    /// Returns an error if tiktoken has no encoding for the model.
    pub fn for_model(model: &str) -> Result<Self, TokenError> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|err| {
            LoadEncodingSnafu {
                model,
                message: err.to_string(),
            }
            .build()
        })?;
        Ok(Self {
            model: model.to_owned(),
            bpe,
        })
    }

    /// The model this counter was loaded for.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl TokenCounter for TiktokenCounter {
    /// Special-token markers such as `<|endoftext|>` are counted as plain text.
    fn count(&self, text: &str) -> Result<usize, TokenError> {
        Ok(self.bpe.encode_ordinary(text).len())
    }
}
