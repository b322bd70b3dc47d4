//! Interpreter configuration.

use std::collections::HashMap;
use std::sync::Arc;

use rive_parser::{ConcatMode, MorphemeMode, Preprocessor};
use rive_session::SessionManager;

/// Key for the message returned when recursion exceeds the depth limit.
pub const DEEP_RECURSION_KEY: &str = "deepRecursion";
/// Key for the message returned when `reply` runs before `sort_replies`.
pub const REPLIES_NOT_SORTED_KEY: &str = "repliesNotSorted";
/// Key for the message returned when the `random` topic is missing.
pub const DEFAULT_TOPIC_NOT_FOUND_KEY: &str = "defaultTopicNotFound";
/// Key for the message returned when no trigger matches.
pub const REPLY_NOT_MATCHED_KEY: &str = "replyNotMatched";
/// Key for the message returned when a match yields no reply text.
pub const REPLY_NOT_FOUND_KEY: &str = "replyNotFound";
/// Key for the message spliced in for a `<call>` to an unknown macro.
pub const OBJECT_NOT_FOUND_KEY: &str = "objectNotFound";
/// Key for the `<div>` by zero message.
pub const CANNOT_DIVIDE_BY_ZERO_KEY: &str = "cannotDivideByZero";
/// Key for math on a non-numeric variable.
pub const CANNOT_MATH_VARIABLE_KEY: &str = "cannotMathVariable";
/// Key for math with a non-numeric operand.
pub const CANNOT_MATH_VALUE_KEY: &str = "cannotMathValue";

/// The nine keyed error texts, with overrides applied on top of the
/// built-in defaults.
#[derive(Debug, Clone)]
pub struct ErrorMessages {
    messages: HashMap<String, String>,
}

impl Default for ErrorMessages {
    fn default() -> Self {
        let mut messages = HashMap::new();
        let defaults: [(&str, &str); 9] = [
            (DEEP_RECURSION_KEY, "ERR: Deep Recursion Detected"),
            (REPLIES_NOT_SORTED_KEY, "ERR: Replies Not Sorted"),
            (
                DEFAULT_TOPIC_NOT_FOUND_KEY,
                "ERR: No default topic 'random' was found",
            ),
            (REPLY_NOT_MATCHED_KEY, "ERR: No Reply Matched"),
            (REPLY_NOT_FOUND_KEY, "ERR: No Reply Found"),
            (OBJECT_NOT_FOUND_KEY, "[ERR: Object Not Found]"),
            (CANNOT_DIVIDE_BY_ZERO_KEY, "[ERR: Can't Divide By Zero]"),
            (
                CANNOT_MATH_VARIABLE_KEY,
                "[ERR: Can't perform math operation on non-numeric variable]",
            ),
            (
                CANNOT_MATH_VALUE_KEY,
                "[ERR: Can't perform math operation on non-numeric value]",
            ),
        ];
        for (key, text) in defaults {
            messages.insert(key.to_string(), text.to_string());
        }
        Self { messages }
    }
}

impl ErrorMessages {
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut this = Self::default();
        for (key, text) in overrides {
            this.messages.insert(key.clone(), text.clone());
        }
        this
    }

    /// Fetch a message by key. Unknown keys resolve to an empty string, which
    /// can only happen with a typo in an override key.
    pub fn get(&self, key: &str) -> String {
        self.messages.get(key).cloned().unwrap_or_default()
    }
}

/// User-configurable properties of the interpreter.
#[derive(Default)]
pub struct Config {
    /// Raise [`crate::RiveError`] for fatal conditions instead of returning
    /// the keyed error text as the reply.
    pub throw_exceptions: bool,
    /// Abort parsing on the first syntax error.
    pub strict: bool,
    /// Relax trigger character classes and strip only configured punctuation.
    pub utf8: bool,
    /// Punctuation stripped from messages in UTF-8 mode; `None` keeps the
    /// default class `[.,!?;:]`.
    pub unicode_punctuation: Option<String>,
    /// Lowercase every trigger pattern and topic name at parse time.
    pub force_case: bool,
    /// Line-continuation separator.
    pub concat: ConcatMode,
    /// Morpheme preprocessing of trigger patterns and user messages.
    pub morpheme: MorphemeMode,
    /// Recursion ceiling; zero falls back to the default of 50.
    pub depth: usize,
    /// Fixed RNG seed, for deterministic reply selection in tests.
    pub seed: Option<u64>,
    /// Session storage; `None` selects the in-memory store.
    pub session_manager: Option<Box<dyn SessionManager>>,
    /// Overrides for the keyed error messages.
    pub error_messages: HashMap<String, String>,
    /// Morpheme analyzer used when `morpheme` is separation mode.
    pub preprocessor: Option<Arc<dyn Preprocessor>>,
}

impl Config {
    pub const DEFAULT_DEPTH: usize = 50;
    pub const DEFAULT_UNICODE_PUNCTUATION: &'static str = "[.,!?;:]";

    /// The default configuration.
    pub fn basic() -> Self {
        Self::default()
    }

    /// The default configuration with UTF-8 mode enabled.
    pub fn utf8() -> Self {
        Self {
            utf8: true,
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("throw_exceptions", &self.throw_exceptions)
            .field("strict", &self.strict)
            .field("utf8", &self.utf8)
            .field("unicode_punctuation", &self.unicode_punctuation)
            .field("force_case", &self.force_case)
            .field("concat", &self.concat)
            .field("morpheme", &self.morpheme)
            .field("depth", &self.depth)
            .field("seed", &self.seed)
            .field("session_manager", &self.session_manager.is_some())
            .field("error_messages", &self.error_messages)
            .field("preprocessor", &self.preprocessor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_nine_keys() {
        let messages = ErrorMessages::default();
        for key in [
            DEEP_RECURSION_KEY,
            REPLIES_NOT_SORTED_KEY,
            DEFAULT_TOPIC_NOT_FOUND_KEY,
            REPLY_NOT_MATCHED_KEY,
            REPLY_NOT_FOUND_KEY,
            OBJECT_NOT_FOUND_KEY,
            CANNOT_DIVIDE_BY_ZERO_KEY,
            CANNOT_MATH_VARIABLE_KEY,
            CANNOT_MATH_VALUE_KEY,
        ] {
            assert!(!messages.get(key).is_empty(), "missing default for {key}");
        }
    }

    #[test]
    fn overrides_replace_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert(REPLY_NOT_MATCHED_KEY.to_string(), "hmm?".to_string());
        let messages = ErrorMessages::with_overrides(&overrides);
        assert_eq!(messages.get(REPLY_NOT_MATCHED_KEY), "hmm?");
        assert_eq!(messages.get(DEEP_RECURSION_KEY), "ERR: Deep Recursion Detected");
    }
}
