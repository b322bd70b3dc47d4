//! The shared pattern catalogue.
//!
//! Every stage of the interpreter works over the same small set of
//! pre-compiled regexes. Placeholders exchanged between stages are the
//! literal texts `\x00…\x00` / `\x00…\x01` (backslash included), never real
//! control characters; user input can't forge them because message
//! formatting strips backslashes and angle brackets first.

use std::sync::LazyLock;

use regex::Regex;

macro_rules! catalogue {
    ($($(#[$doc:meta])* $name:ident = $pattern:literal;)+) => {
        $(
            $(#[$doc])*
            pub static $name: LazyLock<Regex> =
                LazyLock::new(|| Regex::new($pattern).unwrap());
        )+
    };
}

catalogue! {
    /// `{weight=N}` tags on triggers and replies.
    RE_WEIGHT = r"\{weight=(\d+)\}";
    /// `{inherits=N}` labels prefixed during trigger collection.
    RE_INHERITS = r"\{inherits=(\d+)\}";
    /// `{topic=name}` session topic setter.
    RE_TOPIC = r"\{topic=(.+?)\}";
    /// `<set name=value>` user-variable setter.
    RE_SET = r"<set (.+?)=(.+?)>";
    /// `{random}…{/random}` blocks.
    RE_RANDOM = r"\{random\}(.+?)\{/random\}";
    /// `<call>…</call>` object-macro invocations.
    RE_CALL = r"<call>(.+?)</call>";
    /// `{@target}` inline redirects.
    RE_REDIRECT = r"\{@(.+?)\}";
    /// `LEFT op RIGHT` condition halves.
    RE_CONDITION = r"^(.+?)\s+(==|eq|!=|ne|<>|<|<=|>|>=)\s+(.+?)$";
    /// Any tag without nested tags inside; drives the innermost-first loop.
    RE_ANY_TAG = r"<([^<>]+?)>";
    /// `[optional]` trigger parts.
    RE_OPTIONAL = r"\[(.+?)\]";
    /// `(@name)` array references.
    RE_ARRAY = r"\(@([A-Za-z0-9_]+)\)";
    /// `<bot name>` in trigger patterns.
    RE_BOT_VAR = r"<bot (.+?)>";
    /// `<get name>` in trigger patterns.
    RE_USER_VAR = r"<get (.+?)>";
    /// Numbered substitution placeholders (literal `\x00N\x00` text).
    RE_PLACEHOLDER = r"\\x00(\d+)\\x00";
    /// A trigger that is nothing but `*` wildcards matches the empty string.
    RE_ZERO_WIDTH_STAR = r"^\*$|^\*\s+\*$";
    /// Metacharacters stripped from every message in UTF-8 mode.
    RE_META = r"[\\<>]+";
    /// Common punctuation stripped from bot replies in UTF-8 mode.
    RE_SYMBOLS = r"[.?,!;:@#$%^&*()\-+]+";
    /// Collapsed whitespace in formatted messages.
    RE_SPACES = r"\s+";
    /// `{weight=N}` with surrounding whitespace, stripped from patterns.
    RE_WEIGHT_PADDED = r"\s*\{weight=\d+\}\s*";
    /// Runs of pipes left by empty alternation entries.
    RE_EMPTY_PIPES = r"\|{2,}";
    /// A pipe leaning on an opening bracket.
    RE_PIPE_AFTER_OPEN = r"([(\[])\|";
    /// A pipe leaning on a closing bracket.
    RE_PIPE_BEFORE_CLOSE = r"\|([)\]])";
    /// Escaped array placeholders waiting for reinsertion.
    RE_DUMMY_ARRAY = r"\\x00@([A-Za-z0-9_]+)\\x00";

    /// `{person}…{/person}` string-format block.
    RE_FMT_PERSON = r"\{person\}(.+?)\{/person\}";
    /// `{formal}…{/formal}` string-format block.
    RE_FMT_FORMAL = r"\{formal\}(.+?)\{/formal\}";
    /// `{sentence}…{/sentence}` string-format block.
    RE_FMT_SENTENCE = r"\{sentence\}(.+?)\{/sentence\}";
    /// `{uppercase}…{/uppercase}` string-format block.
    RE_FMT_UPPERCASE = r"\{uppercase\}(.+?)\{/uppercase\}";
    /// `{lowercase}…{/lowercase}` string-format block.
    RE_FMT_LOWERCASE = r"\{lowercase\}(.+?)\{/lowercase\}";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_and_inherits_capture_numbers() {
        let caps = RE_WEIGHT.captures("hello {weight=25}").unwrap();
        assert_eq!(&caps[1], "25");
        let caps = RE_INHERITS.captures("{inherits=3}hello").unwrap();
        assert_eq!(&caps[1], "3");
    }

    #[test]
    fn any_tag_finds_the_innermost() {
        let caps = RE_ANY_TAG.captures("<set a=<get b>>").unwrap();
        assert_eq!(&caps[1], "get b");
    }

    #[test]
    fn placeholder_is_literal_text() {
        assert!(RE_PLACEHOLDER.is_match(r"\x007\x00"));
        assert!(!RE_PLACEHOLDER.is_match("\u{0}7\u{0}"));
    }

    #[test]
    fn zero_width_star_only_matches_pure_wildcards() {
        assert!(RE_ZERO_WIDTH_STAR.is_match("*"));
        assert!(RE_ZERO_WIDTH_STAR.is_match("* *"));
        assert!(!RE_ZERO_WIDTH_STAR.is_match("* hello"));
    }

    #[test]
    fn condition_splits_operators() {
        let caps = RE_CONDITION.captures("<get count> >= 5").unwrap();
        assert_eq!(&caps[1], "<get count>");
        assert_eq!(&caps[2], ">=");
        assert_eq!(&caps[3], "5");
    }
}
