//! Small text helpers used by the sorter and the reply engine.

/// Count the words in a pattern or substitution key.
///
/// With `all` set every whitespace-separated token counts (used for
/// substitution sorting). Otherwise the wildcard symbols `*`, `#`, `_` and
/// alternation pipes split tokens and don't count as words themselves, so a
/// trigger like `* hello *` has one word.
pub fn count_words(text: &str, all: bool) -> usize {
    if all {
        text.split_whitespace().count()
    } else {
        text.split(|c: char| c.is_whitespace() || matches!(c, '*' | '#' | '_' | '|'))
            .filter(|word| !word.is_empty())
            .count()
    }
}

/// Strip everything that isn't a plain letter, digit or space.
pub fn strip_nasties(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}

/// Whether a trigger contains no wildcards, alternations, optionals or tags,
/// so plain string equality can replace the regex engine.
pub fn is_atomic(pattern: &str) -> bool {
    !pattern.contains(['*', '#', '_', '(', '[', '<', '@'])
}

/// Title-case every space-separated word, as `{formal}` blocks do.
pub fn formal_case(text: &str) -> String {
    text.split(' ')
        .map(sentence_case)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uppercase the first character and lowercase the rest.
pub fn sentence_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Split a `<call>` argument string on whitespace, treating double-quoted
/// runs as single arguments. Quotes are consumed; an unbalanced quote takes
/// the rest of the string.
pub fn parse_call_args(args: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut buffer = String::new();
    let mut inside_string = false;

    for c in args.chars() {
        if c.is_whitespace() && !inside_string {
            if !buffer.is_empty() {
                result.push(std::mem::take(&mut buffer));
            }
            continue;
        }
        if c == '"' {
            if inside_string && !buffer.is_empty() {
                result.push(std::mem::take(&mut buffer));
            }
            inside_string = !inside_string;
            continue;
        }
        buffer.push(c);
    }
    if !buffer.is_empty() {
        result.push(buffer);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_counts_ignore_wildcards() {
        assert_eq!(count_words("hello bot", false), 2);
        assert_eq!(count_words("* hello *", false), 1);
        assert_eq!(count_words("* * *", false), 0);
        assert_eq!(count_words("_ # *", false), 0);
        assert_eq!(count_words("my name is *", false), 3);
    }

    #[test]
    fn word_counts_with_all_count_everything() {
        assert_eq!(count_words("* * *", true), 3);
        assert_eq!(count_words("what is", true), 2);
    }

    #[test]
    fn nasties_are_stripped() {
        assert_eq!(strip_nasties("hello, bot!"), "hello bot");
        assert_eq!(strip_nasties("a-b_c"), "abc");
    }

    #[test]
    fn atomic_detection() {
        assert!(is_atomic("hello bot"));
        assert!(!is_atomic("hello *"));
        assert!(!is_atomic("[hi] there"));
        assert!(!is_atomic("<bot name>"));
        assert!(!is_atomic("(@colors)"));
    }

    #[test]
    fn formal_and_sentence_casing() {
        assert_eq!(formal_case("hello there world"), "Hello There World");
        assert_eq!(sentence_case("hello THERE"), "Hello there");
        assert_eq!(sentence_case(""), "");
        assert_eq!(sentence_case("x"), "X");
    }

    #[test]
    fn call_args_split_on_whitespace() {
        assert_eq!(parse_call_args("one two three"), vec!["one", "two", "three"]);
    }

    #[test]
    fn call_args_respect_quotes() {
        assert_eq!(
            parse_call_args(r#"one "two three" four"#),
            vec!["one", "two three", "four"]
        );
    }

    #[test]
    fn unbalanced_quote_takes_the_rest() {
        assert_eq!(
            parse_call_args(r#"one "two three"#),
            vec!["one", "two three"]
        );
    }
}
