//! Script-line parsing.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use rive_ast::{ObjectMacro, Root, Trigger};

use crate::{ConcatMode, MorphemeMode, ParserConfig, ParserError};

/// The highest script language version this parser understands.
pub const RS_VERSION: f64 = 2.0;

// Strict-mode shape checks. These search for violations, so a match means
// the line is rejected.
static RE_DEFINE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(version|local|global|var|array|sub|person)(?:\s+.+|)\s*=\s*.+?$").unwrap()
});
static RE_ARRAY_PIPE_EDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=\s*\||\|\s*$").unwrap());
static RE_TOPIC_NAME_BAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_\-\s]").unwrap());
static RE_TOPIC_NAME_BAD_ANYCASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_\-\s]").unwrap());
static RE_TRIGGER_BAD_UTF8: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z\\.]").unwrap());
static RE_TRIGGER_BAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9(|)\[\]*_#@{}<>=/\s]").unwrap());
static RE_ALT_PIPE_EDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\||\|\)").unwrap());
static RE_ALT_BLANK_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\|\|[^)]*\)").unwrap());
static RE_OPT_PIPE_EDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\||\|\]").unwrap());
static RE_OPT_BLANK_ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\|\|[^\]]*\]").unwrap());
static RE_CONDITION_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+?\s*(?:==|eq|!=|ne|<>|<|<=|>|>=)\s*.+?=>.+?$").unwrap()
});

/// Parser for reply-script source code.
#[derive(Debug, Default)]
pub struct Parser {
    config: ParserConfig,
}

impl Parser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Parse one source unit into an AST [`Root`].
    ///
    /// `filename` is only a label for diagnostics; the caller is responsible
    /// for reading files. In strict mode the first syntax error aborts with
    /// [`ParserError`]; otherwise offending lines are logged and skipped.
    pub fn parse<S: AsRef<str>>(&self, filename: &str, code: &[S]) -> Result<Root, ParserError> {
        debug!("Parsing {}", filename);

        let mut ast = Root::new();

        let mut topic = String::from("random");
        let mut in_comment = false;
        let mut in_object = false;
        let mut object_name = String::new();
        let mut object_language = String::new();
        let mut object_buffer: Vec<String> = Vec::new();
        // Current trigger as (topic name, index) into the AST, since replies
        // and conditions attach to the most recent `+`.
        let mut current_trigger: Option<(String, usize)> = None;
        let mut previous: Option<String> = None;

        // `! local` options, scoped to this file.
        let mut local_options: HashMap<String, String> = HashMap::new();

        for lp in 0..code.len() {
            let lineno = lp + 1;
            let mut line = code[lp].as_ref().trim().to_string();

            if line.is_empty() {
                continue;
            }

            // Object macro bodies are collected verbatim until the end tag.
            if in_object {
                if line.contains("< object") || line.contains("<object") {
                    if !object_name.is_empty() {
                        ast.objects.push(ObjectMacro {
                            name: std::mem::take(&mut object_name),
                            language: std::mem::take(&mut object_language),
                            code: std::mem::take(&mut object_buffer),
                        });
                    }
                    in_object = false;
                    object_name.clear();
                    object_language.clear();
                    object_buffer.clear();
                } else {
                    object_buffer.push(line);
                }
                continue;
            }

            // Comments.
            if line.starts_with("//") {
                continue;
            } else if line.starts_with("/*") {
                if line.contains("*/") {
                    continue; // Opened and closed on the same line.
                }
                in_comment = true;
                continue;
            } else if line.contains("*/") {
                in_comment = false;
                continue;
            } else if in_comment {
                continue;
            }

            if line.len() < 2 {
                warn!(
                    "Weird single-character line '{}' at {} line {}",
                    line, filename, lineno
                );
                continue;
            }

            // Separate the command from its data.
            let cmd = line.remove(0).to_string();
            if let Some(pos) = line.find(" // ") {
                line.truncate(pos);
            }
            line = line.trim().to_string();

            // Trigger patterns are normalized before anything looks at them:
            // morpheme separation first, then case folding.
            if cmd == "+" {
                if self.config.morpheme == MorphemeMode::Separation {
                    if let Some(pre) = &self.config.preprocessor {
                        line = pre.analyze(&line);
                        debug!("Morpheme-separated pattern: {}", line);
                    }
                }
                if self.config.force_case {
                    line = line.to_lowercase();
                }
            }

            debug!("Cmd: {}; line: {}", cmd, line);

            if let Err(message) = self.check_syntax(&cmd, &line) {
                if self.config.strict {
                    return Err(ParserError::Syntax {
                        filename: filename.to_string(),
                        line: lineno,
                        message,
                    });
                }
                warn!("Syntax error '{}' at {} line {}", message, filename, lineno);
                continue;
            }

            if cmd == "+" {
                previous = None;
            }

            // Look ahead over `%` and `^` lines: `%Previous` attaches to the
            // trigger, continuations are glued onto the current line.
            if cmd != "^" {
                for look in code.iter().skip(lp + 1) {
                    let look = look.as_ref().trim();
                    if look.len() < 2 {
                        continue;
                    }
                    let Some(look_cmd) = look.chars().next() else {
                        continue;
                    };
                    let lookahead = look[look_cmd.len_utf8()..].trim();

                    if look_cmd != '%' && look_cmd != '^' {
                        break;
                    }
                    if lookahead.is_empty() {
                        break;
                    }

                    if cmd == "+" {
                        if look_cmd == '%' {
                            previous = Some(lookahead.to_string());
                            break;
                        }
                        previous = None;
                    }

                    if cmd == "!" {
                        if look_cmd == '^' {
                            line.push_str("<crlf>");
                            line.push_str(lookahead);
                        }
                        continue;
                    }

                    if cmd != "^" && look_cmd == '^' {
                        let concat = local_options
                            .get("concat")
                            .and_then(|name| ConcatMode::from_name(name))
                            .unwrap_or(self.config.concat);
                        line.push_str(concat.separator());
                        line.push_str(lookahead);
                    }
                }
            }

            match cmd.as_str() {
                "!" => {
                    let (head, value) = match line.split_once('=') {
                        Some((head, value)) => (head.trim(), value.trim().to_string()),
                        None => (line.trim(), String::new()),
                    };
                    let (kind, name) = match head.split_once(' ') {
                        Some((kind, name)) => (kind.trim(), name.trim().to_string()),
                        None => (head, String::new()),
                    };

                    // Continuations only mean something inside arrays.
                    let value = if kind == "array" {
                        value
                    } else {
                        value.replace("<crlf>", "")
                    };

                    if kind == "version" {
                        let parsed: f64 = value.parse().unwrap_or_else(|_| {
                            warn!(
                                "Script version '{}' at {} line {} is not a valid number",
                                value, filename, lineno
                            );
                            0.0
                        });
                        if parsed > RS_VERSION {
                            return Err(ParserError::UnsupportedVersion {
                                version: value,
                                filename: filename.to_string(),
                                line: lineno,
                            });
                        }
                        continue;
                    }

                    if name.is_empty() {
                        warn!("Undefined variable name at {} line {}", filename, lineno);
                        continue;
                    }
                    if value.is_empty() {
                        warn!("Undefined variable value at {} line {}", filename, lineno);
                        continue;
                    }

                    match kind {
                        "local" => {
                            debug!("Set local parser option {} = {}", name, value);
                            local_options.insert(name, value);
                        }
                        "global" => {
                            ast.begin.global.insert(name, value);
                        }
                        "var" => {
                            ast.begin.var.insert(name, value);
                        }
                        "array" => {
                            let mut fields: Vec<String> = Vec::new();
                            for part in value.split("<crlf>") {
                                if part.contains('|') {
                                    fields.extend(part.split('|').map(str::to_string));
                                } else {
                                    fields.extend(part.split_whitespace().map(str::to_string));
                                }
                            }
                            for field in &mut fields {
                                *field = field.replace("\\s", " ");
                            }
                            ast.begin.array.insert(name, fields);
                        }
                        "sub" => {
                            ast.begin.sub.insert(name, value);
                        }
                        "person" => {
                            ast.begin.person.insert(name, value);
                        }
                        other => warn!(
                            "Unknown definition type '{}' found at {} line {}",
                            other, filename, lineno
                        ),
                    }
                }
                ">" => {
                    let mut tokens = line.split_whitespace();
                    let mut kind = tokens.next().unwrap_or("").to_string();
                    let mut name = tokens.next().unwrap_or("").to_string();
                    let fields: Vec<&str> = tokens.collect();

                    // `> begin` is just the reserved topic.
                    if kind == "begin" {
                        debug!("Found the BEGIN block at {} line {}", filename, lineno);
                        kind = "topic".to_string();
                        name = "__begin__".to_string();
                    }

                    if kind == "topic" {
                        if self.config.force_case {
                            name = name.to_lowercase();
                        }
                        debug!("Set topic to {}", name);
                        current_trigger = None;
                        topic = name;
                        ast.topic_mut(&topic);

                        let mut mode = "";
                        for field in fields {
                            if field == "includes" || field == "inherits" {
                                mode = field;
                            } else if mode == "includes" {
                                ast.topic_mut(&topic).add_include(field);
                            } else if mode == "inherits" {
                                ast.topic_mut(&topic).add_inherit(field);
                            }
                        }
                    } else if kind == "object" {
                        let language = fields
                            .first()
                            .map(|lang| lang.to_lowercase())
                            .unwrap_or_default();
                        object_name = name;
                        object_buffer = Vec::new();
                        in_object = true;
                        if language.is_empty() {
                            warn!(
                                "No programming language specified for object '{}' at {} line {}",
                                object_name, filename, lineno
                            );
                            object_language = "__unknown__".to_string();
                        } else {
                            object_language = language;
                        }
                    } else {
                        warn!(
                            "Unknown label type '{}' at {} line {}",
                            kind, filename, lineno
                        );
                    }
                }
                "<" => match line.as_str() {
                    "begin" | "topic" => {
                        debug!("End the topic label.");
                        topic = "random".to_string();
                    }
                    "object" => {
                        in_object = false;
                    }
                    other => warn!(
                        "Unknown end topic type '{}' at {} line {}",
                        other, filename, lineno
                    ),
                },
                "+" => {
                    debug!("Trigger pattern: {}", line);
                    let mut trigger = Trigger::new(&line);
                    trigger.previous = previous.take();
                    let entry = ast.topic_mut(&topic);
                    entry.add_trigger(trigger);
                    current_trigger = Some((topic.clone(), entry.triggers.len() - 1));
                }
                "-" => {
                    let Some((trigger_topic, index)) = &current_trigger else {
                        warn!("Response found before trigger at {} line {}", filename, lineno);
                        continue;
                    };
                    let trigger = &mut ast.topic_mut(trigger_topic).triggers[*index];
                    if trigger.redirect.is_some() {
                        warn!(
                            "You can't mix @Redirects with -Replies at {} line {}",
                            filename, lineno
                        );
                    }
                    trigger.replies.push(line);
                }
                "*" => {
                    let Some((trigger_topic, index)) = &current_trigger else {
                        warn!("Condition found before trigger at {} line {}", filename, lineno);
                        continue;
                    };
                    ast.topic_mut(trigger_topic).triggers[*index]
                        .conditions
                        .push(line);
                }
                // Consumed by the look-ahead.
                "%" | "^" => continue,
                "@" => {
                    let Some((trigger_topic, index)) = &current_trigger else {
                        warn!("Redirect found before trigger at {} line {}", filename, lineno);
                        continue;
                    };
                    let trigger = &mut ast.topic_mut(trigger_topic).triggers[*index];
                    if !trigger.replies.is_empty() {
                        warn!(
                            "You can't mix @Redirects with -Replies at {} line {}",
                            filename, lineno
                        );
                    }
                    trigger.redirect = Some(line);
                }
                other => warn!(
                    "Unknown command '{}' found at {} line {}",
                    other, filename, lineno
                ),
            }
        }

        Ok(ast)
    }

    /// Validate the shape of one command line. Returns the rejection message.
    fn check_syntax(&self, cmd: &str, line: &str) -> Result<(), String> {
        match cmd {
            "!" => {
                if !RE_DEFINE_SHAPE.is_match(line) {
                    return Err(
                        "Invalid format for !Definition line: must be '! type name = value' \
                         OR '! type = value'"
                            .to_string(),
                    );
                }
                if line.starts_with("array") {
                    if RE_ARRAY_PIPE_EDGE.is_match(line) {
                        return Err("Piped arrays can't begin or end with a |".to_string());
                    }
                    if line.contains("||") {
                        return Err("Piped arrays can't include blank entries".to_string());
                    }
                }
            }
            ">" => {
                let parts: Vec<&str> = line.split_whitespace().collect();
                match parts.first().copied() {
                    Some("begin") if parts.len() > 1 => {
                        return Err("The 'begin' label takes no additional arguments".to_string());
                    }
                    Some("topic") => {
                        if !self.config.force_case && RE_TOPIC_NAME_BAD.is_match(line) {
                            return Err(
                                "Topics should be lowercased and contain only letters and numbers"
                                    .to_string(),
                            );
                        }
                        if RE_TOPIC_NAME_BAD_ANYCASE.is_match(line) {
                            return Err(
                                "Topics should contain only letters and numbers in forceCase mode"
                                    .to_string(),
                            );
                        }
                    }
                    Some("object") => {
                        if RE_TOPIC_NAME_BAD_ANYCASE.is_match(line) {
                            return Err("Objects can only contain numbers and letters".to_string());
                        }
                    }
                    _ => {}
                }
            }
            "+" | "%" | "@" => {
                if self.config.utf8 {
                    if RE_TRIGGER_BAD_UTF8.is_match(line) {
                        return Err(
                            "Triggers can't contain uppercase letters, backslashes or dots \
                             in UTF-8 mode"
                                .to_string(),
                        );
                    }
                } else if RE_TRIGGER_BAD.is_match(line) {
                    return Err(
                        "Triggers may only contain lowercase letters, numbers, and these \
                         symbols: ( | ) [ ] * _ # { } < > = /"
                            .to_string(),
                    );
                }
                if RE_ALT_PIPE_EDGE.is_match(line) {
                    return Err("Piped alternations can't begin or end with a |".to_string());
                }
                if RE_ALT_BLANK_ENTRY.is_match(line) {
                    return Err("Piped alternations can't include blank entries".to_string());
                }
                if RE_OPT_PIPE_EDGE.is_match(line) {
                    return Err("Piped optionals can't begin or end with a |".to_string());
                }
                if RE_OPT_BLANK_ENTRY.is_match(line) {
                    return Err("Piped optionals can't include blank entries".to_string());
                }

                let (mut parens, mut square, mut curly, mut angle) = (0i32, 0i32, 0i32, 0i32);
                for c in line.chars() {
                    match c {
                        '(' => parens += 1,
                        ')' => parens -= 1,
                        '[' => square += 1,
                        ']' => square -= 1,
                        '{' => curly += 1,
                        '}' => curly -= 1,
                        '<' => angle += 1,
                        '>' => angle -= 1,
                        _ => {}
                    }
                }
                if parens != 0 {
                    return Err("Unmatched parenthesis brackets".to_string());
                }
                if square != 0 {
                    return Err("Unmatched square brackets".to_string());
                }
                if curly != 0 {
                    return Err("Unmatched curly brackets".to_string());
                }
                if angle != 0 {
                    return Err("Unmatched angle brackets".to_string());
                }
            }
            "*" => {
                if !RE_CONDITION_SHAPE.is_match(line) {
                    return Err(
                        "Invalid format for !Condition: should be like \
                         '* value symbol value => response'"
                            .to_string(),
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[&str]) -> Root {
        Parser::default().parse("test", lines).unwrap()
    }

    fn strict() -> Parser {
        Parser::new(ParserConfig {
            strict: true,
            ..ParserConfig::default()
        })
    }

    #[test]
    fn parses_trigger_and_reply() {
        let ast = parse(&["+ hello bot", "- hello human"]);
        let topic = &ast.topics["random"];
        assert_eq!(topic.triggers.len(), 1);
        assert_eq!(topic.triggers[0].pattern, "hello bot");
        assert_eq!(topic.triggers[0].replies, vec!["hello human"]);
    }

    #[test]
    fn captures_previous_from_lookahead() {
        let ast = parse(&[
            "+ knock knock",
            "- who is there",
            "+ *",
            "% who is there",
            "- <star> who?",
        ]);
        let triggers = &ast.topics["random"].triggers;
        assert_eq!(triggers[0].previous, None);
        assert_eq!(triggers[1].previous.as_deref(), Some("who is there"));
    }

    #[test]
    fn define_lines_populate_begin() {
        let ast = parse(&[
            "! version = 2.0",
            "! var name = Rivelet",
            "! global debug = false",
            "! sub what's = what is",
            "! person you = i",
        ]);
        assert_eq!(ast.begin.var["name"], "Rivelet");
        assert_eq!(ast.begin.global["debug"], "false");
        assert_eq!(ast.begin.sub["what's"], "what is");
        assert_eq!(ast.begin.person["you"], "i");
    }

    #[test]
    fn future_version_is_rejected() {
        let err = Parser::default()
            .parse("test", &["! version = 3.0"])
            .unwrap_err();
        assert!(matches!(err, ParserError::UnsupportedVersion { .. }));
    }

    #[test]
    fn arrays_split_on_pipes_or_whitespace() {
        let ast = parse(&[
            "! array colors = red|green|dark\\sblue",
            "! array sizes = small medium large",
        ]);
        assert_eq!(
            ast.begin.array["colors"],
            vec!["red", "green", "dark blue"]
        );
        assert_eq!(ast.begin.array["sizes"], vec!["small", "medium", "large"]);
    }

    #[test]
    fn array_continuations_join_with_crlf() {
        let ast = parse(&["! array greek = alpha beta", "^ gamma delta"]);
        assert_eq!(
            ast.begin.array["greek"],
            vec!["alpha", "beta", "gamma", "delta"]
        );
    }

    #[test]
    fn reply_continuation_uses_concat_mode() {
        let ast = Parser::new(ParserConfig {
            concat: ConcatMode::Space,
            ..ParserConfig::default()
        })
        .parse("test", &["+ hello", "- part one", "^ part two"])
        .unwrap();
        assert_eq!(
            ast.topics["random"].triggers[0].replies,
            vec!["part one part two"]
        );
    }

    #[test]
    fn local_concat_overrides_config() {
        let ast = parse(&[
            "! local concat = newline",
            "+ hello",
            "- line one",
            "^ line two",
        ]);
        assert_eq!(
            ast.topics["random"].triggers[0].replies,
            vec!["line one\nline two"]
        );
    }

    #[test]
    fn topic_labels_scope_triggers() {
        let ast = parse(&[
            "+ outer",
            "- in random",
            "> topic games",
            "+ inner",
            "- in games",
            "< topic",
            "+ outer again",
            "- back in random",
        ]);
        assert_eq!(ast.topics["random"].triggers.len(), 2);
        assert_eq!(ast.topics["games"].triggers.len(), 1);
    }

    #[test]
    fn topic_includes_and_inherits() {
        let ast = parse(&["> topic child includes aux inherits parent base", "< topic"]);
        let child = &ast.topics["child"];
        assert!(child.includes.contains("aux"));
        assert!(child.inherits.contains("parent"));
        assert!(child.inherits.contains("base"));
    }

    #[test]
    fn begin_label_becomes_reserved_topic() {
        let ast = parse(&["> begin", "+ request", "- {ok}", "< begin"]);
        assert_eq!(ast.topics["__begin__"].triggers[0].pattern, "request");
    }

    #[test]
    fn object_macro_body_is_verbatim() {
        let ast = parse(&[
            "> object upper js",
            "    return args.join(' ').toUpperCase();",
            "< object",
        ]);
        assert_eq!(ast.objects.len(), 1);
        assert_eq!(ast.objects[0].name, "upper");
        assert_eq!(ast.objects[0].language, "js");
        assert_eq!(
            ast.objects[0].code,
            vec!["return args.join(' ').toUpperCase();"]
        );
    }

    #[test]
    fn comments_are_skipped() {
        let ast = parse(&[
            "// a comment",
            "/* multi",
            "line comment */",
            "+ hello // trailing note",
            "- hi",
        ]);
        assert_eq!(ast.topics["random"].triggers[0].pattern, "hello");
    }

    #[test]
    fn strict_rejects_unbalanced_brackets() {
        let err = strict().parse("test", &["+ hello (world"]).unwrap_err();
        assert!(matches!(err, ParserError::Syntax { line: 1, .. }));
    }

    #[test]
    fn strict_rejects_uppercase_trigger_in_utf8_mode() {
        let parser = Parser::new(ParserConfig {
            strict: true,
            utf8: true,
            ..ParserConfig::default()
        });
        assert!(parser.parse("test", &["+ Hello"]).is_err());
    }

    #[test]
    fn strict_rejects_malformed_condition() {
        let err = strict()
            .parse("test", &["+ test", "* not a condition"])
            .unwrap_err();
        assert!(matches!(err, ParserError::Syntax { .. }));
    }

    #[test]
    fn lenient_mode_skips_bad_lines() {
        let ast = parse(&["+ hello (world", "- hi", "+ hello world", "- hey"]);
        // The malformed trigger is dropped; its reply has nothing to attach
        // to, and parsing continues with the next trigger.
        let triggers = &ast.topics["random"].triggers;
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].pattern, "hello world");
        assert_eq!(triggers[0].replies, vec!["hey"]);
    }

    #[test]
    fn force_case_lowers_patterns_and_topics() {
        let parser = Parser::new(ParserConfig {
            force_case: true,
            ..ParserConfig::default()
        });
        let ast = parser
            .parse("test", &["> topic Games", "+ PLAY game", "- ok", "< topic"])
            .unwrap();
        assert!(ast.topics.contains_key("games"));
        assert_eq!(ast.topics["games"].triggers[0].pattern, "play game");
    }

    #[test]
    fn morpheme_preprocessor_runs_on_patterns() {
        let parser = Parser::new(ParserConfig {
            morpheme: MorphemeMode::Separation,
            preprocessor: Some(std::sync::Arc::new(|text: &str| {
                text.replace("인사말", "인사 말")
            })),
            ..ParserConfig::default()
        });
        let ast = parser.parse("test", &["+ 인사말", "- 안녕"]).unwrap();
        assert_eq!(ast.topics["random"].triggers[0].pattern, "인사 말");
    }

    #[test]
    fn redirect_attaches_to_trigger() {
        let ast = parse(&["+ hey", "@ hello bot"]);
        assert_eq!(
            ast.topics["random"].triggers[0].redirect.as_deref(),
            Some("hello bot")
        );
    }
}
