//! Matching and tag evaluation: the reply side of the interpreter.
//!
//! Entry point is [`Bot::reply`]; the rest of this module is the machinery it
//! drives. Patterns compile to regexes on demand ([`Bot::trigger_regexp`])
//! because they can reference live state (`<bot name>`, `<get name>`,
//! history), so the same trigger can compile differently per user. Every
//! rewrite loop carries a giveup counter bounded by the configured depth.

use std::sync::Arc;

use regex::{NoExpand, Regex};
use tracing::{debug, warn};

use rive_ast::Trigger;
use rive_parser::MorphemeMode;
use rive_session::{HISTORY_SIZE, UNDEFINED};

use crate::bot::CurrentUserGuard;
use crate::config::{
    CANNOT_DIVIDE_BY_ZERO_KEY, CANNOT_MATH_VALUE_KEY, CANNOT_MATH_VARIABLE_KEY,
    DEEP_RECURSION_KEY, DEFAULT_TOPIC_NOT_FOUND_KEY, OBJECT_NOT_FOUND_KEY, REPLIES_NOT_SORTED_KEY,
    REPLY_NOT_FOUND_KEY, REPLY_NOT_MATCHED_KEY,
};
use crate::regexp::{
    RE_ANY_TAG, RE_ARRAY, RE_BOT_VAR, RE_CALL, RE_CONDITION, RE_DUMMY_ARRAY, RE_EMPTY_PIPES,
    RE_FMT_FORMAL, RE_FMT_LOWERCASE, RE_FMT_PERSON, RE_FMT_SENTENCE, RE_FMT_UPPERCASE,
    RE_META, RE_OPTIONAL, RE_PIPE_AFTER_OPEN, RE_PIPE_BEFORE_CLOSE, RE_PLACEHOLDER, RE_RANDOM,
    RE_REDIRECT, RE_SET, RE_SPACES, RE_SYMBOLS, RE_TOPIC, RE_USER_VAR, RE_WEIGHT,
    RE_WEIGHT_PADDED, RE_ZERO_WIDTH_STAR,
};
use crate::strings::{formal_case, is_atomic, parse_call_args, sentence_case, strip_nasties};
use crate::{Bot, RiveError};

/// Stands in for a literal `\_` while `_` is rewritten to a wildcard.
const LITERAL_UNDERSCORE: char = '\u{1}';

impl Bot {
    /// Return the bot's reply to a user message.
    ///
    /// With `throw_exceptions` off (the default), fatal conditions come back
    /// as the configured error text in `Ok`; otherwise they are
    /// [`RiveError`]s.
    pub fn reply(&self, username: &str, message: &str) -> Result<String, RiveError> {
        debug!("Asked to reply to [{}] {}", username, message);

        // Bound the current user to this thread for object macros; the guard
        // clears it again on every exit path.
        let _guard = CurrentUserGuard::bind(username);

        self.sessions.init(username);

        let message = self.format_message(message, false)?;

        // The BEGIN block, when present, wraps every exchange: its reply is
        // evaluated first and `{ok}` splices in the real answer.
        let reply = if self.topics.contains_key("__begin__") {
            let mut begin = self.get_reply(username, "request", true, 0)?;
            if begin.contains("{ok}") {
                let answer = self.get_reply(username, &message, false, 0)?;
                begin = begin.replace("{ok}", &answer);
            }
            self.process_tags(username, &message, &begin, &[], &[], 0)?
        } else {
            self.get_reply(username, &message, false, 0)?
        };

        self.sessions.add_history(username, &message, &reply);
        debug!("Replied [{}] to [{}]", reply, username);

        Ok(reply)
    }

    /// Match one (possibly redirected) message and build the reply text.
    fn get_reply(
        &self,
        username: &str,
        message: &str,
        is_begin: bool,
        step: usize,
    ) -> Result<String, RiveError> {
        if self.sorted.is_empty() {
            warn!("You forgot to call sort_replies()!");
            let text = self.error_messages.get(REPLIES_NOT_SORTED_KEY);
            if self.throw_exceptions {
                return Err(RiveError::RepliesNotSorted(text));
            }
            return Ok(text);
        }

        let mut topic = self
            .sessions
            .get(username, "topic")
            .unwrap_or_else(|| "random".to_string());

        if !self.topics.contains_key(&topic) {
            warn!("User {} was in an empty topic named '{}'", username, topic);
            topic = "random".to_string();
            self.sessions.set(username, "topic", Some("random"));
        }

        if self.check_deep_recursion(step, "Deep recursion while getting reply!")? {
            return Ok(self.error_messages.get(DEEP_RECURSION_KEY));
        }

        if is_begin {
            topic = "__begin__".to_string();
        }

        if !self.topics.contains_key(&topic) {
            // Topic was already reset to random above, so random is missing.
            let text = self.error_messages.get(DEFAULT_TOPIC_NOT_FOUND_KEY);
            if self.throw_exceptions {
                return Err(RiveError::NoDefaultTopic(text));
            }
            return Ok(text);
        }

        let mut stars: Vec<String> = Vec::new();
        let mut bot_stars: Vec<String> = Vec::new();
        let mut matched: Option<Arc<Trigger>> = None;
        let mut matched_trigger: Option<String> = None;
        let mut reply = String::new();

        // %Previous matching, only on the very first step: inside a
        // redirection the last reply hasn't changed, and re-matching it
        // would loop forever.
        if step == 0 {
            let composed = self
                .includes
                .get(&topic)
                .is_some_and(|set| !set.is_empty())
                || self.inherits.get(&topic).is_some_and(|set| !set.is_empty());
            let all_topics = if composed {
                self.get_topic_tree(&topic, 0)?
            } else {
                vec![topic.clone()]
            };

            for top in &all_topics {
                debug!("Checking topic {} for any %Previous's", top);
                if self.sorted.thats(top).is_empty() {
                    continue;
                }
                debug!("There's a %Previous in this topic!");

                let last_reply = self
                    .sessions
                    .get_history(username)
                    .map(|history| history.reply(0).to_string())
                    .unwrap_or_else(|| UNDEFINED.to_string());
                let last_reply = self.format_message(&last_reply, true)?;
                debug!("Bot's last reply: {}", last_reply);

                for entry in self.sorted.thats(top) {
                    let Some(previous) = entry.pointer.previous.as_deref() else {
                        continue;
                    };
                    let bot_side = self.trigger_regexp(username, previous)?;
                    debug!("Try to match lastReply {} to {} ({})", last_reply, previous, bot_side);

                    let re = match Regex::new(&format!("^{bot_side}$")) {
                        Ok(re) => re,
                        Err(err) => {
                            warn!("Failed to compile %Previous pattern '{}': {}", previous, err);
                            continue;
                        }
                    };
                    let Some(caps) = re.captures(&last_reply) else {
                        continue;
                    };
                    debug!("Bot side matched!");

                    bot_stars = caps
                        .iter()
                        .skip(1)
                        .map(|m| m.map(|m| m.as_str()).unwrap_or("").to_string())
                        .collect();

                    // Now our side: does the user's message fit the trigger?
                    let user_side = entry.pointer.clone();
                    let regexp = self.trigger_regexp(username, &user_side.pattern)?;
                    debug!("Try to match {} against {} ({})", message, user_side.pattern, regexp);

                    let mut is_match = false;
                    if is_atomic(&user_side.pattern) {
                        is_match = message == regexp;
                    } else if let Ok(re) = Regex::new(&format!("^{regexp}$")) {
                        if let Some(caps) = re.captures(message) {
                            is_match = true;
                            stars = caps
                                .iter()
                                .skip(1)
                                .map(|m| m.map(|m| m.as_str()).unwrap_or("").to_string())
                                .collect();
                        }
                    }

                    if is_match {
                        matched_trigger = Some(user_side.pattern.clone());
                        matched = Some(user_side);
                        break;
                    }
                }
            }
        }

        // Ordinary matching against the topic's sorted buffer.
        if matched.is_none() {
            debug!("Searching their topic for a match...");
            for entry in self.sorted.topic(&topic) {
                let pattern = &entry.trigger;
                let regexp = self.trigger_regexp(username, pattern)?;
                debug!("Try to match \"{}\" against {} ({})", message, pattern, regexp);

                let mut is_match = false;
                if is_atomic(pattern) && message == regexp {
                    is_match = true;
                } else if let Ok(re) = Regex::new(&format!("^{regexp}$")) {
                    if let Some(caps) = re.captures(message) {
                        is_match = true;
                        stars = caps
                            .iter()
                            .skip(1)
                            .map(|m| m.map(|m| m.as_str()).unwrap_or("").to_string())
                            .collect();
                    }
                }

                if is_match {
                    debug!("Found a match!");
                    matched = Some(entry.pointer.clone());
                    matched_trigger = Some(pattern.clone());
                    break;
                }
            }
        }

        self.sessions
            .set_last_match(username, matched_trigger.as_deref());

        if let Some(matched) = &matched {
            if let Some(redirect) = matched.redirect.as_deref().filter(|r| !r.is_empty()) {
                // Hard redirect: pretend the user said the target.
                debug!("Redirecting us to {}", redirect);
                let redirect =
                    self.process_tags(username, message, redirect, &stars, &bot_stars, 0)?;
                let redirect = redirect.to_lowercase();
                debug!("Pretend user said: {}", redirect);
                reply = self.get_reply(username, &redirect, is_begin, step + 1)?;
            } else {
                for row in &matched.conditions {
                    let halves: Vec<&str> = row.split("=>").collect();
                    if halves.len() != 2 {
                        continue;
                    }
                    let Some(caps) = RE_CONDITION.captures(halves[0].trim()) else {
                        continue;
                    };

                    let mut left = self.process_tags(
                        username,
                        message,
                        caps[1].trim(),
                        &stars,
                        &bot_stars,
                        step,
                    )?;
                    let op = caps[2].to_string();
                    let mut right = self.process_tags(
                        username,
                        message,
                        caps[3].trim(),
                        &stars,
                        &bot_stars,
                        step,
                    )?;

                    if left.is_empty() {
                        left = UNDEFINED.to_string();
                    }
                    if right.is_empty() {
                        right = UNDEFINED.to_string();
                    }
                    debug!("Check if {} {} {}", left, op, right);

                    let passed = match op.as_str() {
                        "eq" | "==" => left == right,
                        "ne" | "!=" | "<>" => left != right,
                        _ => match (left.parse::<i64>(), right.parse::<i64>()) {
                            (Ok(l), Ok(r)) => match op.as_str() {
                                "<" => l < r,
                                "<=" => l <= r,
                                ">" => l > r,
                                ">=" => l >= r,
                                _ => false,
                            },
                            _ => {
                                warn!("Failed to evaluate numeric condition!");
                                false
                            }
                        },
                    };

                    if passed {
                        reply = halves[1].trim().to_string();
                        break;
                    }
                }

                // No condition won: pick from the weighted reply pool.
                if reply.is_empty() {
                    let mut bucket: Vec<&String> = Vec::new();
                    for rep in &matched.replies {
                        match RE_WEIGHT.captures(rep) {
                            Some(caps) => {
                                let weight: i64 = caps[1].parse().ok().filter(|w| *w > 0).unwrap_or(1);
                                for _ in 0..weight {
                                    bucket.push(rep);
                                }
                            }
                            None => bucket.push(rep),
                        }
                    }
                    if !bucket.is_empty() {
                        reply = bucket[self.random_index(bucket.len())].clone();
                    }
                }
            }
        }

        if matched.is_none() {
            let text = self.error_messages.get(REPLY_NOT_MATCHED_KEY);
            if self.throw_exceptions {
                return Err(RiveError::ReplyNotMatched(text));
            }
            reply = text;
        } else if reply.is_empty() {
            let text = self.error_messages.get(REPLY_NOT_FOUND_KEY);
            if self.throw_exceptions {
                return Err(RiveError::ReplyNotFound(text));
            }
            reply = text;
        }

        debug!("Reply: {}", reply);

        if is_begin {
            // The BEGIN block may only set the topic and user vars; all other
            // tags survive for the outer processing pass.
            let mut giveup = 0;
            while let Some(caps) = RE_TOPIC.captures(&reply) {
                giveup += 1;
                if self.check_deep_recursion(giveup, "Infinite loop looking for topic tag!")? {
                    break;
                }
                let name = caps[1].to_string();
                self.sessions.set(username, "topic", Some(&name));
                let whole = caps[0].to_string();
                reply = reply.replace(&whole, "");
            }

            let mut giveup = 0;
            while let Some(caps) = RE_SET.captures(&reply) {
                giveup += 1;
                if self.check_deep_recursion(giveup, "Infinite loop looking for set tag!")? {
                    break;
                }
                let name = caps[1].to_string();
                let value = caps[2].to_string();
                self.sessions.set(username, &name, Some(&value));
                let whole = caps[0].to_string();
                reply = reply.replace(&whole, "");
            }
        } else {
            reply = self.process_tags(username, message, &reply, &stars, &bot_stars, 0)?;
        }

        Ok(reply)
    }

    /// Normalize a message for matching: morpheme separation, lowercasing,
    /// substitutions, punctuation stripping, whitespace collapsing.
    ///
    /// `bot_reply` applies the stricter bot-side cleanup used for `%Previous`
    /// matching. Formatting is idempotent.
    pub fn format_message(
        &self,
        message: &str,
        bot_reply: bool,
    ) -> Result<String, RiveError> {
        let mut message = message.to_string();

        if self.morpheme == MorphemeMode::Separation {
            if let Some(pre) = &self.preprocessor {
                message = pre.analyze(&message);
                debug!("Morpheme-separated message: {}", message);
            }
        }

        // Lowercasing after the morpheme step is idempotent either way.
        message = message.to_lowercase();
        message = self.substitute(&message, &self.sub, &self.sorted.sub)?;

        if self.utf8 {
            message = RE_META.replace_all(&message, "").into_owned();
            message = self
                .unicode_punctuation
                .replace_all(&message, "")
                .into_owned();
            if bot_reply {
                message = RE_SYMBOLS.replace_all(&message, "").into_owned();
            }
        } else {
            message = strip_nasties(&message);
        }

        message = message.trim().to_string();
        message = RE_SPACES.replace_all(&message, " ").into_owned();

        Ok(message)
    }

    /// Compile a trigger pattern into regex source text.
    ///
    /// The rewrites run in a fixed order; several consult live state (arrays,
    /// bot vars, user vars, history), which is why compilation happens at
    /// match time rather than at sort time.
    fn trigger_regexp(&self, username: &str, pattern: &str) -> Result<String, RiveError> {
        // A pattern of nothing but `*` has to match the empty string too.
        let mut pattern = RE_ZERO_WIDTH_STAR
            .replace_all(pattern, "<zerowidthstar>")
            .into_owned();

        // Protect literal \_ while plain _ becomes a wildcard.
        pattern = pattern.replace("\\_", &LITERAL_UNDERSCORE.to_string());
        pattern = pattern.replace('*', "(.+?)");
        pattern = pattern.replace('#', "(\\d+?)");
        pattern = pattern.replace('_', "(\\w+?)");
        pattern = pattern.replace(LITERAL_UNDERSCORE, "_");
        pattern = RE_WEIGHT_PADDED.replace_all(&pattern, "").into_owned();
        pattern = pattern.replace("<zerowidthstar>", "(.*?)");
        pattern = RE_EMPTY_PIPES.replace_all(&pattern, "|").into_owned();
        pattern = RE_PIPE_AFTER_OPEN.replace_all(&pattern, "$1").into_owned();
        pattern = RE_PIPE_BEFORE_CLOSE.replace_all(&pattern, "$1").into_owned();

        // Literal @ (as in an e-mail address) must not look like an array.
        if self.utf8 {
            pattern = pattern.replace("\\@", "\\u0040");
        }

        // Optionals become non-capturing alternations over their choices.
        let mut giveup = 0;
        while let Some(caps) = RE_OPTIONAL.captures(&pattern) {
            giveup += 1;
            if self.check_deep_recursion(
                giveup,
                "Infinite loop when trying to process optionals in a trigger!",
            )? {
                return Ok(String::new());
            }

            let inner = caps[1].to_string();
            let opts: Vec<String> = inner
                .split('|')
                .map(|part| format!("(?:\\s|\\b)+{part}(?:\\s|\\b)+"))
                .collect();

            // Wildcards inside an optional must not capture.
            let mut pipes = opts.join("|");
            pipes = pipes.replace("(.+?)", "(?:.+?)");
            pipes = pipes.replace("(\\d+?)", "(?:\\d+?)");
            pipes = pipes.replace("(\\w+?)", "(?:\\w+?)");
            let pipes = format!("(?:{pipes}|(?:\\s|\\b)+)");

            let bracketed = format!(r"\s*\[{}\]\s*", regex::escape(&inner));
            match Regex::new(&bracketed) {
                Ok(re) => {
                    pattern = re.replace_all(&pattern, NoExpand(&pipes)).into_owned();
                }
                Err(_) => {
                    let whole = caps[0].to_string();
                    pattern = pattern.replace(&whole, &pipes);
                }
            }
        }

        // `_` matches letters only: swap the broad \w class back out. Plain
        // [A-Za-z] fails outside ASCII, so exclude spaces and digits instead.
        pattern = pattern.replace("\\w", "[^\\s\\d]");

        // Array references expand to their current members.
        let mut giveup = 0;
        while let Some(caps) = RE_ARRAY.captures(&pattern) {
            giveup += 1;
            if self.check_deep_recursion(
                giveup,
                "Infinite loop when trying to process arrays in a trigger!",
            )? {
                break;
            }
            let name = caps[1].to_string();
            let rep = self
                .array
                .get(&name)
                .map(|items| format!("(?:{})", items.join("|")))
                .unwrap_or_default();
            let whole = caps[0].to_string();
            pattern = pattern.replace(&whole, &rep);
        }

        // Bot variables match by their current (sanitized) value.
        let mut giveup = 0;
        while let Some(caps) = RE_BOT_VAR.captures(&pattern) {
            giveup += 1;
            if self.check_deep_recursion(
                giveup,
                "Infinite loop when trying to process bot variables in a trigger!",
            )? {
                break;
            }
            let name = caps[1].to_string();
            let rep = {
                let vars = self.vars.read().expect("bot vars lock poisoned");
                vars.get(&name).map(|v| strip_nasties(v)).unwrap_or_default()
            };
            let whole = caps[0].to_string();
            pattern = pattern.replace(&whole, &rep.to_lowercase());
        }

        // User variables likewise; missing ones read "undefined".
        let mut giveup = 0;
        while let Some(caps) = RE_USER_VAR.captures(&pattern) {
            giveup += 1;
            if self.check_deep_recursion(
                giveup,
                "Infinite loop when trying to process user variables in a trigger!",
            )? {
                break;
            }
            let name = caps[1].to_string();
            let rep = self
                .sessions
                .get(username, &name)
                .unwrap_or_else(|| UNDEFINED.to_string());
            let whole = caps[0].to_string();
            pattern = pattern.replace(&whole, &rep.to_lowercase());
        }

        // <input>/<reply> history references.
        pattern = pattern.replace("<input>", "<input1>");
        pattern = pattern.replace("<reply>", "<reply1>");
        let mut giveup = 0;
        while pattern.contains("<input") || pattern.contains("<reply") {
            giveup += 1;
            if self.check_deep_recursion(
                giveup,
                "Infinite loop when trying to process input and reply tags in a trigger!",
            )? {
                break;
            }
            let history = self.sessions.get_history(username);
            for i in 1..=HISTORY_SIZE {
                let (input_value, reply_value) = match &history {
                    Some(history) => (
                        history.input(i - 1).to_string(),
                        history.reply(i - 1).to_string(),
                    ),
                    None => (UNDEFINED.to_string(), UNDEFINED.to_string()),
                };
                pattern = pattern.replace(&format!("<input{i}>"), &input_value);
                pattern = pattern.replace(&format!("<reply{i}>"), &reply_value);
            }
        }

        if self.utf8 {
            pattern = pattern.replace("\\u0040", "@");
        }

        Ok(pattern)
    }

    /// Evaluate the template tags in a reply element.
    ///
    /// `stars`/`bot_stars` are the wildcard captures from matching; index 0
    /// is reserved, so `<star>` reads index 1 and a missing capture reads
    /// `"undefined"`.
    fn process_tags(
        &self,
        username: &str,
        message: &str,
        reply: &str,
        star_captures: &[String],
        bot_star_captures: &[String],
        step: usize,
    ) -> Result<String, RiveError> {
        let mut stars = vec![String::new()];
        stars.extend(star_captures.iter().cloned());
        if stars.len() == 1 {
            stars.push(UNDEFINED.to_string());
        }
        let mut bot_stars = vec![String::new()];
        bot_stars.extend(bot_star_captures.iter().cloned());
        if bot_stars.len() == 1 {
            bot_stars.push(UNDEFINED.to_string());
        }

        let mut reply = reply.to_string();

        // Arrays in replies become {random} pools; unknown arrays round-trip
        // through an escaped placeholder so they survive verbatim.
        let mut giveup = 0;
        while let Some(caps) = RE_ARRAY.captures(&reply) {
            giveup += 1;
            if self.check_deep_recursion(giveup, "Infinite loop looking for arrays in reply!")? {
                break;
            }
            let name = caps[1].to_string();
            let result = match self.array.get(&name) {
                Some(items) => format!("{{random}}{}{{/random}}", items.join("|")),
                None => format!("\\x00@{name}\\x00"),
            };
            let whole = caps[0].to_string();
            reply = reply.replace(&whole, &result);
        }
        reply = RE_DUMMY_ARRAY.replace_all(&reply, "(@$1)").into_owned();

        // Legacy shortcut tags.
        reply = reply.replace("<person>", "{person}<star>{/person}");
        reply = reply.replace("<@>", "{@<star>}");
        reply = reply.replace("<formal>", "{formal}<star>{/formal}");
        reply = reply.replace("<sentence>", "{sentence}<star>{/sentence}");
        reply = reply.replace("<uppercase>", "{uppercase}<star>{/uppercase}");
        reply = reply.replace("<lowercase>", "{lowercase}<star>{/lowercase}");

        // Weight and star tags.
        reply = RE_WEIGHT.replace_all(&reply, "").into_owned();
        reply = reply.replace("<star>", &stars[1]);
        reply = reply.replace("<botstar>", &bot_stars[1]);
        for (i, star) in stars.iter().enumerate().skip(1) {
            reply = reply.replace(&format!("<star{i}>"), star);
        }
        for (i, star) in bot_stars.iter().enumerate().skip(1) {
            reply = reply.replace(&format!("<botstar{i}>"), star);
        }

        // <input>/<reply> history.
        reply = reply.replace("<input>", "<input1>");
        reply = reply.replace("<reply>", "<reply1>");
        if let Some(history) = self.sessions.get_history(username) {
            for i in 1..=HISTORY_SIZE {
                reply = reply.replace(&format!("<input{i}>"), history.input(i - 1));
                reply = reply.replace(&format!("<reply{i}>"), history.reply(i - 1));
            }
        }

        // <id> and escape codes.
        reply = reply.replace("<id>", username);
        reply = reply.replace("\\s", " ");
        reply = reply.replace("\\n", "\n");
        reply = reply.replace("\\#", "#");

        // {random} picks.
        let mut giveup = 0;
        while let Some(caps) = RE_RANDOM.captures(&reply) {
            giveup += 1;
            if self.check_deep_recursion(giveup, "Infinite loop looking for random tag!")? {
                break;
            }
            let text = caps[1].to_string();
            let options: Vec<&str> = if text.contains('|') {
                text.split('|').collect()
            } else {
                text.split(' ').collect()
            };
            let output = if options.is_empty() {
                ""
            } else {
                options[self.random_index(options.len())]
            };
            let whole = caps[0].to_string();
            reply = reply.replace(&whole, output);
        }

        // Person substitution and string formatting blocks.
        enum FormatKind {
            Person,
            Formal,
            Sentence,
            Uppercase,
            Lowercase,
        }
        let formats: [(&Regex, FormatKind); 5] = [
            (&*RE_FMT_PERSON, FormatKind::Person),
            (&*RE_FMT_FORMAL, FormatKind::Formal),
            (&*RE_FMT_SENTENCE, FormatKind::Sentence),
            (&*RE_FMT_UPPERCASE, FormatKind::Uppercase),
            (&*RE_FMT_LOWERCASE, FormatKind::Lowercase),
        ];
        for (re, kind) in formats {
            let mut giveup = 0;
            while let Some(caps) = re.captures(&reply) {
                giveup += 1;
                if self.check_deep_recursion(giveup, "Infinite loop looking for format tag!")? {
                    break;
                }
                let content = caps[1].to_string();
                let replacement = match kind {
                    FormatKind::Person => {
                        self.substitute(&content, &self.person, &self.sorted.person)?
                    }
                    FormatKind::Formal => formal_case(&content),
                    FormatKind::Sentence => sentence_case(&content),
                    FormatKind::Uppercase => content.to_uppercase(),
                    FormatKind::Lowercase => content.to_lowercase(),
                };
                let whole = caps[0].to_string();
                reply = reply.replace(&whole, &replacement);
            }
        }

        // Variable tags, innermost first so nesting like <set a=<get b>>
        // works. <call> bodies are parked out of the way first; their
        // arguments may legitimately contain other tags' syntax.
        reply = reply.replace("<call>", "{__call__}");
        reply = reply.replace("</call>", "{/__call__}");
        let mut giveup = 0;
        loop {
            giveup += 1;
            if self.check_deep_recursion(giveup, "Infinite loop looking for variable tags!")? {
                break;
            }
            let Some(caps) = RE_ANY_TAG.captures(&reply) else {
                break;
            };
            let whole = caps[0].to_string();
            let inner = caps[1].to_string();

            let (tag, data) = match inner.split_once(' ') {
                Some((tag, data)) => (tag.to_lowercase(), data.to_string()),
                None => (inner.to_lowercase(), String::new()),
            };
            let mut insert = String::new();

            match tag.as_str() {
                "bot" | "env" => match data.split_once('=') {
                    Some((name, value)) => {
                        debug!("Assign {} variable {} = {}", tag, name, value);
                        if tag == "bot" {
                            self.set_variable(name, Some(value));
                        } else {
                            self.set_global(name, Some(value));
                        }
                    }
                    None => {
                        let value = if tag == "bot" {
                            self.variable(&data)
                        } else {
                            self.global(&data)
                        };
                        insert = value.unwrap_or_else(|| UNDEFINED.to_string());
                    }
                },
                "set" => match data.split_once('=') {
                    Some((name, value)) => {
                        debug!("Set uservar {} = {}", name, value);
                        self.sessions.set(username, name, Some(value));
                    }
                    None => warn!("Malformed <set> tag: {}", inner),
                },
                "add" | "sub" | "mult" | "div" => match data.split_once('=') {
                    Some((name, value_str)) => {
                        let original = match self.sessions.get(username, name) {
                            Some(value) => value,
                            None => {
                                self.sessions.set(username, name, Some("0"));
                                "0".to_string()
                            }
                        };
                        match value_str.parse::<i64>() {
                            Ok(value) => match original.parse::<i64>() {
                                Ok(mut result) => match tag.as_str() {
                                    "div" if value == 0 => {
                                        warn!("Can't divide by zero");
                                        insert =
                                            self.error_messages.get(CANNOT_DIVIDE_BY_ZERO_KEY);
                                    }
                                    _ => {
                                        match tag.as_str() {
                                            "add" => result += value,
                                            "sub" => result -= value,
                                            "mult" => result *= value,
                                            _ => result /= value,
                                        }
                                        self.sessions.set(
                                            username,
                                            name,
                                            Some(&result.to_string()),
                                        );
                                    }
                                },
                                Err(_) => {
                                    warn!("Math can't {} non-numeric variable {}", tag, name);
                                    insert = self.error_messages.get(CANNOT_MATH_VARIABLE_KEY);
                                }
                            },
                            Err(_) => {
                                warn!("Math can't {} non-numeric value {}", tag, value_str);
                                insert = self.error_messages.get(CANNOT_MATH_VALUE_KEY);
                            }
                        }
                    }
                    None => warn!("Malformed <{}> tag: {}", tag, inner),
                },
                "get" => {
                    insert = self
                        .sessions
                        .get(username, &data)
                        .unwrap_or_else(|| UNDEFINED.to_string());
                }
                _ => {
                    // Unrecognized: escape it so the loop can terminate, and
                    // restore the angle brackets afterwards.
                    insert = format!("\\x00{inner}\\x01");
                }
            }

            reply = reply.replace(&whole, &insert);
        }
        reply = reply.replace("\\x00", "<");
        reply = reply.replace("\\x01", ">");

        // Topic setter.
        let mut giveup = 0;
        while let Some(caps) = RE_TOPIC.captures(&reply) {
            giveup += 1;
            if self.check_deep_recursion(giveup, "Infinite loop looking for topic tag!")? {
                break;
            }
            let name = caps[1].to_string();
            self.sessions.set(username, "topic", Some(&name));
            let whole = caps[0].to_string();
            reply = reply.replace(&whole, "");
        }

        // Inline redirections.
        let mut giveup = 0;
        while let Some(caps) = RE_REDIRECT.captures(&reply) {
            giveup += 1;
            if self.check_deep_recursion(giveup, "Infinite loop looking for redirect tag!")? {
                break;
            }
            let target = caps[1].trim().to_string();
            debug!("Inline redirection to: {}", target);
            let sub_reply = self.get_reply(username, &target, false, step + 1)?;
            let whole = caps[0].to_string();
            reply = reply.replace(&whole, &sub_reply);
        }

        // Object macro calls, last so their output is final.
        reply = reply.replace("{__call__}", "<call>");
        reply = reply.replace("{/__call__}", "</call>");
        let mut giveup = 0;
        while let Some(caps) = RE_CALL.captures(&reply) {
            giveup += 1;
            if self.check_deep_recursion(giveup, "Infinite loop looking for call tag!")? {
                break;
            }
            let text = caps[1].trim().to_string();
            let (name, args_text) = match text.split_once(' ') {
                Some((name, rest)) => (name.to_string(), rest.to_string()),
                None => (text, String::new()),
            };
            let args = parse_call_args(&args_text);

            let output = if let Some(subroutine) = self.subroutines.get(&name) {
                subroutine.call(self, &args).unwrap_or_default()
            } else if let Some(language) = self.object_languages.get(&name) {
                match self.handlers.get(language) {
                    Some(handler) => handler.call(self, &name, &args).unwrap_or_default(),
                    None => self.error_messages.get(OBJECT_NOT_FOUND_KEY),
                }
            } else {
                self.error_messages.get(OBJECT_NOT_FOUND_KEY)
            };

            let whole = caps[0].to_string();
            reply = reply.replace(&whole, &output);
        }

        Ok(reply)
    }

    /// Word-for-word substitution with placeholder protection, so a
    /// substituted value is never substituted again.
    fn substitute(
        &self,
        message: &str,
        subs: &std::collections::HashMap<String, String>,
        sorted_keys: &[String],
    ) -> Result<String, RiveError> {
        if subs.is_empty() {
            return Ok(message.to_string());
        }

        let mut message = message.to_string();
        let mut placeholders: Vec<String> = Vec::new();

        for (pi, key) in sorted_keys.iter().enumerate() {
            let result = subs.get(key).cloned().unwrap_or_default();
            let quoted = regex::escape(key);
            placeholders.push(result);
            let placeholder = format!("\\x00{pi}\\x00");

            // Full-word occurrences only: string edges or non-word runs on
            // both sides.
            let rewrites = [
                (format!("^{quoted}$"), placeholder.clone()),
                (format!(r"^{quoted}(\W+)"), format!("{placeholder}$1")),
                (
                    format!(r"(\W+){quoted}(\W+)"),
                    format!("$1{placeholder}$2"),
                ),
                (format!(r"(\W+){quoted}$"), format!("$1{placeholder}")),
            ];
            for (pattern, replacement) in rewrites {
                if let Ok(re) = Regex::new(&pattern) {
                    message = re.replace_all(&message, replacement.as_str()).into_owned();
                }
            }
        }

        // Resolve the placeholders; bounded in case a substitution value
        // itself contains placeholder-like text.
        let mut tries = 0;
        while message.contains("\\x00") {
            tries += 1;
            if self.check_deep_recursion(tries, "Too many loops in substitution placeholders!")? {
                break;
            }
            let Some(caps) = RE_PLACEHOLDER.captures(&message) else {
                break;
            };
            let index: usize = caps[1].parse().unwrap_or(0);
            let result = placeholders.get(index).cloned().unwrap_or_default();
            let whole = caps[0].to_string();
            message = message.replace(&whole, &result);
        }

        Ok(message)
    }

    /// The topic plus everything reachable over `includes`/`inherits`.
    fn get_topic_tree(&self, topic: &str, depth: usize) -> Result<Vec<String>, RiveError> {
        if self.check_deep_recursion(depth, "Deep recursion while scanning topic tree!")? {
            return Ok(Vec::new());
        }

        let mut topics = vec![topic.to_string()];
        if let Some(includes) = self.includes.get(topic) {
            for include in includes {
                topics.extend(self.get_topic_tree(include, depth + 1)?);
            }
        }
        if let Some(inherits) = self.inherits.get(topic) {
            for inherit in inherits {
                topics.extend(self.get_topic_tree(inherit, depth + 1)?);
            }
        }
        Ok(topics)
    }
}
