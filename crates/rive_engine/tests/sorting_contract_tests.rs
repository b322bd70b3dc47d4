//! Contracts on the sorted match buffer.

use rive_engine::Bot;

fn sorted_bot(script: &str) -> Bot {
    let mut bot = Bot::default();
    bot.stream(script).unwrap();
    bot.sort_replies().unwrap();
    bot
}

const MIXED_SCRIPT: &str = "\
+ *
- s1
+ hello bot
- s2
+ hello *
- s3
+ hello [there] bot
- s4
+ good morning my friend
- s5
+ hi
- s6
+ _ told me to say hi
- s7
+ # plus #
- s8
+ * * *
- s9
";

#[test]
fn buffer_orders_by_specificity_then_words() {
    let bot = sorted_bot(MIXED_SCRIPT);
    let patterns = bot.sorted_patterns("random");

    let position = |needle: &str| {
        patterns
            .iter()
            .position(|p| p == needle)
            .unwrap_or_else(|| panic!("pattern {needle} missing from {patterns:?}"))
    };

    // Atomic triggers by word count, then the optioned one, then wildcard
    // classes, then pure wildcards by length.
    assert!(position("good morning my friend") < position("hello bot"));
    assert!(position("hello bot") < position("hi"));
    assert!(position("hi") < position("hello [there] bot"));
    assert!(position("hello [there] bot") < position("_ told me to say hi"));
    assert!(position("_ told me to say hi") < position("# plus #"));
    assert!(position("# plus #") < position("hello *"));
    assert!(position("hello *") < position("* * *"));
    assert!(position("* * *") < position("*"));
    assert_eq!(position("*"), patterns.len() - 1);
}

#[test]
fn no_later_entry_outranks_an_earlier_one() {
    // Rank each pattern with the documented priority scheme and check the
    // buffer never places a higher-ranked trigger after a lower-ranked one.
    fn class_rank(pattern: &str) -> usize {
        let words = rive_engine::strings::count_words(pattern, false);
        if pattern.contains('[') {
            1
        } else if pattern.contains('_') {
            if words > 0 {
                2
            } else {
                5
            }
        } else if pattern.contains('#') {
            if words > 0 {
                3
            } else {
                6
            }
        } else if pattern.contains('*') {
            if words > 0 {
                4
            } else {
                7
            }
        } else {
            0
        }
    }

    let bot = sorted_bot(MIXED_SCRIPT);
    let patterns = bot.sorted_patterns("random");
    for pair in patterns.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let (ra, rb) = (class_rank(a), class_rank(b));
        assert!(
            ra < rb
                || (ra == rb
                    && rive_engine::strings::count_words(a, false)
                        >= rive_engine::strings::count_words(b, false)),
            "{a} sorted before {b} but outranked by it"
        );
    }
}

#[test]
fn double_sort_is_a_noop() {
    let mut bot = Bot::default();
    bot.stream(MIXED_SCRIPT).unwrap();
    bot.sort_replies().unwrap();
    let first = bot.sorted_patterns("random");
    bot.sort_replies().unwrap();
    let second = bot.sorted_patterns("random");
    assert_eq!(first, second);
}

#[test]
fn includes_pool_at_equal_priority() {
    let bot = sorted_bot(
        "> topic main includes extra\n\
         + main trigger here\n\
         - m\n\
         < topic\n\
         > topic extra\n\
         + tiny\n\
         - e\n\
         < topic",
    );
    let patterns = bot.sorted_patterns("main");
    // Pooled triggers sort purely by specificity: the three-word trigger
    // from `main` outranks the one-word trigger from `extra`.
    assert_eq!(patterns, vec!["main trigger here", "tiny"]);
}

#[test]
fn inherits_layer_strictly_below() {
    let bot = sorted_bot(
        "> topic child inherits parent\n\
         + a\n\
         - c\n\
         < topic\n\
         > topic parent\n\
         + much longer parent trigger\n\
         - p\n\
         < topic",
    );
    let patterns = bot.sorted_patterns("child");
    // Despite having fewer words, the child's own trigger outranks anything
    // inherited.
    assert_eq!(patterns, vec!["a", "much longer parent trigger"]);
}

#[test]
fn thats_buffer_keys_on_the_previous_pattern() {
    let bot = sorted_bot(
        "+ knock knock\n\
         - who is there\n\
         + *\n\
         % who is there\n\
         - <star> who?",
    );
    assert_eq!(bot.sorted_that_patterns("random"), vec!["who is there"]);
}

#[test]
fn weights_bucket_above_everything() {
    let bot = sorted_bot(
        "+ very specific atomic trigger text\n\
         - a\n\
         + generic {weight=100}\n\
         - b",
    );
    let patterns = bot.sorted_patterns("random");
    assert_eq!(patterns[0], "generic {weight=100}");
}
