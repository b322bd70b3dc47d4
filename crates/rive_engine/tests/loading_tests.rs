//! Loading scripts from disk and merging multiple sources.

use std::fs;

use rive_engine::{Bot, Config};

#[test]
fn load_directory_picks_up_rive_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.rive"), "+ hello\n- hi from a\n").unwrap();
    fs::write(
        dir.path().join("b.rive"),
        "> topic extra\n+ inside\n- from b\n< topic\n",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "+ ignored\n- nope\n").unwrap();

    let mut bot = Bot::default();
    bot.load_directory(dir.path(), &[]).unwrap();
    bot.sort_replies().unwrap();

    assert_eq!(bot.reply("user", "hello").unwrap(), "hi from a");
    assert!(bot.topic_names().contains(&"extra".to_string()));
    // The .txt file was skipped.
    assert_eq!(
        bot.reply("user", "ignored").unwrap(),
        "ERR: No Reply Matched"
    );
}

#[test]
fn load_file_reports_missing_paths() {
    let mut bot = Bot::default();
    assert!(bot.load_file("/definitely/not/here.rive").is_err());
}

#[test]
fn later_sources_override_definitions() {
    let mut bot = Bot::default();
    bot.load_lines("first", &["! var mood = cheerful"]).unwrap();
    bot.load_lines("second", &["! var mood = grumpy"]).unwrap();
    assert_eq!(bot.variable("mood").as_deref(), Some("grumpy"));
}

#[test]
fn undef_deletes_a_definition() {
    let mut bot = Bot::default();
    bot.load_lines("first", &["! var mood = cheerful", "! global debug = true"])
        .unwrap();
    bot.load_lines("second", &["! var mood = <undef>"]).unwrap();
    assert_eq!(bot.variable("mood"), None);
    assert_eq!(bot.global("debug").as_deref(), Some("true"));
}

#[test]
fn triggers_merge_across_sources_into_one_topic() {
    let mut bot = Bot::default();
    bot.load_lines("first", &["+ hello", "- hi"]).unwrap();
    bot.load_lines("second", &["+ goodbye", "- bye"]).unwrap();
    bot.sort_replies().unwrap();

    assert_eq!(bot.reply("user", "hello").unwrap(), "hi");
    assert_eq!(bot.reply("user", "goodbye").unwrap(), "bye");
}

#[test]
fn strict_mode_propagates_parser_errors() {
    let mut bot = Bot::new(Config {
        strict: true,
        ..Config::default()
    });
    assert!(bot.stream("+ broken (trigger\n- nope").is_err());
}

#[test]
fn depth_global_adjusts_the_recursion_ceiling() {
    let bot = Bot::default();
    assert_eq!(bot.global("depth").as_deref(), Some("50"));
    bot.set_global("depth", Some("10"));
    assert_eq!(bot.global("depth").as_deref(), Some("10"));
    bot.set_global("depth", Some("not a number"));
    assert_eq!(bot.global("depth").as_deref(), Some("10"));
}

#[test]
fn infinite_redirects_stop_at_the_depth_limit() {
    let mut bot = Bot::default();
    bot.stream("+ ping\n@ pong\n+ pong\n@ ping").unwrap();
    bot.sort_replies().unwrap();
    assert_eq!(
        bot.reply("user", "ping").unwrap(),
        "ERR: Deep Recursion Detected"
    );
}
