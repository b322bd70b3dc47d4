//! Generative invariants over formatting, history and session state.

use std::collections::HashMap;

use proptest::prelude::*;

use rive_engine::{Bot, ThawAction, HISTORY_SIZE};

fn plain_bot() -> Bot {
    let mut bot = Bot::default();
    bot.stream("+ *\n- ok").unwrap();
    bot.sort_replies().unwrap();
    bot
}

proptest! {
    #[test]
    fn format_message_is_idempotent(message in "[A-Za-z0-9 ,.!?']{0,40}") {
        let bot = plain_bot();
        let once = bot.format_message(&message, false).unwrap();
        let twice = bot.format_message(&once, false).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn format_message_idempotent_with_substitutions(message in "[a-z' ]{0,40}") {
        let mut bot = Bot::default();
        bot.stream("! sub what's = what is\n! sub i'm = i am\n+ *\n- ok").unwrap();
        bot.sort_replies().unwrap();
        let once = bot.format_message(&message, false).unwrap();
        let twice = bot.format_message(&once, false).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn history_lengths_are_fixed(messages in prop::collection::vec("[a-z ]{1,20}", 1..15)) {
        let bot = plain_bot();
        for message in &messages {
            let _ = bot.reply("user", message);
            let data = bot.get_uservars("user").unwrap();
            prop_assert_eq!(data.history.input_len(), HISTORY_SIZE);
            prop_assert_eq!(data.history.reply_len(), HISTORY_SIZE);
        }
    }

    #[test]
    fn uservar_set_get_roundtrip(name in "[a-z]{1,10}", value in "[a-zA-Z0-9 ]{0,20}") {
        let bot = plain_bot();
        bot.set_uservar("user", &name, Some(&value));
        prop_assert_eq!(bot.get_uservar("user", &name), Some(value));
        bot.set_uservar("user", &name, None);
        prop_assert_eq!(bot.get_uservar("user", &name), None);
    }

    #[test]
    fn freeze_thaw_roundtrip(vars in prop::collection::hash_map("[a-z]{1,8}", "[a-z0-9]{0,12}", 0..6)) {
        let bot = plain_bot();
        let vars: HashMap<String, String> = vars;
        bot.set_uservars("user", vars.clone());
        bot.freeze_uservars("user");

        bot.set_uservar("user", "scratch", Some("mutated"));
        for name in vars.keys() {
            bot.set_uservar("user", name, Some("clobbered"));
        }

        bot.thaw_uservars("user", ThawAction::Thaw);
        let restored = bot.get_uservars("user").unwrap();
        prop_assert_eq!(restored.vars, vars);
    }
}
