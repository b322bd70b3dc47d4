//! The reply phase is shared-state safe across threads.

use std::thread;

use rive_engine::Bot;

#[test]
fn concurrent_replies_keep_sessions_isolated() {
    let mut bot = Bot::default();
    bot.stream(
        "+ my name is *\n\
         - <set name=<star>>noted\n\
         + who am i\n\
         - you are <get name>",
    )
    .unwrap();
    bot.sort_replies().unwrap();
    let bot = &bot;

    thread::scope(|scope| {
        for user in ["alice", "bob", "carol", "dave"] {
            scope.spawn(move || {
                for _ in 0..20 {
                    let intro = format!("my name is {user}");
                    assert_eq!(bot.reply(user, &intro).unwrap(), "noted");
                    assert_eq!(
                        bot.reply(user, "who am i").unwrap(),
                        format!("you are {user}")
                    );
                }
            });
        }
    });
}

#[test]
fn current_user_is_thread_scoped() {
    let mut bot = Bot::default();
    bot.set_subroutine(
        "whoami",
        Box::new(|bot: &Bot, _args: &[String]| bot.current_user()),
    );
    bot.stream("+ hello\n- <call>whoami</call>").unwrap();
    bot.sort_replies().unwrap();
    let bot = &bot;

    thread::scope(|scope| {
        for user in ["alice", "bob"] {
            scope.spawn(move || {
                for _ in 0..50 {
                    assert_eq!(bot.reply(user, "hello").unwrap(), user);
                }
            });
        }
    });
}
