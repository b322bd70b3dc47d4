//! Interactive shell around the interpreter: load a script directory, sort,
//! then chat on stdin.

use anyhow::Context;
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use rive_engine::{Bot, Config, ThawAction};

#[derive(Debug, Parser)]
#[command(name = "rivelet", about = "Chat with a directory of reply scripts")]
struct Cli {
    /// Directory containing the script documents (.rive files).
    directory: String,

    /// Enable UTF-8 mode.
    #[arg(long)]
    utf8: bool,

    /// Abort on the first script syntax error.
    #[arg(long)]
    strict: bool,

    /// Lowercase all trigger patterns and topic names.
    #[arg(long)]
    force_case: bool,

    /// Recursion depth limit.
    #[arg(long, default_value_t = 50)]
    depth: usize,

    /// Username for the session.
    #[arg(long, default_value = "localuser")]
    user: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut bot = Bot::new(Config {
        utf8: cli.utf8,
        strict: cli.strict,
        force_case: cli.force_case,
        depth: cli.depth,
        ..Config::default()
    });

    bot.load_directory(&cli.directory, &[])
        .with_context(|| format!("loading scripts from {}", cli.directory))?;
    bot.sort_replies().context("sorting replies")?;

    println!("Scripts loaded from {}. Type /help for commands.", cli.directory);

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                match line {
                    "/quit" | "/exit" => break,
                    "/help" => {
                        println!("/quit          leave the shell");
                        println!("/topics        list loaded topics");
                        println!("/sorted NAME   dump a topic's match order");
                        println!("/freeze        snapshot your session vars");
                        println!("/thaw          restore the snapshot");
                        println!("/reset         clear your session");
                        continue;
                    }
                    "/topics" => {
                        for name in bot.topic_names() {
                            println!("  {}", name);
                        }
                        continue;
                    }
                    "/freeze" => {
                        bot.freeze_uservars(&cli.user);
                        println!("Session variables frozen.");
                        continue;
                    }
                    "/thaw" => {
                        bot.thaw_uservars(&cli.user, ThawAction::Thaw);
                        println!("Session variables restored.");
                        continue;
                    }
                    "/reset" => {
                        bot.clear_uservars(&cli.user);
                        println!("Session cleared.");
                        continue;
                    }
                    _ => {}
                }
                if let Some(topic) = line.strip_prefix("/sorted ") {
                    for pattern in bot.sorted_patterns(topic.trim()) {
                        println!("  + {}", pattern);
                    }
                    continue;
                }

                match bot.reply(&cli.user, line) {
                    Ok(reply) => println!("bot> {}", reply),
                    Err(err) => println!("err> {}", err),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}
