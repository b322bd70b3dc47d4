//! Reply-script interpreter.
//!
//! [`Bot`] is the facade: load script sources, call [`Bot::sort_replies`]
//! once, then serve [`Bot::reply`] from as many threads as needed. The crate
//! is split by concern the same way the pipeline flows:
//!
//! - [`config`]: interpreter options and the keyed error messages
//! - [`regexp`]: the pre-compiled pattern catalogue every stage shares
//! - [`strings`]: word counting and sanitizing helpers
//! - [`sorting`]: trigger collection and the multi-level match ordering
//! - [`brain`]: message formatting, matching and tag evaluation
//! - [`handler`]: object-macro language handlers and native subroutines
//!
//! Loading takes `&mut Bot` and replying takes `&Bot`, so the topic tables
//! and the sort buffer are immutable by construction once traffic starts.

mod bot;
mod brain;
mod config;
mod error;
mod handler;
pub mod regexp;
pub mod strings;
mod sorting;

pub use bot::{Bot, DEFAULT_FILE_EXTENSIONS};
pub use config::{
    Config, ErrorMessages, CANNOT_DIVIDE_BY_ZERO_KEY, CANNOT_MATH_VALUE_KEY,
    CANNOT_MATH_VARIABLE_KEY, DEEP_RECURSION_KEY, DEFAULT_TOPIC_NOT_FOUND_KEY,
    OBJECT_NOT_FOUND_KEY, REPLIES_NOT_SORTED_KEY, REPLY_NOT_FOUND_KEY, REPLY_NOT_MATCHED_KEY,
};
pub use error::RiveError;
pub use handler::{ObjectHandler, Subroutine};
pub use sorting::SortBuffer;

// Re-exported so embedders only need this crate.
pub use rive_parser::{ConcatMode, MorphemeMode, ParserConfig, ParserError, Preprocessor};
pub use rive_session::{
    History, MemorySessionManager, SessionManager, ThawAction, UserData, HISTORY_SIZE, UNDEFINED,
};
