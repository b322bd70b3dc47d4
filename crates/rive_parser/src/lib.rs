//! Line parser for reply-script documents.
//!
//! Turns raw script lines into the [`rive_ast`] model: topics, triggers,
//! replies, conditions, object macros and `!` definitions. Syntax problems
//! either abort parsing ([`ParserError`], strict mode) or are logged and
//! skipped.

mod config;
mod error;
mod parser;
mod preprocessor;

pub use config::{ConcatMode, MorphemeMode, ParserConfig};
pub use error::ParserError;
pub use parser::{Parser, RS_VERSION};
pub use preprocessor::Preprocessor;
