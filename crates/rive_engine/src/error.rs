use thiserror::Error;

use rive_parser::ParserError;

/// Fatal interpreter conditions.
///
/// These are only raised when [`crate::Config::throw_exceptions`] is on;
/// otherwise the corresponding keyed error message becomes the reply text.
/// The carried string is the (possibly overridden) configured message.
#[derive(Error, Debug)]
pub enum RiveError {
    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error("{0}")]
    DeepRecursion(String),

    #[error("{0}")]
    RepliesNotSorted(String),

    #[error("{0}")]
    NoDefaultTopic(String),

    #[error("{0}")]
    ReplyNotMatched(String),

    #[error("{0}")]
    ReplyNotFound(String),

    #[error("error reading script source: {0}")]
    Io(#[from] std::io::Error),
}
