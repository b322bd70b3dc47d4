use thiserror::Error;

use crate::parser::RS_VERSION;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParserError {
    #[error("syntax error at {filename} line {line}: {message}")]
    Syntax {
        filename: String,
        line: usize,
        message: String,
    },
    #[error(
        "unsupported script version {version} at {filename} line {line}: \
         this parser supports up to {RS_VERSION}"
    )]
    UnsupportedVersion {
        version: String,
        filename: String,
        line: usize,
    },
}
