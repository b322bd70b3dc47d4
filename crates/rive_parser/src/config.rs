//! Parser-level configuration.

use std::sync::Arc;

use crate::Preprocessor;

/// Separator used when a `^` continuation is glued to the previous line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcatMode {
    /// Join with nothing in between.
    #[default]
    None,
    /// Join with a newline.
    Newline,
    /// Join with a single space.
    Space,
}

impl ConcatMode {
    /// The literal separator for this mode.
    pub fn separator(self) -> &'static str {
        match self {
            ConcatMode::None => "",
            ConcatMode::Newline => "\n",
            ConcatMode::Space => " ",
        }
    }

    /// Look up a mode by its `! local concat = …` name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "none" => Some(ConcatMode::None),
            "newline" => Some(ConcatMode::Newline),
            "space" => Some(ConcatMode::Space),
            _ => None,
        }
    }
}

/// Whether trigger patterns and user messages run through the morpheme
/// [`Preprocessor`] before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MorphemeMode {
    #[default]
    NoSeparation,
    Separation,
}

/// Options consulted while parsing a script source.
#[derive(Clone, Default)]
pub struct ParserConfig {
    /// Raise a [`crate::ParserError`] on the first syntax error instead of
    /// logging and skipping the line.
    pub strict: bool,
    /// Relax the trigger character class for non-ASCII scripts.
    pub utf8: bool,
    /// Lowercase every `+` pattern and topic name.
    pub force_case: bool,
    /// Default continuation separator; `! local concat = …` overrides it
    /// per file.
    pub concat: ConcatMode,
    /// Morpheme preprocessing mode for `+` patterns.
    pub morpheme: MorphemeMode,
    /// The analyzer used when `morpheme` is [`MorphemeMode::Separation`].
    pub preprocessor: Option<Arc<dyn Preprocessor>>,
}

impl std::fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserConfig")
            .field("strict", &self.strict)
            .field("utf8", &self.utf8)
            .field("force_case", &self.force_case)
            .field("concat", &self.concat)
            .field("morpheme", &self.morpheme)
            .field("preprocessor", &self.preprocessor.is_some())
            .finish()
    }
}
