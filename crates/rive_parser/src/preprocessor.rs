//! Pluggable message preprocessing.

/// A morpheme analyzer (or any other text normalizer) applied to trigger
/// patterns at parse time and to user messages before matching.
///
/// Implementations receive one UTF-8 string and return the normalized form,
/// typically with morphemes separated by single spaces. The engine treats the
/// output as opaque text; lowercasing still happens afterwards.
pub trait Preprocessor: Send + Sync {
    fn analyze(&self, text: &str) -> String;
}

impl<F> Preprocessor for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn analyze(&self, text: &str) -> String {
        self(text)
    }
}
