use crate::core::errors::{RecognitionError, RecognitionResult};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Immutable token table for the generation model.
///
/// One token per non-blank line; a token's id is its position among the
/// non-blank lines.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: HashMap<String, usize>,
}

impl Vocabulary {
    pub fn from_file(path: &Path) -> RecognitionResult<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|source| RecognitionError::VocabularyLoad {
                path: path.display().to_string(),
                source,
            })?;
        let vocab = Self::parse(&content)?;
        debug!("Loaded vocabulary: {} tokens from {}", vocab.len(), path.display());
        Ok(vocab)
    }

    pub fn parse(content: &str) -> RecognitionResult<Self> {
        let tokens = content
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty())
            .map(str::to_string);
        Self::from_tokens(tokens)
    }

    pub fn from_tokens<I, S>(tokens: I) -> RecognitionResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        if tokens.is_empty() {
            return Err(RecognitionError::EmptyVocabulary);
        }

        let mut ids = HashMap::with_capacity(tokens.len());
        for (id, token) in tokens.iter().enumerate() {
            // First occurrence wins for reverse lookups
            ids.entry(token.clone()).or_insert(id);
        }

        Ok(Self { tokens, ids })
    }

    pub fn get(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    pub fn id_of(&self, token: &str) -> Option<usize> {
        self.ids.get(token).copied()
    }

    /// First of `names` present in the table, else `fallback`
    pub fn resolve(&self, names: &[&str], fallback: usize) -> usize {
        names
            .iter()
            .find_map(|name| self.id_of(name))
            .unwrap_or(fallback)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_do_not_consume_ids() {
        let vocab = Vocabulary::parse("[PAD]\n\n[UNK]\r\n  \nab\n").unwrap();
        assert_eq!(vocab.len(), 3);
        assert_eq!(vocab.get(1), Some("[UNK]"));
        assert_eq!(vocab.get(2), Some("ab"));
        assert_eq!(vocab.id_of("ab"), Some(2));
    }

    #[test]
    fn empty_vocabulary_is_an_error() {
        assert!(matches!(
            Vocabulary::parse("\n\n"),
            Err(RecognitionError::EmptyVocabulary)
        ));
    }

    #[test]
    fn resolve_prefers_earlier_names() {
        let vocab = Vocabulary::from_tokens(["[PAD]", "[BOS]", "[CLS]"]).unwrap();
        assert_eq!(vocab.resolve(&["[CLS]", "[BOS]"], 9), 2);
        assert_eq!(vocab.resolve(&["[S]"], 9), 9);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = Vocabulary::from_file(Path::new("no/such/vocab.txt")).unwrap_err();
        assert!(err.to_string().contains("no/such/vocab.txt"));
    }
}
