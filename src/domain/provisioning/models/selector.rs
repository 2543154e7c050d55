#[derive(Debug, thiserror::Error)]
pub enum DkimSelectorError {
    #[error("Selector cannot be empty.")]
    Empty,
    #[error(
        "Selector is too long (maximum allowed is {} characters).",
        DkimSelector::MAX_LENGTH
    )]
    TooLong,
    #[error("Selector contains forbidden characters: {0}")]
    ContainsForbiddenCharacters(String),
    #[error("Selector contains a path-traversal sequence: {0}")]
    PathTraversal(String),
}

/// A DKIM selector label. Becomes both a DNS label and a key file name, so
/// the charset is alphanumeric plus `._-` and traversal sequences are
/// rejected outright.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DkimSelector(String);

impl DkimSelector {
    const MAX_LENGTH: usize = 63;

    pub fn parse(s: String) -> Result<DkimSelector, DkimSelectorError> {
        if s.is_empty() {
            return Err(DkimSelectorError::Empty);
        }
        if s.len() > DkimSelector::MAX_LENGTH {
            return Err(DkimSelectorError::TooLong);
        }
        if s.contains("..") || s == "." {
            return Err(DkimSelectorError::PathTraversal(s));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
        {
            return Err(DkimSelectorError::ContainsForbiddenCharacters(s));
        }
        Ok(Self(s))
    }
}

impl AsRef<str> for DkimSelector {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DkimSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
