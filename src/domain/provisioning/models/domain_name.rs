#[derive(Debug, thiserror::Error)]
pub enum DomainNameError {
    #[error("Domain name cannot be empty.")]
    Empty,
    #[error(
        "Domain name is too long (maximum allowed is {} characters).",
        DomainName::MAX_LENGTH
    )]
    TooLong,
    #[error("Domain name must contain at least two labels: {0}")]
    MissingLabels(String),
    #[error("Domain name contains an invalid label: {0}")]
    InvalidLabel(String),
    #[error("Domain name contains a path-traversal sequence: {0}")]
    PathTraversal(String),
}

/// A fully-qualified domain name in RFC-1035 syntax, lowercased on parse.
///
/// Parsed values later become filesystem path components (key directories,
/// maildir trees), so traversal sequences are rejected here explicitly even
/// though the label syntax already excludes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName(String);

impl DomainName {
    const MAX_LENGTH: usize = 253;
    const MAX_LABEL_LENGTH: usize = 63;

    pub fn parse(s: String) -> Result<DomainName, DomainNameError> {
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() {
            return Err(DomainNameError::Empty);
        }
        if s.len() > DomainName::MAX_LENGTH {
            return Err(DomainNameError::TooLong);
        }
        if contains_traversal(&s) {
            return Err(DomainNameError::PathTraversal(s));
        }
        let labels: Vec<&str> = s.split('.').collect();
        if labels.len() < 2 {
            return Err(DomainNameError::MissingLabels(s));
        }
        for label in &labels {
            if !is_valid_label(label) {
                return Err(DomainNameError::InvalidLabel(s.clone()));
            }
        }
        Ok(Self(s))
    }
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > DomainName::MAX_LABEL_LENGTH {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

pub(crate) fn contains_traversal(s: &str) -> bool {
    s.contains("..") || s.contains('/') || s.contains('\\') || s.contains('\0')
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DomainName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}
