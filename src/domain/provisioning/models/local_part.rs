use super::domain_name::{contains_traversal, DomainName, DomainNameError};

#[derive(Debug, thiserror::Error)]
pub enum LocalPartError {
    #[error("Local part cannot be empty.")]
    Empty,
    #[error("Local part contains forbidden characters: {0}")]
    ContainsForbiddenCharacters(String),
    #[error("Local part cannot start or end with a dot: {0}")]
    DotAtEdge(String),
    #[error("Local part contains a path-traversal sequence: {0}")]
    PathTraversal(String),
}

/// The part of an address before the `@`, restricted to the RFC-5322 atom
/// characters minus `/` — the value doubles as a maildir path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalPart(String);

impl LocalPart {
    const ATOM_SYMBOLS: [char; 17] = [
        '!', '#', '$', '%', '&', '\'', '*', '+', '-', '=', '?', '^', '_', '`', '{', '|', '}',
    ];

    pub fn parse(s: String) -> Result<LocalPart, LocalPartError> {
        if s.is_empty() {
            return Err(LocalPartError::Empty);
        }
        if contains_traversal(&s) {
            return Err(LocalPartError::PathTraversal(s));
        }
        if s.starts_with('.') || s.ends_with('.') {
            return Err(LocalPartError::DotAtEdge(s));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || LocalPart::ATOM_SYMBOLS.contains(&c))
        {
            return Err(LocalPartError::ContainsForbiddenCharacters(s));
        }
        Ok(Self(s))
    }
}

impl AsRef<str> for LocalPart {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LocalPart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmailAddressError {
    #[error("Email address must contain exactly one '@': {0}")]
    MissingAt(String),
    #[error(
        "Email address is too long (maximum allowed is {} characters).",
        EmailAddress::MAX_LENGTH
    )]
    TooLong,
    #[error("Invalid local part: {0}")]
    InvalidLocalPart(#[from] LocalPartError),
    #[error("Invalid domain: {0}")]
    InvalidDomain(#[from] DomainNameError),
}

/// A `local@domain` pair where both halves passed their own validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmailAddress {
    local: LocalPart,
    domain: DomainName,
}

impl EmailAddress {
    const MAX_LENGTH: usize = 254;

    pub fn parse(s: String) -> Result<EmailAddress, EmailAddressError> {
        if s.len() > EmailAddress::MAX_LENGTH {
            return Err(EmailAddressError::TooLong);
        }
        let (local, domain) = s
            .split_once('@')
            .filter(|(l, d)| !l.contains('@') && !d.contains('@'))
            .ok_or_else(|| EmailAddressError::MissingAt(s.clone()))?;
        Ok(Self {
            local: LocalPart::parse(local.to_string())?,
            domain: DomainName::parse(domain.to_string())?,
        })
    }

    pub fn new(local: LocalPart, domain: DomainName) -> Self {
        Self { local, domain }
    }

    pub fn local(&self) -> &LocalPart {
        &self.local
    }

    pub fn domain(&self) -> &DomainName {
        &self.domain
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}
