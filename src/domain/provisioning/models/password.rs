use secrecy::{ExposeSecret, Secret};
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    pub min_length: usize,
    /// How many of lowercase / uppercase / digit / symbol must appear.
    pub min_character_classes: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            min_length: 12,
            min_character_classes: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailboxPasswordError {
    #[error("Password is too short (minimum is {0} characters).")]
    TooShort(usize),
    #[error("Password must contain at least {0} character classes (lowercase, uppercase, digit, symbol).")]
    TooFewCharacterClasses(usize),
}

/// A plaintext mailbox password that satisfied the configured policy.
/// Only ever leaves this type through the hashing capability.
#[derive(Debug, Clone)]
pub struct MailboxPassword(Secret<String>);

impl MailboxPassword {
    pub fn parse(
        s: Secret<String>,
        policy: &PasswordPolicy,
    ) -> Result<MailboxPassword, MailboxPasswordError> {
        let raw = s.expose_secret();
        if raw.graphemes(true).count() < policy.min_length {
            return Err(MailboxPasswordError::TooShort(policy.min_length));
        }
        if character_classes(raw) < policy.min_character_classes {
            return Err(MailboxPasswordError::TooFewCharacterClasses(
                policy.min_character_classes,
            ));
        }
        Ok(Self(s))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

fn character_classes(s: &str) -> usize {
    let mut classes = 0;
    if s.chars().any(|c| c.is_ascii_lowercase()) {
        classes += 1;
    }
    if s.chars().any(|c| c.is_ascii_uppercase()) {
        classes += 1;
    }
    if s.chars().any(|c| c.is_ascii_digit()) {
        classes += 1;
    }
    if s.chars().any(|c| !c.is_ascii_alphanumeric()) {
        classes += 1;
    }
    classes
}
