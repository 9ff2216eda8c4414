//! Enrollee attribute validation.
//!
//! Validation is purely local: a rejected attribute set never produces a
//! store write. The rules are deliberately permissive; the desk operator
//! types these in while the member is standing at the counter.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Permissive phone character set: digits plus common separators.
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9+\-\s().]{7,20}$").expect("static regex is valid"));

const NAME_MIN_CHARS: usize = 2;
const NAME_MAX_CHARS: usize = 50;
const AGE_MIN: u8 = 1;
const AGE_MAX: u8 = 120;

/// Attributes captured at the desk for a new member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrolleeAttributes {
    /// Display name, required.
    pub name: String,
    /// Optional contact phone number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Optional age in years.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u8>,
}

impl EnrolleeAttributes {
    /// Attributes with only the required display name set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            age: None,
        }
    }

    /// Check every attribute; the first violated rule is returned.
    pub fn validate(&self) -> Result<(), AttributeError> {
        let name_chars = self.name.trim().chars().count();
        if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&name_chars) {
            return Err(AttributeError::NameLength { chars: name_chars });
        }
        if let Some(phone) = &self.phone {
            if !PHONE_RE.is_match(phone) {
                return Err(AttributeError::PhoneFormat);
            }
        }
        if let Some(age) = self.age {
            if !(AGE_MIN..=AGE_MAX).contains(&age) {
                return Err(AttributeError::AgeRange { age });
            }
        }
        Ok(())
    }
}

/// A violated attribute rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("display name must be {NAME_MIN_CHARS}-{NAME_MAX_CHARS} characters, got {chars}")]
    NameLength { chars: usize },

    #[error("phone number may only contain digits and common separators")]
    PhoneFormat,

    #[error("age must be between {AGE_MIN} and {AGE_MAX}, got {age}")]
    AgeRange { age: u8 },
}
