use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_ENTITY_LEN: usize = 100;

/// Tracked search term, usually a disease name.
///
/// Surrounding whitespace is trimmed and inner runs of whitespace collapse to a
/// single space, so `" yellow   fever "` and `"yellow fever"` share cache keys.
/// Case is preserved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Entity(String);

impl Entity {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Err(ValidationError::EmptyEntity);
        }

        let len = normalized.chars().count();
        if len > MAX_ENTITY_LEN {
            return Err(ValidationError::EntityTooLong {
                len,
                max: MAX_ENTITY_LEN,
            });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Entity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Entity {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Entity> for String {
    fn from(value: Entity) -> Self {
        value.0
    }
}

/// Geographic scope: empty for worldwide, otherwise an ISO country code with an
/// optional subdivision (`GH`, `GH-AA`).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Geo(String);

impl Geo {
    pub fn worldwide() -> Self {
        Self(String::new())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Ok(Self::worldwide());
        }

        let (country, subdivision) = match normalized.split_once('-') {
            Some((country, subdivision)) => (country, Some(subdivision)),
            None => (normalized.as_str(), None),
        };

        let country_ok = country.len() == 2 && country.chars().all(|ch| ch.is_ascii_uppercase());
        let subdivision_ok = subdivision.map_or(true, |code| {
            (1..=3).contains(&code.len()) && code.chars().all(|ch| ch.is_ascii_alphanumeric())
        });
        if !country_ok || !subdivision_ok {
            return Err(ValidationError::InvalidGeo {
                value: input.to_owned(),
            });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_worldwide(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Geo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_worldwide() {
            f.write_str("worldwide")
        } else {
            f.write_str(self.as_str())
        }
    }
}

impl TryFrom<String> for Geo {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Geo> for String {
    fn from(value: Geo) -> Self {
        value.0
    }
}
