use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use rocket::{
    http::{
        impl_from_uri_param_identity,
        uri::fmt::{Path, UriDisplay},
    },
    request::FromParam,
};
use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// A globally unique, non-secret record identifier.
///
/// Ids are random 128-bit values, and always render as canonical hyphenated
/// lowercase text, both in storage and in URLs.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Id(Uuid);

impl Id {
    /// Generate a fresh random ID.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for Id {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "a UUID string")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse::<Id>().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(IdVisitor)
    }
}

impl<'a> FromParam<'a> for Id {
    type Error = uuid::Error;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse::<Id>()
    }
}

impl UriDisplay<Path> for Id {
    fn fmt(&self, formatter: &mut rocket::http::uri::fmt::Formatter<'_, Path>) -> fmt::Result {
        formatter.write_value(self.to_string())
    }
}

impl_from_uri_param_identity!([Path] Id);

/// Identifies a proposal within its assembly.
///
/// Unlike record IDs these have no fixed format: an administrator may give
/// proposals readable IDs such as `P1`. Fresh proposals get random ones.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProposalId(String);

impl ProposalId {
    /// Generate a fresh random proposal ID.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Id::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProposalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
#[error("proposal ID must not be empty")]
pub struct EmptyProposalId;

impl FromStr for ProposalId {
    type Err = EmptyProposalId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(EmptyProposalId);
        }
        Ok(Self(s.to_string()))
    }
}

impl Serialize for ProposalId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProposalId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let id = String::deserialize(deserializer)?;
        id.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ids_are_unique() {
        let ids = (0..10_000).map(|_| Id::new()).collect::<HashSet<_>>();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn text_form_is_canonical() {
        let id: Id = "67E55044-10B1-426F-9247-BB680E5FE0C8".parse().unwrap();
        assert_eq!(id.to_string(), "67e55044-10b1-426f-9247-bb680e5fe0c8");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"67e55044-10b1-426f-9247-bb680e5fe0c8\"");
        assert_eq!(serde_json::from_str::<Id>(&json).unwrap(), id);
    }

    #[test]
    fn proposal_ids_are_free_form() {
        let id: ProposalId = "P1".parse().unwrap();
        assert_eq!(id.as_str(), "P1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"P1\"");
        assert_eq!(serde_json::from_str::<ProposalId>("\"P1\"").unwrap(), id);

        assert!("".parse::<ProposalId>().is_err());
        assert!(serde_json::from_str::<ProposalId>("\"\"").is_err());
        assert!(serde_json::from_str::<ProposalId>("1").is_err());
        assert_ne!(ProposalId::new(), ProposalId::new());
    }

    #[test]
    fn rejects_garbage() {
        assert!("../../etc/passwd".parse::<Id>().is_err());
        assert!(serde_json::from_str::<Id>("\"not-a-uuid\"").is_err());
        assert!(serde_json::from_str::<Id>("42").is_err());
    }
}
