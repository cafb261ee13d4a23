//! Agent, memory, and vector point identifier types.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Identifier of the agent that owns a set of memories.
///
/// The agent id doubles as the partition key in the document store and as the
/// namespace of the agent's vector collection (see [`collection_name`]).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Generates a random agent identifier.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for AgentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<AgentId> for Uuid {
    fn from(value: AgentId) -> Self {
        value.0
    }
}

impl FromStr for AgentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::parse_str(s).map_err(Error::from)?;
        Ok(Self::from_uuid(uuid))
    }
}

/// Name of the vector collection holding an agent's points.
///
/// The name is the 32-character lowercase hex form of the agent id, so it is
/// stable across processes and safe to embed in URL paths.
#[must_use]
pub fn collection_name(agent: AgentId) -> String {
    agent.0.simple().to_string()
}

/// Identifier of a stored memory.
///
/// Memory ids are UUIDv7 values generated by the engine at creation time. Their
/// byte order (and therefore their `Ord` impl and their hyphenated string form)
/// follows creation order, which lets the id double as the list cursor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryId(Uuid);

impl MemoryId {
    /// Generates a fresh, creation-ordered memory identifier.
    ///
    /// Identifiers generated within one process are strictly increasing.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }

    /// Parses a list offset as supplied by callers.
    ///
    /// An empty string, `nil`, or `-1` selects the first page and yields `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMemoryId`] for any other input that is not a
    /// valid memory id.
    pub fn parse_offset(input: &str) -> Result<Option<Self>, Error> {
        match input.trim() {
            "" | "nil" | "-1" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl Display for MemoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for MemoryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|err| Error::InvalidMemoryId {
                input: s.to_owned(),
                reason: err.to_string(),
            })
    }
}

/// Identifier of a point in an agent's vector collection.
///
/// Point ids are opaque random UUIDs, assigned once at memory creation and kept
/// for the lifetime of the memory.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointId(Uuid);

impl PointId {
    /// Generates a random point identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl Display for PointId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for PointId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|err| Error::InvalidPointId {
                input: s.to_owned(),
                reason: err.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_agent_id() {
        let id = AgentId::random();
        let parsed = id.to_string().parse::<AgentId>().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn collection_name_is_stable_hex() {
        let agent = AgentId::random();
        let name = collection_name(agent);
        assert_eq!(name.len(), 32);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(name, collection_name(agent));
    }

    #[test]
    fn memory_ids_follow_creation_order() {
        let ids: Vec<MemoryId> = (0..64).map(|_| MemoryId::generate()).collect();
        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_string() < pair[1].to_string());
        }
    }

    #[test]
    fn offset_sentinels_select_first_page() {
        for input in ["", "nil", "-1", "  "] {
            assert_eq!(MemoryId::parse_offset(input).unwrap(), None);
        }

        let id = MemoryId::generate();
        assert_eq!(MemoryId::parse_offset(&id.to_string()).unwrap(), Some(id));
    }

    #[test]
    fn malformed_offset_is_rejected() {
        let err = MemoryId::parse_offset("not-an-id").expect_err("should fail");
        assert!(matches!(err, Error::InvalidMemoryId { .. }));
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = PointId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
