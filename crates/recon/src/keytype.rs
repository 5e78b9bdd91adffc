//! Reference-shape classification of key attributes.
//!
//! System B's column names carry the relational shape of a key: owner
//! references, address references and opaque document ids each join to a
//! fixed physical column on B. Everything else joins attribute to attribute.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyType {
    /// Composite owner / owner-type reference.
    Owner,
    Address,
    OpaqueId,
    /// Direct attribute equality.
    Generic,
}

pub const OWNER_COLUMN: &str = "owner_id";
pub const ADDRESS_COLUMN: &str = "address_id";
pub const OPAQUE_ID_COLUMN: &str = "did";

/// Classify an attribute name. Case-insensitive, first match wins:
/// `owner_id`/`owner_type_id`, then `address_id`, then `did`.
pub fn classify_key(name: &str) -> KeyType {
    let name = name.trim();
    if name.eq_ignore_ascii_case("owner_id") || name.eq_ignore_ascii_case("owner_type_id") {
        KeyType::Owner
    } else if name.eq_ignore_ascii_case(ADDRESS_COLUMN) {
        KeyType::Address
    } else if name.eq_ignore_ascii_case(OPAQUE_ID_COLUMN) {
        KeyType::OpaqueId
    } else {
        KeyType::Generic
    }
}

impl KeyType {
    /// Physical B column a key of this shape joins to.
    ///
    /// OWNER always targets `owner_id`, even when the mapped B attribute is
    /// `owner_type_id`: the mapped name is the classification signal, not
    /// the join column.
    pub fn join_target(self, mapped_b: &str) -> &str {
        match self {
            Self::Owner => OWNER_COLUMN,
            Self::Address => ADDRESS_COLUMN,
            Self::OpaqueId => OPAQUE_ID_COLUMN,
            Self::Generic => mapped_b,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "OWNER"),
            Self::Address => write!(f, "ADDRESS"),
            Self::OpaqueId => write!(f, "OPAQUE_ID"),
            Self::Generic => write!(f, "GENERIC"),
        }
    }
}
