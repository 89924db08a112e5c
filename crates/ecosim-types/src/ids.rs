//! Type-safe identifier wrappers.
//!
//! Every entity in the game has a strongly-typed ID to prevent accidental
//! mixing of identifiers at compile time. Game entities (zones, species,
//! trophic-network nodes, players, groups, jobs) use integer keys assigned
//! by the game database. Simulation backends hand out opaque string handles
//! for the resources they allocate.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around an integer key with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident($inner:ty)
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub $inner);

        impl $name {
            /// Create an identifier from its raw key.
            pub const fn new(raw: $inner) -> Self {
                Self(raw)
            }

            /// Return the inner raw key.
            pub const fn into_inner(self) -> $inner {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

/// Generates a newtype wrapper around an opaque backend-issued handle.
macro_rules! define_handle {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap a raw handle string.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw handle string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the backend returned an empty handle.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }
    };
}

define_id! {
    /// Unique identifier for a playable zone (ecosystem instance).
    ZoneId(i32)
}

define_id! {
    /// Unique identifier for a species template.
    SpeciesId(i32)
}

define_id! {
    /// Unique identifier for a compartment in the trophic network.
    NodeId(i32)
}

define_id! {
    /// Unique identifier for a player.
    PlayerId(i32)
}

define_id! {
    /// Unique identifier for a group of organisms within a zone-local species.
    GroupId(i32)
}

define_id! {
    /// Unique identifier for a persisted simulation job.
    JobId(i64)
}

define_handle! {
    /// Handle for a manipulation session allocated by a simulation backend.
    ManipulationId
}

define_handle! {
    /// Handle for a network resource allocated by a simulation backend.
    NetworkId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display_matches_raw_key() {
        let id = SpeciesId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!(id.into_inner(), 42);
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&NodeId::new(7)).ok();
        assert_eq!(json.as_deref(), Some("7"));

        let handle = serde_json::to_string(&ManipulationId::from("m-1")).ok();
        assert_eq!(handle.as_deref(), Some("\"m-1\""));
    }

    #[test]
    fn empty_handle_is_detected() {
        assert!(NetworkId::from("").is_empty());
        assert!(!NetworkId::from("net-9").is_empty());
    }
}
