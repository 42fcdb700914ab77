use std::{fmt, ops::Deref};

use borsh::BorshSerialize;
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, BorshSerialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.trim().to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from(value.as_str())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a requirement, unique within one design.
    RequirementId
);

string_id!(
    /// Identifier of a capability, unique within one facility.
    CapabilityId
);

string_id!(
    /// Identifier of a manufacturing facility.
    FacilityId
);

string_id!(
    /// Identifier of a design component.
    ComponentId
);

string_id!(
    /// Identifier of a design.
    DesignId
);

string_id!(
    /// Identifier of a workflow node inside a supply tree.
    NodeId
);

/// A problem domain, such as `manufacturing` or `cooking`.
///
/// Domain names are case-insensitive; they are stored trimmed and lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, BorshSerialize)]
#[serde(from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    /// Creates a domain from a raw name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    /// Returns the normalized domain name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Domain {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Domain {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<Domain> for String {
    fn from(value: Domain) -> Self {
        value.0
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_names_are_case_insensitive() {
        assert_eq!(Domain::new(" Manufacturing "), Domain::new("manufacturing"));
        assert_eq!(Domain::from("COOKING").as_str(), "cooking");
    }

    #[test]
    fn identifiers_are_trimmed() {
        let id = FacilityId::from("  fab-01 ");
        assert_eq!(id.as_str(), "fab-01");
        assert_eq!(id.to_string(), "fab-01");
    }
}
