//! Identifier types.
//!
//! Every entity kind gets its own UUID newtype so that ids of different
//! kinds never interchange. The wire and storage representation is the
//! canonical hyphenated UUID string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            pub const fn uuid(&self) -> Uuid {
                self.0
            }

            /// The nil id, used as the "not set" marker in rule action
            /// params and lookups.
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// True if this is the nil id.
            pub fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// Parse from the canonical string form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::nil()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(
    /// Identifies one rule in the rule engine.
    RuleId
);
define_id!(
    /// Identifies one configured device.
    DeviceId
);
define_id!(
    /// Identifies an event type declared by a device class.
    EventTypeId
);
define_id!(
    /// Identifies an action type declared by a device class.
    ActionTypeId
);
define_id!(
    /// Identifies a state type declared by a device class.
    StateTypeId
);
define_id!(
    /// Identifies a parameter declaration inside an event, action or
    /// state type.
    ParamTypeId
);
define_id!(
    /// Identifies an issued bearer token (not the token secret itself).
    TokenId
);
define_id!(
    /// Identifies one push-button pairing transaction.
    PairingTransactionId
);
