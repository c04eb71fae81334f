//! Core identity types used throughout the system
//!
//! Every entity is keyed by a UUID, wrapped in a dedicated newtype so a loan
//! identity can never be passed where an investor identity is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identity
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Authenticated user identity (resolved to a borrower or investor profile)
    UserId
);
entity_id!(LoanId);
entity_id!(BorrowerId);
entity_id!(InvestorId);
entity_id!(
    /// Identity of an investment-intent event.
    ///
    /// The investment created by settling the event reuses this identity,
    /// which is what makes redelivery detectable.
    EventId
);
entity_id!(InvestmentId);
entity_id!(ApprovalId);
entity_id!(DisbursementId);

impl From<EventId> for InvestmentId {
    fn from(id: EventId) -> Self {
        Self(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_becomes_investment_id() {
        let event = EventId::new();
        let investment = InvestmentId::from(event);
        assert_eq!(event.as_uuid(), investment.as_uuid());
    }

    #[test]
    fn test_parse_and_display() {
        let id = LoanId::new();
        let parsed: LoanId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<LoanId>().is_err());
    }

    #[test]
    fn test_serde_is_transparent() {
        let id = InvestorId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
