//! Caller roles and the capabilities they grant
//!
//! Checked at the HTTP boundary; the core only ever sees authorized calls.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Borrower,
    Investor,
    FieldOfficer,
    FieldValidator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ProposeLoan,
    Invest,
    ApproveLoan,
    DisburseLoan,
    ViewLoans,
}

impl Role {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::ProposeLoan => *self == Role::Borrower,
            Capability::Invest => *self == Role::Investor,
            Capability::ApproveLoan => *self == Role::FieldValidator,
            Capability::DisburseLoan => *self == Role::FieldOfficer,
            Capability::ViewLoans => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Borrower => "borrower",
            Role::Investor => "investor",
            Role::FieldOfficer => "field_officer",
            Role::FieldValidator => "field_validator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "borrower" => Ok(Role::Borrower),
            "investor" => Ok(Role::Investor),
            "field_officer" => Ok(Role::FieldOfficer),
            "field_validator" => Ok(Role::FieldValidator),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}
