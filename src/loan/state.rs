//! Loan Lifecycle State Definitions
//!
//! ```text
//! PROPOSED ──approve──▶ APPROVED ──fully funded──▶ INVESTED ──disburse──▶ DISBURSED
//! ```
//!
//! Transitions are strictly forward and single-step. The state value is the
//! only authority for which operations are currently legal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i16)]
pub enum LoanState {
    /// Originated by a borrower, awaiting field validation
    Proposed = 0,
    /// Validated; open for investment
    Approved = 10,
    /// Remaining capacity reached zero
    Invested = 20,
    /// Terminal: funds handed to the borrower
    Disbursed = 30,
}

impl LoanState {
    pub const ALL: [LoanState; 4] = [
        LoanState::Proposed,
        LoanState::Approved,
        LoanState::Invested,
        LoanState::Disbursed,
    ];

    /// The only state reachable from this one
    pub fn successor(&self) -> Option<LoanState> {
        match self {
            LoanState::Proposed => Some(LoanState::Approved),
            LoanState::Approved => Some(LoanState::Invested),
            LoanState::Invested => Some(LoanState::Disbursed),
            LoanState::Disbursed => None,
        }
    }

    #[inline]
    pub fn can_transition_to(&self, next: LoanState) -> bool {
        self.successor() == Some(next)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.successor().is_none()
    }

    /// Investments are only accepted while approved
    #[inline]
    pub fn accepts_investment(&self) -> bool {
        *self == LoanState::Approved
    }

    /// PostgreSQL state ID
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(LoanState::Proposed),
            10 => Some(LoanState::Approved),
            20 => Some(LoanState::Invested),
            30 => Some(LoanState::Disbursed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanState::Proposed => "proposed",
            LoanState::Approved => "approved",
            LoanState::Invested => "invested",
            LoanState::Disbursed => "disbursed",
        }
    }
}

impl fmt::Display for LoanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "proposed" => Ok(LoanState::Proposed),
            "approved" => Ok(LoanState::Approved),
            "invested" => Ok(LoanState::Invested),
            "disbursed" => Ok(LoanState::Disbursed),
            other => Err(format!("unknown loan state: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_single_step_only() {
        assert!(LoanState::Proposed.can_transition_to(LoanState::Approved));
        assert!(LoanState::Approved.can_transition_to(LoanState::Invested));
        assert!(LoanState::Invested.can_transition_to(LoanState::Disbursed));

        // skipping
        assert!(!LoanState::Proposed.can_transition_to(LoanState::Invested));
        assert!(!LoanState::Approved.can_transition_to(LoanState::Disbursed));
    }

    #[test]
    fn test_no_backward_transition() {
        for from in LoanState::ALL {
            for to in LoanState::ALL {
                if to <= from {
                    assert!(!from.can_transition_to(to), "{} -> {}", from, to);
                }
            }
        }
    }

    #[test]
    fn test_terminal() {
        assert!(LoanState::Disbursed.is_terminal());
        assert!(!LoanState::Invested.is_terminal());
    }

    #[test]
    fn test_id_roundtrip() {
        for state in LoanState::ALL {
            assert_eq!(LoanState::from_id(state.id()), Some(state));
        }
        assert_eq!(LoanState::from_id(5), None);
    }

    #[test]
    fn test_parse() {
        for state in LoanState::ALL {
            assert_eq!(state.as_str().parse::<LoanState>().unwrap(), state);
        }
        assert_eq!("APPROVED".parse::<LoanState>().unwrap(), LoanState::Approved);
        assert!("funded".parse::<LoanState>().is_err());
    }
}
