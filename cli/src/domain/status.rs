//! Workspace and machine status grammar.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::StatusError;

/// Lifecycle state reported by a provider.
///
/// The string grammar is case-insensitive; unrecognized strings are a parse
/// error, never a silent default — they indicate a provider contract
/// violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    NotFound,
    Stopped,
    Busy,
    Running,
}

impl FromStr for Status {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(StatusError::Empty);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "notfound" => Ok(Self::NotFound),
            "stopped" => Ok(Self::Stopped),
            "busy" => Ok(Self::Busy),
            "running" => Ok(Self::Running),
            _ => Err(StatusError::Unknown(trimmed.to_string())),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "NotFound",
            Self::Stopped => "Stopped",
            Self::Busy => "Busy",
            Self::Running => "Running",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("Running".parse::<Status>().expect("parse"), Status::Running);
        assert_eq!("running".parse::<Status>().expect("parse"), Status::Running);
        assert_eq!("RUNNING".parse::<Status>().expect("parse"), Status::Running);
        assert_eq!(
            "notfound".parse::<Status>().expect("parse"),
            Status::NotFound
        );
        assert_eq!("NotFound".parse::<Status>().expect("parse"), Status::NotFound);
        assert_eq!("Stopped".parse::<Status>().expect("parse"), Status::Stopped);
        assert_eq!("BUSY".parse::<Status>().expect("parse"), Status::Busy);
    }

    #[test]
    fn parse_trims_surrounding_whitespace() {
        assert_eq!(
            "  Running\n".parse::<Status>().expect("parse"),
            Status::Running
        );
    }

    #[test]
    fn parse_rejects_unknown_strings() {
        let err = "Paused".parse::<Status>().expect_err("expected Err");
        assert!(matches!(err, StatusError::Unknown(s) if s == "Paused"));
    }

    #[test]
    fn parse_rejects_empty_input() {
        assert!(matches!(
            "".parse::<Status>().expect_err("expected Err"),
            StatusError::Empty
        ));
        assert!(matches!(
            "  \n".parse::<Status>().expect_err("expected Err"),
            StatusError::Empty
        ));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for status in [Status::NotFound, Status::Stopped, Status::Busy, Status::Running] {
            let parsed = status.to_string().parse::<Status>().expect("parse");
            assert_eq!(parsed, status);
        }
    }
}
