//! Pool roles

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The role a pool plays in a replicated deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolRole {
    /// Primary that accepts writes (a "master")
    Writable,
    /// Replica that only serves reads (a "slave")
    ReadOnly,
}

impl PoolRole {
    /// Role matching the requested writability
    pub fn from_writable(writable: bool) -> Self {
        if writable {
            PoolRole::Writable
        } else {
            PoolRole::ReadOnly
        }
    }

    /// Stable upper-case name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolRole::Writable => "WRITABLE",
            PoolRole::ReadOnly => "READ_ONLY",
        }
    }
}

impl fmt::Display for PoolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "writable" | "master" | "primary" | "rw" => Ok(PoolRole::Writable),
            "read_only" | "readonly" | "slave" | "replica" | "ro" => Ok(PoolRole::ReadOnly),
            other => Err(format!(
                "unknown pool role '{other}', expected writable/master or read_only/slave"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing_accepts_aliases() {
        assert_eq!("master".parse::<PoolRole>(), Ok(PoolRole::Writable));
        assert_eq!("Replica".parse::<PoolRole>(), Ok(PoolRole::ReadOnly));
        assert_eq!("READ_ONLY".parse::<PoolRole>(), Ok(PoolRole::ReadOnly));
        assert!("arbiter".parse::<PoolRole>().is_err());
    }

    #[test]
    fn test_from_writable() {
        assert_eq!(PoolRole::from_writable(true), PoolRole::Writable);
        assert_eq!(PoolRole::from_writable(false), PoolRole::ReadOnly);
    }
}
