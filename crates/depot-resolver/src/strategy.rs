use std::fmt;
use std::str::FromStr;

use crate::error::ResolveError;

/// Policy for transitive dependencies of an explicitly upgraded root: upgrade
/// them only when a constraint forces it, or always chase the latest
/// satisfying version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpgradeStrategy {
    Eager,
    #[default]
    OnlyIfNeeded,
}

impl UpgradeStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::OnlyIfNeeded => "only-if-needed",
        }
    }

    pub fn parse(token: &str) -> Result<Self, ResolveError> {
        match token {
            "eager" => Ok(Self::Eager),
            "only-if-needed" => Ok(Self::OnlyIfNeeded),
            _ => Err(ResolveError::InvalidStrategy {
                token: token.to_string(),
            }),
        }
    }
}

impl FromStr for UpgradeStrategy {
    type Err = ResolveError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Self::parse(token)
    }
}

impl fmt::Display for UpgradeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
