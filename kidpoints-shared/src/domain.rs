use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KidId(pub i32);

impl fmt::Display for KidId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i32> for KidId {
    fn from(value: i32) -> Self {
        KidId(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GoalId(pub i32);

impl fmt::Display for GoalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i32> for GoalId {
    fn from(value: i32) -> Self {
        GoalId(value)
    }
}

/// Discriminant of a point transaction. Rewards carry positive deltas,
/// penalties negative ones; a zero delta is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Reward,
    Penalty,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Reward => "reward",
            TransactionKind::Penalty => "penalty",
        }
    }

    /// Whether `points` carries the sign this kind requires.
    pub fn allows_delta(self, points: i32) -> bool {
        match self {
            TransactionKind::Reward => points > 0,
            TransactionKind::Penalty => points < 0,
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown transaction kind: {0}")]
pub struct ParseKindError(String);

impl FromStr for TransactionKind {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reward" => Ok(TransactionKind::Reward),
            "penalty" => Ok(TransactionKind::Penalty),
            other => Err(ParseKindError(other.to_string())),
        }
    }
}
