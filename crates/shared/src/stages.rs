//! Fixed catalog of sales pipeline stages.
//!
//! The three open stages are totally ordered. `Won` and `Lost` are terminal
//! and share the last rank, so they compare as unordered against each other.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STAGE_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKey {
    Prospect,
    Proposal,
    Negotiation,
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown pipeline stage: {0:?}")]
pub struct UnknownStage(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub key: StageKey,
    pub order: u8,
    pub label: &'static str,
}

static STAGES: [Stage; STAGE_COUNT] = [
    Stage {
        key: StageKey::Prospect,
        order: 0,
        label: "Prospect",
    },
    Stage {
        key: StageKey::Proposal,
        order: 1,
        label: "Proposal",
    },
    Stage {
        key: StageKey::Negotiation,
        order: 2,
        label: "Negotiation",
    },
    Stage {
        key: StageKey::Won,
        order: 3,
        label: "Won",
    },
    Stage {
        key: StageKey::Lost,
        order: 3,
        label: "Lost",
    },
];

/// Stages in canonical display order.
pub fn stages() -> &'static [Stage] {
    &STAGES
}

pub fn stage(key: StageKey) -> &'static Stage {
    &STAGES[key.index()]
}

pub fn is_terminal(key: StageKey) -> bool {
    matches!(key, StageKey::Won | StageKey::Lost)
}

impl StageKey {
    pub const ALL: [StageKey; STAGE_COUNT] = [
        StageKey::Prospect,
        StageKey::Proposal,
        StageKey::Negotiation,
        StageKey::Won,
        StageKey::Lost,
    ];

    /// Dense position in [`stages`], usable as an array index.
    pub const fn index(self) -> usize {
        match self {
            StageKey::Prospect => 0,
            StageKey::Proposal => 1,
            StageKey::Negotiation => 2,
            StageKey::Won => 3,
            StageKey::Lost => 4,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            StageKey::Prospect => "prospect",
            StageKey::Proposal => "proposal",
            StageKey::Negotiation => "negotiation",
            StageKey::Won => "won",
            StageKey::Lost => "lost",
        }
    }

    pub fn label(self) -> &'static str {
        stage(self).label
    }

    pub fn is_terminal(self) -> bool {
        is_terminal(self)
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKey {
    type Err = UnknownStage;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        StageKey::ALL
            .into_iter()
            .find(|key| key.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| UnknownStage(raw.to_string()))
    }
}

impl PartialOrd for StageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        let (lhs, rhs) = (stage(*self).order, stage(*other).order);
        if lhs == rhs {
            return None;
        }
        Some(lhs.cmp(&rhs))
    }
}
