use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stages::StageKey;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

id_newtype!(DealId);
id_newtype!(ContactId);

pub const UNKNOWN_CONTACT: &str = "Unknown Contact";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub title: String,
    pub value: Decimal,
    #[serde(with = "crate::timestamp")]
    pub expected_close_date: DateTime<Utc>,
    pub contact_id: ContactId,
    pub stage: StageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(with = "crate::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::timestamp::option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::timestamp::option"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

/// Complete writable representation of a deal, sent on create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealInput {
    pub title: String,
    pub value: Decimal,
    #[serde(with = "crate::timestamp")]
    pub expected_close_date: DateTime<Utc>,
    pub contact_id: ContactId,
    #[serde(default = "default_stage")]
    pub stage: StageKey,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_stage() -> StageKey {
    StageKey::Prospect
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DealInputError {
    #[error("deal title must not be empty")]
    EmptyTitle,
    #[error("deal value must not be negative (got {0})")]
    NegativeValue(Decimal),
}

impl DealInput {
    pub fn validate(&self) -> Result<(), DealInputError> {
        if self.title.trim().is_empty() {
            return Err(DealInputError::EmptyTitle);
        }
        if self.value < Decimal::ZERO {
            return Err(DealInputError::NegativeValue(self.value));
        }
        Ok(())
    }
}

impl From<&Deal> for DealInput {
    fn from(deal: &Deal) -> Self {
        Self {
            title: deal.title.clone(),
            value: deal.value,
            expected_close_date: deal.expected_close_date,
            contact_id: deal.contact_id.clone(),
            stage: deal.stage,
            description: deal.description.clone(),
        }
    }
}
