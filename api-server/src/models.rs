use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::import::{Entity, FilteredRow, RowError};

// ===== Member Models =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
pub struct Member {
    pub id: i32,
    #[serde(rename = "accountId")]
    pub account_id: i32,
    #[serde(rename = "clientMemberId")]
    pub client_member_id: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: Option<String>,
    #[serde(rename = "phoneNumber")]
    pub phone_number: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A member that has not been stored yet, either posted through the API or
/// built from one CSV row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NewMember {
    #[serde(rename = "accountId")]
    pub account_id: i32,
    #[serde(rename = "clientMemberId")]
    pub client_member_id: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "phoneNumber")]
    pub phone_number: Option<String>,
}

impl NewMember {
    /// Reject blank identifying fields before they reach the database.
    pub fn validate(&self) -> Result<(), RowError> {
        for (field, value) in [
            ("client_member_id", &self.client_member_id),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
        ] {
            if value.trim().is_empty() {
                return Err(RowError::MissingField(field.to_string()));
            }
        }
        Ok(())
    }
}

impl Entity for NewMember {
    const KIND: &'static str = "members.Member";
    const FIELDS: &'static [&'static str] = &[
        "id",
        "account_id",
        "client_member_id",
        "first_name",
        "last_name",
        "email",
        "phone_number",
    ];

    fn from_row(row: &FilteredRow) -> Result<Self, RowError> {
        let account_id = row.required("account_id")?;
        let account_id = account_id
            .trim()
            .parse::<i32>()
            .map_err(|e| RowError::InvalidField {
                field: "account_id".to_string(),
                value: account_id.to_string(),
                reason: e.to_string(),
            })?;

        let member = NewMember {
            account_id,
            client_member_id: row.required("client_member_id")?.to_string(),
            first_name: row.required("first_name")?.to_string(),
            last_name: row.required("last_name")?.to_string(),
            email: row.optional("email"),
            phone_number: row.optional("phone_number"),
        };
        member.validate()?;
        Ok(member)
    }
}

// ===== Response Envelopes =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PageMeta {
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PagedResponse<T> {
    pub data: T,
    pub meta: PageMeta,
}
