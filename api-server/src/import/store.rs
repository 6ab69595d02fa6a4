//! Postgres-backed [`BulkSink`] for members.

use rocket_db_pools::sqlx::{self, PgPool};

use super::accumulator::BulkSink;
use super::error::ImportError;
use crate::models::NewMember;

/// Bulk writer for the `members` table.
#[derive(Clone)]
pub struct PgMemberStore {
    pool: PgPool,
}

impl PgMemberStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Insert a batch of members with a single `UNNEST` statement.
///
/// Rows that collide with an existing `(account_id, client_member_id)` pair,
/// or with an earlier row in the same batch, are skipped.
///
/// # Returns
/// Number of member rows actually inserted
pub async fn insert_members_batch(
    pool: &PgPool,
    members: Vec<NewMember>,
) -> Result<u64, sqlx::Error> {
    if members.is_empty() {
        return Ok(0);
    }

    let count = members.len();
    let mut account_ids = Vec::with_capacity(count);
    let mut client_member_ids = Vec::with_capacity(count);
    let mut first_names = Vec::with_capacity(count);
    let mut last_names = Vec::with_capacity(count);
    let mut emails = Vec::with_capacity(count);
    let mut phone_numbers = Vec::with_capacity(count);

    for member in members {
        account_ids.push(member.account_id);
        client_member_ids.push(member.client_member_id);
        first_names.push(member.first_name);
        last_names.push(member.last_name);
        emails.push(member.email);
        phone_numbers.push(member.phone_number);
    }

    let result = sqlx::query(
        r#"INSERT INTO members (
            account_id, client_member_id, first_name, last_name, email, phone_number
           )
           SELECT account_id, client_member_id, first_name, last_name, email, phone_number
           FROM UNNEST(
               $1::int[],
               $2::text[],
               $3::text[],
               $4::text[],
               $5::text[],
               $6::text[]
           ) AS t(account_id, client_member_id, first_name, last_name, email, phone_number)
           ON CONFLICT DO NOTHING"#,
    )
    .bind(&account_ids)
    .bind(&client_member_ids)
    .bind(&first_names)
    .bind(&last_names)
    .bind(&emails)
    .bind(&phone_numbers)
    .execute(pool)
    .await?;

    let inserted = result.rows_affected();
    log::trace!("bulk inserted {} of {} members", inserted, count);
    Ok(inserted)
}

#[rocket::async_trait]
impl BulkSink<NewMember> for PgMemberStore {
    async fn insert_ignore_conflicts(&self, batch: Vec<NewMember>) -> Result<u64, ImportError> {
        Ok(insert_members_batch(&self.pool, batch).await?)
    }
}
