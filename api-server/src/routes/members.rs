//! Member CRUD endpoints.

use crate::error::ApiError;
use crate::models::{DataResponse, Member, NewMember, PageMeta, PagedResponse};
use crate::routes::MessageResponse;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};
use rocket_db_pools::sqlx;
use rocket_okapi::openapi;

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 500;

const MEMBER_COLUMNS: &str =
    "id, account_id, client_member_id, first_name, last_name, email, phone_number, created_at";

/// List members ordered by id.
#[openapi(tag = "Members")]
#[get("/members?<limit>&<offset>")]
pub async fn list_members(
    limit: Option<i64>,
    offset: Option<i64>,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<PagedResponse<Vec<Member>>>, ApiError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let offset = offset.unwrap_or(0).max(0);

    let page_sql =
        format!("SELECT {MEMBER_COLUMNS} FROM members ORDER BY id ASC LIMIT $1 OFFSET $2");

    let (members, (total,)) = tokio::try_join!(
        sqlx::query_as::<_, Member>(&page_sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool.inner()),
        sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM members").fetch_one(pool.inner()),
    )?;

    Ok(Json(PagedResponse {
        data: members,
        meta: PageMeta {
            limit,
            offset,
            total,
        },
    }))
}

/// Get a single member.
#[openapi(tag = "Members")]
#[get("/members/<id>")]
pub async fn get_member(
    id: i32,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<Member>>, ApiError> {
    let member: Member =
        sqlx::query_as(&format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1"))
            .bind(id)
            .fetch_optional(pool.inner())
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Member {id} not found")))?;

    Ok(Json(DataResponse { data: member }))
}

/// Create a member. A second member with the same account and client member
/// id is rejected with a 400.
#[openapi(tag = "Members")]
#[post("/members", data = "<request>")]
pub async fn create_member(
    request: Json<NewMember>,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<DataResponse<Member>>, ApiError> {
    let new_member = request.into_inner();
    new_member
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let member: Member = sqlx::query_as(&format!(
        r#"INSERT INTO members (account_id, client_member_id, first_name, last_name, email, phone_number)
           VALUES ($1, $2, $3, $4, $5, $6)
           RETURNING {MEMBER_COLUMNS}"#
    ))
    .bind(new_member.account_id)
    .bind(&new_member.client_member_id)
    .bind(&new_member.first_name)
    .bind(&new_member.last_name)
    .bind(&new_member.email)
    .bind(&new_member.phone_number)
    .fetch_one(pool.inner())
    .await?;

    log::info!(
        "created member {} ({}/{})",
        member.id,
        member.account_id,
        member.client_member_id
    );

    Ok(Json(DataResponse { data: member }))
}

/// Delete a member.
#[openapi(tag = "Members")]
#[delete("/members/<id>")]
pub async fn delete_member(
    id: i32,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<MessageResponse>, ApiError> {
    let result = sqlx::query("DELETE FROM members WHERE id = $1")
        .bind(id)
        .execute(pool.inner())
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("Member {id} not found")));
    }

    Ok(Json(MessageResponse {
        message: format!("Member {id} deleted"),
    }))
}
