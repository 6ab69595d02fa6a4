use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::{Request, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::response::OpenApiResponderInner;
use rocket_okapi::OpenApiError;
use serde::Serialize;
use std::io::Cursor;

/// Body returned when an insert trips the members uniqueness constraint.
pub const DUPLICATE_MEMBER_MESSAGE: &str = "Member already exists, can not insert a duplicate";

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug)]
pub enum ApiError {
    DatabaseError(sqlx::Error),
    /// A uniqueness violation that no other handler claimed.
    DuplicateMember,
    NotFound(String),
    BadRequest(String),
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a str,
}

fn json_response(status: Status, json: String) -> response::Result<'static> {
    Response::build()
        .status(status)
        .header(rocket::http::ContentType::JSON)
        .sized_body(json.len(), Cursor::new(json))
        .ok()
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _: &'r Request<'_>) -> response::Result<'static> {
        let (status, error_type, message) = match self {
            ApiError::DuplicateMember => {
                log::debug!("duplicate member rejected");
                let json = serde_json::to_string(&MessageBody {
                    message: DUPLICATE_MEMBER_MESSAGE,
                })
                .unwrap_or_else(|_| format!(r#"{{"message":"{DUPLICATE_MEMBER_MESSAGE}"}}"#));
                return json_response(Status::BadRequest, json);
            }
            ApiError::DatabaseError(e) => {
                log::error!("database error: {}", e);
                (Status::InternalServerError, "DatabaseError", e.to_string())
            }
            ApiError::NotFound(msg) => {
                log::debug!("not found: {}", msg);
                (Status::NotFound, "NotFound", msg)
            }
            ApiError::BadRequest(msg) => {
                log::debug!("bad request: {}", msg);
                (Status::BadRequest, "BadRequest", msg)
            }
            ApiError::InternalError(msg) => {
                log::error!("internal error: {}", msg);
                (Status::InternalServerError, "InternalError", msg)
            }
        };

        let error_response = ErrorResponse {
            error: error_type.to_string(),
            message,
        };

        let json = serde_json::to_string(&error_response).unwrap_or_else(|_| {
            r#"{"error":"SerializationError","message":"Failed to serialize error"}"#.to_string()
        });

        json_response(status, json)
    }
}

impl OpenApiResponderInner for ApiError {
    fn responses(_generator: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Invalid request, or the member already exists"),
            ("404", "Resource not found"),
            ("500", "Database or internal failure"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

/// True when `err` is a Postgres unique-constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .map(|code| code == UNIQUE_VIOLATION)
                .unwrap_or(false)
    )
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            ref e if is_unique_violation(e) => ApiError::DuplicateMember,
            _ => ApiError::DatabaseError(err),
        }
    }
}
