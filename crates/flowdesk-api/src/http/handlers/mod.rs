//! Route handlers, grouped by resource.

pub mod events;
pub mod execution;
pub mod stats;
pub mod workflow;

use uuid::Uuid;

use crate::http::error::AppError;

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    raw.parse::<Uuid>()
        .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a valid {what} id")))
}
