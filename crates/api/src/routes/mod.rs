//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod orders;
pub mod payments;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a path id; anything that is not an id cannot name a resource.
fn parse_id<T: FromStr>(kind: &str, id: &str) -> Result<T, ApiError> {
    id.parse()
        .map_err(|_| ApiError::NotFound(format!("{kind} not found: {id}")))
}
