//! Shared pagination types for the admin list endpoints.
//!
//! Offset-based, matching the admin surface's `limit`/`offset` query
//! parameters rather than the cursor style some upstream APIs use.

use serde::{Deserialize, Serialize};

/// Default number of items returned per page when `limit` is omitted.
pub const DEFAULT_LIMIT: i64 = 20;

/// Upper bound on `limit`, regardless of what the caller asks for.
pub const MAX_LIMIT: i64 = 100;

/// Raw `limit`/`offset` query parameters, before clamping.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    /// Clamped to `[1, MAX_LIMIT]`, defaulting to [`DEFAULT_LIMIT`].
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Floored at zero.
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// `{data, total}` envelope shared by every admin list endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(Pagination::default().limit(), DEFAULT_LIMIT);
        assert_eq!(Pagination { limit: Some(0), offset: None }.limit(), 1);
        assert_eq!(Pagination { limit: Some(-5), offset: None }.limit(), 1);
        assert_eq!(Pagination { limit: Some(1000), offset: None }.limit(), MAX_LIMIT);
        assert_eq!(Pagination { limit: Some(50), offset: None }.limit(), 50);
    }

    #[test]
    fn offset_defaults_and_floors_at_zero() {
        assert_eq!(Pagination::default().offset(), 0);
        assert_eq!(Pagination { limit: None, offset: Some(-10) }.offset(), 0);
        assert_eq!(Pagination { limit: None, offset: Some(40) }.offset(), 40);
    }
}
