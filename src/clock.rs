//! Request time.
//!
//! Every operation takes the request time as an argument instead of reading
//! the wall clock, so behaviour can be replayed at any instant.

use chrono::{DateTime, Utc};

use crate::error::{PresentError, Result};

/// Header the game client stamps each request with (RFC 2822 date).
pub const REQUEST_TIME_HEADER: &str = "x-isu-date";

pub trait RequestClock: Send + Sync {
    fn request_time(&self) -> Result<i64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl RequestClock for SystemClock {
    fn request_time(&self) -> Result<i64> {
        Ok(Utc::now().timestamp())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl RequestClock for FixedClock {
    fn request_time(&self) -> Result<i64> {
        Ok(self.0)
    }
}

/// Parse the request time header into Unix seconds.
pub fn request_time_from_header(value: Option<&str>) -> Result<i64> {
    let value = value.ok_or(PresentError::ClockUnavailable)?;
    DateTime::parse_from_rfc2822(value.trim())
        .map(|t| t.timestamp())
        .map_err(|_| PresentError::ClockUnavailable)
}
