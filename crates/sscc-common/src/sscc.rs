//! GS1 SSCC-18 identifiers
//!
//! An SSCC is laid out positionally as
//! `extension(1) ‖ company prefix(7) ‖ serial reference(9) ‖ check digit(1)`.
//! The first 17 digits form the *body*; the check digit is always derived
//! from it and never stored on its own.

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;

use crate::error::SsccError;

/// Number of digits in the body (everything but the check digit).
pub const BODY_LEN: usize = 17;

/// Number of digits in a complete SSCC.
pub const SSCC_LEN: usize = 18;

/// Width the serial reference is zero-padded to.
pub const SERIAL_WIDTH: usize = 9;

/// Largest serial that still fits the serial reference field.
pub const MAX_SERIAL: u64 = 999_999_999;

/// Errors raised while computing a check digit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("SSCC body must be exactly 17 digits, got {len}")]
    InvalidLength { len: usize },

    #[error("SSCC body contains non-digit {found:?} at position {position}")]
    InvalidDigit { position: usize, found: char },
}

/// A complete, well-formed 18-digit SSCC
///
/// Only built by [`complete`] and [`encode`], so the body and check digit
/// are always present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sscc(String);

impl Sscc {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The 17-digit body the check digit was computed from.
    pub fn body(&self) -> &str {
        &self.0[..BODY_LEN]
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[BODY_LEN] - b'0'
    }
}

impl std::fmt::Display for Sscc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Sscc {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Compute the GS1 check digit for a 17-digit body.
///
/// Positions are indexed left to right from zero; even positions weigh 3,
/// odd positions weigh 1.
pub fn check_digit(body: &str) -> Result<u8, EncodeError> {
    if body.len() != BODY_LEN {
        return Err(EncodeError::InvalidLength { len: body.len() });
    }

    let mut sum = 0u32;
    for (position, found) in body.chars().enumerate() {
        let digit = found
            .to_digit(10)
            .ok_or(EncodeError::InvalidDigit { position, found })?;
        let weight = if position % 2 == 0 { 3 } else { 1 };
        sum += digit * weight;
    }

    Ok(((10 - sum % 10) % 10) as u8)
}

/// Append the check digit to a 17-digit body.
pub fn complete(body: &str) -> Result<Sscc, EncodeError> {
    let digit = check_digit(body)?;
    let mut code = String::with_capacity(SSCC_LEN);
    code.push_str(body);
    code.push(char::from(b'0' + digit));
    Ok(Sscc(code))
}

/// Build the SSCC for one serial under a fixed extension digit and company prefix.
pub fn encode(extension: &str, company_prefix: &str, serial: u64) -> Result<Sscc, EncodeError> {
    let body = format!(
        "{extension}{company_prefix}{serial:0width$}",
        width = SERIAL_WIDTH
    );
    complete(&body)
}

/// Inclusive range of serial references issued by one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialRange {
    start: u64,
    end: u64,
}

impl SerialRange {
    pub fn new(start: u64, end: u64) -> crate::Result<Self> {
        if start > end {
            return Err(SsccError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of serials in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A valid range always holds at least one serial.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }
}

impl std::fmt::Display for SerialRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
