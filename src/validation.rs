//! Field-level validation for rooms and reservations.
//!
//! Every check appends to a [`Violations`] list instead of returning early,
//! so callers always see the complete set of problems with a request.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;

use crate::limits::*;
use crate::model::{Span, Timestamp};

/// HTML5 email syntax (the `type=email` input rule).
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email pattern is valid")
});

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: &'static str,
    pub message: String,
}

/// Ordered list of field violations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(Vec<Violation>);

impl Violations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        let mut v = Self::new();
        v.add(field, message);
        v
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(Violation {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }

    /// True if any violation is reported against `field`.
    pub fn has(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }

    pub fn messages_for(&self, field: &str) -> Vec<&str> {
        self.0
            .iter()
            .filter(|v| v.field == field)
            .map(|v| v.message.as_str())
            .collect()
    }

    /// `Ok(())` when empty, otherwise the collected violations.
    pub fn into_result(self) -> Result<(), Violations> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", v.field, v.message)?;
        }
        Ok(())
    }
}

/// Parse a naive timestamp from the accepted input formats.
///
/// RFC 3339 input with an offset is converted to UTC; a bare date means
/// midnight.
pub fn parse_datetime(input: &str) -> Option<Timestamp> {
    let s = input.trim();
    for fmt in DATETIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t);
        }
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse an optional listing filter date, recording a violation on failure.
pub fn parse_filter_date(
    field: &'static str,
    value: Option<&str>,
    violations: &mut Violations,
) -> Option<Timestamp> {
    let raw = value.filter(|s| !s.is_empty())?;
    let parsed = parse_datetime(raw);
    if parsed.is_none() {
        violations.add(
            field,
            format!("Invalid {field} format. Use Y-m-d H:i:s or Y-m-d"),
        );
    }
    parsed
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

fn check_length(
    violations: &mut Violations,
    field: &'static str,
    value: &str,
    min_msg: &str,
    max_msg: &str,
) {
    let len = value.chars().count();
    if len < MIN_NAME_LEN {
        violations.add(field, min_msg);
    }
    if len > MAX_NAME_LEN {
        violations.add(field, max_msg);
    }
}

/// Room entity rules. `None` means the name was never supplied.
pub fn validate_room(name: Option<&str>) -> Violations {
    let mut v = Violations::new();
    match name {
        None => v.add("name", "Room name cannot be empty"),
        Some(name) => {
            if name.trim().is_empty() {
                v.add("name", "Room name cannot be empty");
            }
            check_length(
                &mut v,
                "name",
                name,
                "Room name must be at least 2 characters",
                "Room name cannot exceed 255 characters",
            );
        }
    }
    v
}

/// Reservation entity rules, checked against `now`.
pub fn validate_reservation(
    reserved_by: &str,
    reserved_by_email: Option<&str>,
    span: &Span,
    now: Timestamp,
) -> Violations {
    let mut v = Violations::new();

    if reserved_by.trim().is_empty() {
        v.add("reservedBy", "Reserved by field cannot be empty");
    }
    check_length(
        &mut v,
        "reservedBy",
        reserved_by,
        "Name must be at least 2 characters",
        "Name cannot exceed 255 characters",
    );

    if let Some(email) = reserved_by_email.filter(|e| !e.is_empty()) {
        if !is_valid_email(email) {
            v.add("reservedByEmail", "Please provide a valid email address");
        }
        if email.chars().count() > MAX_NAME_LEN {
            v.add("reservedByEmail", "Email cannot exceed 255 characters");
        }
    }

    if span.is_empty() {
        v.add(
            "endDateTime",
            "End date and time must be after start date and time",
        );
    }
    if span.start < now {
        v.add("startDateTime", "Reservation cannot be made for past dates");
    }

    v
}
