//! Syslog line prefix: optional `<PRI>`, leading timestamp, `HOST TAG[PID]:`.
//!
//! Timestamp detection is tolerant of RFC 3339, `YYYY-MM-DD HH:MM:SS` and
//! BSD (`Mon DD HH:MM:SS`, year supplied by the caller).

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

// <PRI>Mmm dd HH:MM:SS REST
static RE_BSD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:<\d{1,3}>)?([A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2})\s+(.*)$").unwrap()
});

// <PRI>[VER ]YYYY-MM-DD[T ]HH:MM:SS[.frac][zone] REST
static RE_ISO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:<\d{1,3}>)?(?:\d\s+)?(\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)\s+(.*)$",
    )
    .unwrap()
});

// HOST TAG[PID]: MSG
static RE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+([^\s\[\]:]+)(?:\[(\d+)\])?:\s?(.*)$").unwrap()
});

/// The leading parts of a syslog line, split from the message body.
#[derive(Debug, Default, PartialEq)]
pub struct Prefix<'a> {
    /// Timestamp token as it appeared in the line, if one was found.
    pub timestamp_token: Option<&'a str>,
    /// Parsed timestamp; None when the token was absent or invalid.
    pub timestamp: Option<NaiveDateTime>,
    pub host: Option<&'a str>,
    pub process: Option<&'a str>,
    pub pid: Option<u32>,
    /// Message body after the header (the whole line if no header matched).
    pub message: &'a str,
    /// True when both a timestamp token and a `HOST TAG:` header were found.
    pub recognized: bool,
}

/// Split a line into its syslog prefix and message body.
pub fn split(line: &str, default_year: i32) -> Prefix<'_> {
    let (token, timestamp, rest) = if let Some(caps) = RE_BSD.captures(line) {
        let token = caps.get(1).map_or("", |m| m.as_str());
        let rest = caps.get(2).map_or("", |m| m.as_str());
        (Some(token), parse_bsd_timestamp(token, default_year), rest)
    } else if let Some(caps) = RE_ISO.captures(line) {
        let token = caps.get(1).map_or("", |m| m.as_str());
        let rest = caps.get(2).map_or("", |m| m.as_str());
        (Some(token), parse_iso_timestamp(token), rest)
    } else {
        return Prefix {
            message: line,
            ..Prefix::default()
        };
    };

    match RE_HEADER.captures(rest) {
        Some(caps) => Prefix {
            timestamp_token: token,
            timestamp,
            host: caps.get(1).map(|m| m.as_str()),
            process: caps.get(2).map(|m| m.as_str()),
            pid: caps.get(3).and_then(|m| m.as_str().parse().ok()),
            message: caps.get(4).map_or("", |m| m.as_str()),
            recognized: true,
        },
        None => Prefix {
            timestamp_token: token,
            timestamp,
            message: rest,
            ..Prefix::default()
        },
    }
}

/// Parse a BSD syslog timestamp ("Jan 15 12:34:56" or "Jan  5 12:34:56").
pub fn parse_bsd_timestamp(s: &str, year: i32) -> Option<NaiveDateTime> {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&format!("{year} {collapsed}"), "%Y %b %d %H:%M:%S").ok()
}

/// Parse an ISO-8601 / RFC 3339 timestamp, normalizing offsets to UTC.
pub fn parse_iso_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).naive_utc());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%z"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ndt);
        }
    }
    DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z")
        .ok()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
}
