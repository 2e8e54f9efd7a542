//! sshd message shape classification.
//!
//! Shapes are tried in order; the first match decides the event type and
//! which of username / ip / port are filled.

use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

use crate::types::EventType;

// message repeated N times: [ inner ]
static RE_REPEATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"message repeated (\d+) times: \[\s*(.*?)\s*\]\s*$").unwrap()
});

// Every shape uses the same group names: user, ip, port (and invalid for failures).
static SHAPES: LazyLock<Vec<(Regex, EventType)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(
                r"Failed \S+ for (?P<invalid>invalid user )?(?P<user>\S*) from (?P<ip>\S+)(?: port (?P<port>\d+))?",
            )
            .unwrap(),
            EventType::FailedLogin,
        ),
        (
            Regex::new(r"Accepted \S+ for (?P<user>\S+) from (?P<ip>\S+)(?: port (?P<port>\d+))?")
                .unwrap(),
            EventType::AcceptedLogin,
        ),
        (
            Regex::new(r"Invalid user (?P<user>\S*) from (?P<ip>\S+)(?: port (?P<port>\d+))?")
                .unwrap(),
            EventType::InvalidUser,
        ),
        (
            Regex::new(r"(?i)authentication failure;.*?\brhost=(?P<ip>\S*)(?:\s+user=(?P<user>\S+))?")
                .unwrap(),
            EventType::PamAuthFailure,
        ),
        (
            Regex::new(
                r"Connection closed by (?:(?:invalid |authenticating )?user (?P<user>\S*) )?(?P<ip>\S+)(?: port (?P<port>\d+))?",
            )
            .unwrap(),
            EventType::ConnectionClosed,
        ),
        (
            Regex::new(
                r"Received disconnect from (?P<ip>[0-9A-Fa-f.:]+?)(?:: | port (?P<port>\d+)|\s|$)",
            )
            .unwrap(),
            EventType::Disconnect,
        ),
        (
            Regex::new(
                r"Disconnected from (?:(?:invalid |authenticating )?user (?P<user>\S*) )?(?P<ip>\S+)(?: port (?P<port>\d+))?",
            )
            .unwrap(),
            EventType::Disconnect,
        ),
    ]
});

/// Fields extracted from an sshd message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub event_type: EventType,
    pub username: Option<String>,
    pub ip_address: Option<String>,
    pub port: Option<u16>,
    pub repetition_count: u32,
}

impl Classification {
    fn other(repetition_count: u32) -> Self {
        Self {
            event_type: EventType::Other,
            username: None,
            ip_address: None,
            port: None,
            repetition_count,
        }
    }
}

/// Classify a message body, unwrapping `message repeated N times: [...]`.
pub fn classify(message: &str) -> Classification {
    let (body, repetition_count) = match RE_REPEATED.captures(message) {
        Some(caps) => {
            let count = caps[1].parse().unwrap_or(1).max(1);
            (caps.get(2).map_or(message, |m| m.as_str()), count)
        }
        None => (message, 1),
    };

    for (pattern, event) in SHAPES.iter() {
        let Some(caps) = pattern.captures(body) else {
            continue;
        };
        let event_type = if *event == EventType::FailedLogin && caps.name("invalid").is_some() {
            EventType::FailedLoginInvalidUser
        } else {
            *event
        };
        return Classification {
            event_type,
            username: caps
                .name("user")
                .map(|m| m.as_str())
                .filter(|u| !u.is_empty())
                .map(String::from),
            ip_address: caps.name("ip").and_then(|m| clean_address(m.as_str())),
            port: caps.name("port").and_then(|m| m.as_str().parse().ok()),
            repetition_count,
        };
    }

    Classification::other(repetition_count)
}

/// Normalize a remote-address token: keep valid IPs as-is, otherwise strip
/// trailing punctuation sshd sometimes glues on.
fn clean_address(token: &str) -> Option<String> {
    if token.is_empty() {
        return None;
    }
    if token.parse::<IpAddr>().is_ok() {
        return Some(token.to_string());
    }
    let trimmed = token.trim_end_matches([':', ',', ';']);
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
