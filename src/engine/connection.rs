//! Data connections inside a group.
//!
//! A connection carries no data. It records which producer slot an INPUT is
//! bound to, so the owning group can sever, describe and snapshot it.

use crate::engine::slot::Role;
use crate::engine::validity::Validity;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `<element>.<slot>` address within one group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    pub element: String,
    pub slot: String,
}

impl Endpoint {
    pub fn new(element: impl Into<String>, slot: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            slot: slot.into(),
        }
    }

    /// Parse `elem.slot`. The element name is everything before the first dot.
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once('.') {
            Some((element, slot)) if !element.is_empty() && !slot.is_empty() => {
                Ok(Self::new(element, slot))
            }
            _ => Err(EngineError::InvalidEndpoint(text.to_string())),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.element, self.slot)
    }
}

impl Serialize for Endpoint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Endpoint::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Recorded connection from a producer slot to an INPUT slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub from: Endpoint,
    /// OUTPUT or BUFFER.
    pub from_role: Role,
    pub to: Endpoint,
    /// Outcome of the check made when the connection was created.
    pub validity: Validity,
}

impl Connection {
    /// Whether either end sits on `element`.
    pub fn touches(&self, element: &str) -> bool {
        self.from.element == element || self.to.element == element
    }

    pub fn touches_slot(&self, element: &str, role: Role, slot: &str) -> bool {
        if role == Role::Input {
            self.to.element == element && self.to.slot == slot
        } else {
            self.from.element == element && self.from.slot == slot && self.from_role == role
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let ep = Endpoint::parse("gain.out").unwrap();
        assert_eq!(ep.element, "gain");
        assert_eq!(ep.slot, "out");
        assert_eq!(ep.to_string(), "gain.out");
    }

    #[test]
    fn test_parse_keeps_dots_in_slot() {
        let ep: Endpoint = "sensor.imu.x".parse().unwrap();
        assert_eq!(ep.element, "sensor");
        assert_eq!(ep.slot, "imu.x");
    }

    #[test]
    fn test_parse_invalid() {
        for text in ["gain", ".out", "gain.", ""] {
            assert!(matches!(
                Endpoint::parse(text),
                Err(EngineError::InvalidEndpoint(_))
            ));
        }
    }

    #[test]
    fn test_endpoint_serializes_as_string() {
        let ep = Endpoint::new("a", "out");
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, "\"a.out\"");
        let back: Endpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ep);
    }

    #[test]
    fn test_touches_slot() {
        let conn = Connection {
            from: Endpoint::new("a", "out"),
            from_role: Role::Output,
            to: Endpoint::new("b", "in"),
            validity: Validity::Valid,
        };
        assert!(conn.touches("a"));
        assert!(conn.touches_slot("b", Role::Input, "in"));
        assert!(!conn.touches_slot("a", Role::Buffer, "out"));
    }
}
