//! Host/port pairs as the engine reports them.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// A network endpoint.
///
/// On the wire it is either a two-element array `["host", port]` or a string
/// `"host:port"`. It always serializes as the string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndPoint {
    pub host: String,
    pub port: u16,
}

impl EndPoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for EndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Why an endpoint string or value could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndPointParseError(String);

impl fmt::Display for EndPointParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid endpoint: {}", self.0)
    }
}

impl std::error::Error for EndPointParseError {}

impl FromStr for EndPoint {
    type Err = EndPointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndPointParseError(format!("missing port in {:?}", s)))?;
        if host.is_empty() {
            return Err(EndPointParseError(format!("missing host in {:?}", s)));
        }
        let port = port
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| EndPointParseError(format!("bad port in {:?}", s)))?;
        Ok(EndPoint::new(host, port))
    }
}

impl TryFrom<&Value> for EndPoint {
    type Error = EndPointParseError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(s) => s.parse(),
            Value::Array(items) => match items.as_slice() {
                [Value::String(host), port] if !host.is_empty() => {
                    let port = port
                        .as_u64()
                        .and_then(|p| u16::try_from(p).ok())
                        .filter(|p| *p != 0)
                        .ok_or_else(|| EndPointParseError(format!("bad port {}", port)))?;
                    Ok(EndPoint::new(host.clone(), port))
                }
                _ => Err(EndPointParseError(format!(
                    "expected [host, port], got {}",
                    value
                ))),
            },
            other => Err(EndPointParseError(format!(
                "expected array or string, got {}",
                other
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for EndPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        EndPoint::try_from(&value).map_err(de::Error::custom)
    }
}

impl Serialize for EndPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_array_form() {
        let ep: EndPoint = serde_json::from_str(r#"["192.168.0.2", 7144]"#).unwrap();
        assert_eq!(ep, EndPoint::new("192.168.0.2", 7144));
    }

    #[test]
    fn test_decodes_string_form() {
        let ep: EndPoint = serde_json::from_str(r#""10.0.0.1:7145""#).unwrap();
        assert_eq!(ep, EndPoint::new("10.0.0.1", 7145));
        assert_eq!(ep.to_string(), "10.0.0.1:7145");
    }

    #[test]
    fn test_rejects_other_shapes() {
        for json in [r#"{"host":"a","port":1}"#, "7144", r#"["a"]"#, r#""no-port""#, r#"["a", 70000]"#, r#""a:0""#] {
            assert!(
                serde_json::from_str::<EndPoint>(json).is_err(),
                "should reject {}",
                json
            );
        }
    }

    #[test]
    fn test_optional_null_is_none() {
        #[derive(Deserialize)]
        struct Holder {
            #[serde(default)]
            ep: Option<EndPoint>,
        }
        let h: Holder = serde_json::from_str(r#"{"ep":null}"#).unwrap();
        assert!(h.ep.is_none());
    }

    #[test]
    fn test_serializes_as_string() {
        let json = serde_json::to_string(&EndPoint::new("host", 7144)).unwrap();
        assert_eq!(json, r#""host:7144""#);
    }
}
