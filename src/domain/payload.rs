// Inbound message payloads
use serde_json::Value;

/// A decoded message body: structured JSON when it parses, raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn parse(bytes: &[u8]) -> Self {
        match serde_json::from_slice(bytes) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedPayload {
    #[error("expected a JSON array [primary, secondary], got text {0:?}")]
    NotJson(String),
    #[error("expected a JSON array [primary, secondary], got {0}")]
    NotArray(Value),
    #[error("expected at least two values, got {0}")]
    TooShort(usize),
    #[error("value at index {index} is not numeric: {value}")]
    NotNumeric { index: usize, value: Value },
}

/// One two-channel detector reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalReading {
    pub primary: f64,
    pub secondary: f64,
}

impl TryFrom<&Payload> for SignalReading {
    type Error = MalformedPayload;

    fn try_from(payload: &Payload) -> Result<Self, Self::Error> {
        let items = match payload {
            Payload::Json(Value::Array(items)) => items,
            Payload::Json(other) => return Err(MalformedPayload::NotArray(other.clone())),
            Payload::Text(text) => return Err(MalformedPayload::NotJson(text.clone())),
        };
        if items.len() < 2 {
            return Err(MalformedPayload::TooShort(items.len()));
        }

        Ok(SignalReading {
            primary: numeric(items, 0)?,
            secondary: numeric(items, 1)?,
        })
    }
}

/// Numbers, or strings holding a number.
fn numeric(items: &[Value], index: usize) -> Result<f64, MalformedPayload> {
    let value = &items[index];
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| MalformedPayload::NotNumeric {
            index,
            value: value.clone(),
        })
}
