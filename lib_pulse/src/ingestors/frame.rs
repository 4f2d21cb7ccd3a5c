//! # Frame Parsing
//!
//! The realtime endpoint sends either a bare decimal (`"72"`) or a JSON
//! document carrying `data.heart_rate`. Anything else is rejected here and
//! never reaches the stats.

use serde_json::Value;
use thiserror::Error;

/// An inbound WebSocket payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is neither a decimal nor JSON")]
    Unrecognized,

    #[error("JSON payload has no data.heart_rate")]
    MissingField,

    #[error("data.heart_rate is not a number: {0}")]
    NotANumber(String),

    #[error("heart rate out of range: {0}")]
    OutOfRange(String),
}

/// Extracts a heart rate from a frame. Binary frames are read as UTF-8.
pub fn parse_frame(frame: &Frame) -> Result<u32, PayloadError> {
    match frame {
        Frame::Text(text) => parse_payload(text),
        Frame::Binary(bytes) => parse_payload(&String::from_utf8_lossy(bytes)),
    }
}

/// # Parse Payload
///
/// 1.  Trimmed text made only of ASCII digits is a bare reading.
/// 2.  Otherwise the text must be JSON with a numeric `data.heart_rate`.
///     Fractional readings are rounded; negative, non-finite or oversized
///     values are rejected.
pub fn parse_payload(raw: &str) -> Result<u32, PayloadError> {
    let text = raw.trim();

    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse::<u32>()
            .map_err(|_| PayloadError::OutOfRange(text.to_string()));
    }

    let payload: Value = serde_json::from_str(text).map_err(|_| PayloadError::Unrecognized)?;
    let field = payload
        .get("data")
        .and_then(|data| data.get("heart_rate"))
        .ok_or(PayloadError::MissingField)?;

    heart_rate_from_json(field)
}

fn heart_rate_from_json(field: &Value) -> Result<u32, PayloadError> {
    if let Some(n) = field.as_u64() {
        return u32::try_from(n).map_err(|_| PayloadError::OutOfRange(n.to_string()));
    }

    let n = field
        .as_f64()
        .ok_or_else(|| PayloadError::NotANumber(field.to_string()))?;
    if !n.is_finite() || n < 0.0 || n > f64::from(u32::MAX) {
        return Err(PayloadError::OutOfRange(field.to_string()));
    }
    Ok(n.round() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_decimal() {
        assert_eq!(parse_payload("72"), Ok(72));
        assert_eq!(parse_payload("  64\n"), Ok(64));
        assert_eq!(parse_frame(&Frame::Binary(b"95".to_vec())), Ok(95));
    }

    #[test]
    fn json_heart_rate() {
        assert_eq!(parse_payload(r#"{"data":{"heart_rate":88}}"#), Ok(88));
        assert_eq!(
            parse_payload(r#"{"measured_at":1700000000,"data":{"heart_rate":101}}"#),
            Ok(101)
        );
        assert_eq!(parse_payload(r#"{"data":{"heart_rate":72.6}}"#), Ok(73));
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(parse_payload("not a number"), Err(PayloadError::Unrecognized));
        assert_eq!(parse_payload(""), Err(PayloadError::Unrecognized));
        assert_eq!(parse_payload("-5"), Err(PayloadError::MissingField));
        assert_eq!(parse_payload(r#"{"data":{}}"#), Err(PayloadError::MissingField));
        assert_eq!(parse_payload(r#"{"heart_rate":70}"#), Err(PayloadError::MissingField));
        assert_eq!(parse_payload(r#"[1,2,3]"#), Err(PayloadError::MissingField));
        assert!(matches!(
            parse_payload(r#"{"data":{"heart_rate":"72"}}"#),
            Err(PayloadError::NotANumber(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"data":{"heart_rate":null}}"#),
            Err(PayloadError::NotANumber(_))
        ));
    }

    #[test]
    fn rejects_out_of_range() {
        assert!(matches!(parse_payload("99999999999"), Err(PayloadError::OutOfRange(_))));
        assert!(matches!(
            parse_payload(r#"{"data":{"heart_rate":-3}}"#),
            Err(PayloadError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"data":{"heart_rate":1e300}}"#),
            Err(PayloadError::OutOfRange(_))
        ));
    }
}
