use std::fmt::{Display, Formatter};

use serde_json::Value as JsonValue;

/// Error codes understood by Parse Server, plus the client-side codes the SDK raises itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParseErrorCode {
    OtherCause,
    InternalServerError,
    ConnectionFailed,
    ObjectNotFound,
    InvalidQuery,
    InvalidJson,
    CommandUnavailable,
    NotInitialized,
    OperationForbidden,
    Timeout,
    RequestLimitExceeded,
    DuplicateRequest,
    InvalidSessionToken,
    Other(i32),
}

impl ParseErrorCode {
    pub fn as_i32(&self) -> i32 {
        match self {
            ParseErrorCode::OtherCause => -1,
            ParseErrorCode::InternalServerError => 1,
            ParseErrorCode::ConnectionFailed => 100,
            ParseErrorCode::ObjectNotFound => 101,
            ParseErrorCode::InvalidQuery => 102,
            ParseErrorCode::InvalidJson => 107,
            ParseErrorCode::CommandUnavailable => 108,
            ParseErrorCode::NotInitialized => 109,
            ParseErrorCode::OperationForbidden => 119,
            ParseErrorCode::Timeout => 124,
            ParseErrorCode::RequestLimitExceeded => 155,
            ParseErrorCode::DuplicateRequest => 159,
            ParseErrorCode::InvalidSessionToken => 209,
            ParseErrorCode::Other(code) => *code,
        }
    }

    pub fn from_i32(code: i32) -> Self {
        match code {
            -1 => ParseErrorCode::OtherCause,
            1 => ParseErrorCode::InternalServerError,
            100 => ParseErrorCode::ConnectionFailed,
            101 => ParseErrorCode::ObjectNotFound,
            102 => ParseErrorCode::InvalidQuery,
            107 => ParseErrorCode::InvalidJson,
            108 => ParseErrorCode::CommandUnavailable,
            109 => ParseErrorCode::NotInitialized,
            119 => ParseErrorCode::OperationForbidden,
            124 => ParseErrorCode::Timeout,
            155 => ParseErrorCode::RequestLimitExceeded,
            159 => ParseErrorCode::DuplicateRequest,
            209 => ParseErrorCode::InvalidSessionToken,
            other => ParseErrorCode::Other(other),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    pub code: ParseErrorCode,
    message: String,
}

impl ParseError {
    pub fn new(code: ParseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code_i32(&self) -> i32 {
        self.code.as_i32()
    }

    /// Builds an error from a `{ "code": .., "error": .. }` envelope returned by the server.
    ///
    /// Returns `None` when the value does not look like an error envelope.
    pub fn from_envelope(value: &JsonValue) -> Option<Self> {
        let object = value.as_object()?;
        let message = object.get("error")?;
        let code = object
            .get("code")
            .and_then(JsonValue::as_i64)
            .and_then(|code| i32::try_from(code).ok())
            .map(ParseErrorCode::from_i32)
            .unwrap_or(ParseErrorCode::OtherCause);
        let message = match message {
            JsonValue::String(text) => text.clone(),
            other => other.to_string(),
        };
        Some(Self::new(code, message))
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code.as_i32())
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

pub fn connection_failed(message: impl Into<String>) -> ParseError {
    ParseError::new(ParseErrorCode::ConnectionFailed, message)
}

pub fn invalid_json(message: impl Into<String>) -> ParseError {
    ParseError::new(ParseErrorCode::InvalidJson, message)
}

pub fn not_initialized(message: impl Into<String>) -> ParseError {
    ParseError::new(ParseErrorCode::NotInitialized, message)
}

/// Misuse of the SDK surface (for example requesting a key that was never configured).
pub fn usage_error(message: impl Into<String>) -> ParseError {
    ParseError::new(ParseErrorCode::OtherCause, message)
}

pub fn timeout(message: impl Into<String>) -> ParseError {
    ParseError::new(ParseErrorCode::Timeout, message)
}

pub fn internal_error(message: impl Into<String>) -> ParseError {
    ParseError::new(ParseErrorCode::InternalServerError, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_maps_known_and_unknown_codes() {
        let known = ParseError::from_envelope(&json!({ "code": 101, "error": "not found" })).unwrap();
        assert_eq!(known.code, ParseErrorCode::ObjectNotFound);
        assert_eq!(known.message(), "not found");

        let unknown = ParseError::from_envelope(&json!({ "code": 4242, "error": "custom" })).unwrap();
        assert_eq!(unknown.code, ParseErrorCode::Other(4242));
        assert_eq!(unknown.code_i32(), 4242);
    }

    #[test]
    fn out_of_range_code_falls_back_to_other_cause() {
        let err = ParseError::from_envelope(&json!({ "code": 4_294_967_397_i64, "error": "huge" }))
            .unwrap();
        assert_eq!(err.code, ParseErrorCode::OtherCause);
    }

    #[test]
    fn envelope_requires_error_field() {
        assert!(ParseError::from_envelope(&json!({ "code": 1 })).is_none());
        assert!(ParseError::from_envelope(&json!("oops")).is_none());
    }

    #[test]
    fn display_includes_numeric_code() {
        let err = connection_failed("Unable to connect to the Parse API");
        assert_eq!(err.to_string(), "Unable to connect to the Parse API (code 100)");
    }
}
