use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

/// A field-level validation error.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// The single error type crossing the library boundary.
///
/// Every pipeline stage raises a fully-formed, HTTP-shaped failure; the
/// routing layer only has to serialize [`ApiError::status`] and
/// [`ApiError::body`] verbatim.
pub enum ApiError {
    /// Malformed or missing parameter, unknown filter operator, failed
    /// type coercion, missing id.
    BadRequest(String),
    /// Get/Edit target absent.
    NotFound(String),
    /// Caller-issued permission assertion failed.
    Forbidden(String),
    /// Storage backend or other unexpected failure.
    Internal(String),
    /// Startup-time misconfiguration (e.g. a controller with no bound table).
    Config(String),
    /// Missing mandatory fields or failed custom validators, with
    /// field-level detail.
    Validation(Vec<FieldError>),
}

impl ApiError {
    /// The HTTP status this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Internal(_) | ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The JSON body the routing layer should serialize.
    pub fn body(&self) -> Value {
        match self {
            ApiError::Validation(errors) => serde_json::json!({
                "error": "Validation failed",
                "details": errors,
            }),
            other => serde_json::json!({ "error": other.message() }),
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::NotFound(msg)
            | ApiError::Forbidden(msg)
            | ApiError::Internal(msg)
            | ApiError::Config(msg) => msg.clone(),
            ApiError::Validation(errors) => format!("Validation failed: {} errors", errors.len()),
        }
    }

    /// A validation failure naming a single field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }

    /// A batched validation failure listing every missing mandatory field.
    pub fn missing_fields(fields: impl IntoIterator<Item = String>) -> Self {
        ApiError::Validation(
            fields
                .into_iter()
                .map(|field| FieldError {
                    field,
                    message: "Missing mandatory field".to_string(),
                })
                .collect(),
        )
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            ApiError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            ApiError::Internal(msg) => write!(f, "Internal Error: {msg}"),
            ApiError::Config(msg) => write!(f, "Configuration Error: {msg}"),
            ApiError::Validation(errors) => {
                write!(f, "Validation Error: {} errors", errors.len())
            }
        }
    }
}

impl std::fmt::Debug for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_error_kinds() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Config("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::validation("title", "bad").status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn validation_body_carries_field_detail() {
        let err = ApiError::missing_fields(vec!["title".to_string(), "body".to_string()]);
        let body = err.body();
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"][0]["field"], "title");
        assert_eq!(body["details"][1]["field"], "body");
    }

    #[test]
    fn plain_body_is_error_message() {
        let body = ApiError::BadRequest("Missing ID".into()).body();
        assert_eq!(body["error"], "Missing ID");
    }
}
