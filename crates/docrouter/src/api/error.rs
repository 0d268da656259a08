//! Defines the `ApiError` type returned from API handlers: an HTTP status
//! code wrapping an `anyhow::Error`. It implements `IntoResponse`, so
//! handlers return `Result<Json<T>, ApiError>` and use `?` throughout.
//! `From` impls exist for the common error sources with reasonable default
//! status codes; `ApiErrorExt::with_status` overrides the status when a
//! handler needs a specific one.
use axum::http::StatusCode;

use super::Rejection;

pub trait ApiErrorExt {
    /// Sets the http response status to use when responding with this error.
    fn with_status(self, status: StatusCode) -> ApiError;
}

impl<E: Into<ApiError> + Sized> ApiErrorExt for E {
    fn with_status(self, status: StatusCode) -> ApiError {
        let mut err: ApiError = self.into();
        err.status = status;
        err
    }
}

/// An error response, serialized as `{"status": ..., "error": ...}`.
#[derive(Debug, thiserror::Error, serde::Serialize)]
#[error("status: {status}, error: {error}")]
pub struct ApiError {
    #[serde(with = "status_serde")]
    pub status: StatusCode,
    #[serde(with = "error_serde")]
    #[source]
    pub error: anyhow::Error,
}

mod status_serde {
    use serde::ser::{Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        status: &axum::http::StatusCode,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        status.as_u16().serialize(s)
    }
}

mod error_serde {
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(error: &anyhow::Error, s: S) -> Result<S::Ok, S::Error> {
        let err_str = format!("{error:#}"); // alternate renders nested causes
        s.serialize_str(&err_str)
    }
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> ApiError {
        ApiError { status, error }
    }

    pub fn not_found(what: &str) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, anyhow::anyhow!("{what} not found"))
    }

    pub fn bad_request(error: anyhow::Error) -> ApiError {
        ApiError::new(StatusCode::BAD_REQUEST, error)
    }

    fn status_for(err: &anyhow::Error) -> StatusCode {
        // Keep a status that was attached before the error was funneled
        // through `?` as an anyhow::Error.
        if let Some(api_error) = err.downcast_ref::<ApiError>() {
            return api_error.status;
        }
        if err.downcast_ref::<Rejection>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        if err.downcast_ref::<ledger::SpuCreditError>().is_some() {
            return StatusCode::PAYMENT_REQUIRED;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> ApiError {
        tracing::error!(?error, "API responding with database error");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: anyhow::anyhow!("database error, please retry the request"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = Self::status_for(&error);
        ApiError { status, error }
    }
}

impl From<Rejection> for ApiError {
    fn from(value: Rejection) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::Error::from(value).context("Input validation error"),
        }
    }
}

impl From<ledger::Error> for ApiError {
    fn from(value: ledger::Error) -> Self {
        match value {
            ledger::Error::Credit(err) => ApiError {
                status: StatusCode::PAYMENT_REQUIRED,
                error: anyhow::Error::from(err).context("Insufficient SPU credits"),
            },
            ledger::Error::Sqlx(err) => err.into(),
        }
    }
}

impl From<docrouter_sql::tags::Error> for ApiError {
    fn from(value: docrouter_sql::tags::Error) -> Self {
        use docrouter_sql::tags::Error;
        match value {
            Error::DuplicateName(_) => {
                ApiError::new(StatusCode::CONFLICT, anyhow::Error::from(value))
            }
            Error::Sqlx(err) => err.into(),
        }
    }
}

impl From<docrouter_sql::schemas::Error> for ApiError {
    fn from(value: docrouter_sql::schemas::Error) -> Self {
        use docrouter_sql::schemas::Error;
        match value {
            Error::NotFound => ApiError::not_found("schema"),
            Error::DuplicateName(_) => {
                ApiError::new(StatusCode::CONFLICT, anyhow::Error::from(value))
            }
            Error::Referenced(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, anyhow::Error::from(value))
            }
            Error::Sqlx(err) => err.into(),
        }
    }
}

impl From<docrouter_sql::prompts::Error> for ApiError {
    fn from(value: docrouter_sql::prompts::Error) -> Self {
        use docrouter_sql::prompts::Error;
        match value {
            Error::NotFound => ApiError::not_found("prompt"),
            Error::DuplicateName(_) => {
                ApiError::new(StatusCode::CONFLICT, anyhow::Error::from(value))
            }
            Error::Sqlx(err) => err.into(),
        }
    }
}

impl From<docrouter_sql::forms::Error> for ApiError {
    fn from(value: docrouter_sql::forms::Error) -> Self {
        use docrouter_sql::forms::Error;
        match value {
            Error::NotFound => ApiError::not_found("form"),
            Error::DuplicateName(_) => {
                ApiError::new(StatusCode::CONFLICT, anyhow::Error::from(value))
            }
            Error::Sqlx(err) => err.into(),
        }
    }
}

impl From<blobs::Error> for ApiError {
    fn from(value: blobs::Error) -> Self {
        match &value {
            blobs::Error::NotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, anyhow::Error::from(value))
            }
            _ => {
                tracing::error!(error = ?value, "API responding with blob store error");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    anyhow::anyhow!("blob store error, please retry the request"),
                )
            }
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        (status, axum::Json(self)).into_response()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = ApiError::new(StatusCode::PAYMENT_REQUIRED, anyhow::anyhow!("out of SPUs"));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], 402);
        assert_eq!(json["error"], "out of SPUs");
    }

    #[test]
    fn test_credit_error_maps_to_402() {
        let err: ApiError = ledger::Error::Credit(ledger::SpuCreditError {
            required: 51.0,
            available: 50.0,
        })
        .into();
        assert_eq!(err.status, StatusCode::PAYMENT_REQUIRED);

        // The same holds when the credit error was wrapped by anyhow first.
        let wrapped: anyhow::Error = ledger::SpuCreditError {
            required: 2.0,
            available: 1.0,
        }
        .into();
        let err: ApiError = wrapped.into();
        assert_eq!(err.status, StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_status_survives_anyhow_round_trip() {
        let inner = ApiError::not_found("document");
        let wrapped: anyhow::Error = inner.into();
        let err: ApiError = wrapped.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
