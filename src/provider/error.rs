//! Errors raised by provider adapter calls.

use thiserror::Error;

/// Failures crossing the provider API boundary.
///
/// - [`BucketNotFound`](ProviderError::BucketNotFound) and
///   [`AccessDenied`](ProviderError::AccessDenied) are answers from the provider
/// - [`ApiError`](ProviderError::ApiError) is any other non-success status
/// - [`NetworkError`](ProviderError::NetworkError) never reached the provider
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("bucket `{0}` does not exist")]
    BucketNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("adapter error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_display() {
        let err = ProviderError::ApiError {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "adapter error (status 500): boom");
    }

    #[test]
    fn bucket_errors_name_the_bucket() {
        assert_eq!(
            ProviderError::BucketNotFound("b1".into()).to_string(),
            "bucket `b1` does not exist"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProviderError>();
    }
}
