use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors produced by the cache decision engine.
///
/// Most variants here are never handed to a caller directly (see §7 of the
/// design: storage read/write failures and CAS exhaustion degrade to a miss
/// or a "not cached" outcome and are only logged). They exist as a typed
/// vocabulary for the engine's internal `Result` plumbing and for backends
/// that want to report a specific failure.
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// The request could not be admitted to cache resolution at all, e.g. a
    /// missing `Content-Length` on a request that requires one, or a
    /// malformed `Cache-Control` directive that made the request fatally
    /// non-compliant.
    #[error("malformed request: {0}")]
    #[diagnostic(code(http_cache_core::malformed_request))]
    MalformedRequest(String),

    /// A storage backend read failed. Callers never see this directly; the
    /// engine treats it as a cache miss.
    #[error("storage read failed: {0}")]
    #[diagnostic(code(http_cache_core::storage_read))]
    StorageReadError(String),

    /// A storage backend write failed. Callers never see this directly; the
    /// engine treats it as "not cached".
    #[error("storage write failed: {0}")]
    #[diagnostic(code(http_cache_core::storage_write))]
    StorageWriteError(String),

    /// A compare-and-swap update exhausted its retry budget.
    #[error("cache update failed after exhausting CAS retries")]
    #[diagnostic(code(http_cache_core::cache_update_failed))]
    CacheUpdateFailed,

    /// A body resource could not be read back during response
    /// reconstruction.
    #[error("resource I/O failed: {0}")]
    #[diagnostic(code(http_cache_core::resource_io))]
    ResourceIOError(String),

    /// The downstream executor failed.
    #[error("downstream exchange failed: {0}")]
    #[diagnostic(code(http_cache_core::backend_io))]
    BackendIOError(String),

    /// The exchange's cancellable was cancelled before completion.
    #[error("exchange cancelled")]
    #[diagnostic(code(http_cache_core::cancelled))]
    Cancelled,

    /// Error from `http`.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::http))]
    Http(#[from] http::Error),

    /// There was an error parsing an HTTP status code.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_status_code))]
    InvalidStatusCode(#[from] http::status::InvalidStatusCode),

    /// There was an error converting a header value to a string.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::header_to_str))]
    HeaderToStr(#[from] http::header::ToStrError),

    /// There was an error parsing an HTTP method.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_method))]
    InvalidMethod(#[from] http::method::InvalidMethod),

    /// There was an error parsing a URI.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_uri))]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// There was an error parsing a URL.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_url))]
    InvalidUrl(#[from] url::ParseError),

    /// There was an error parsing a header value.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_header_value))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// There was an error parsing a header name.
    #[error(transparent)]
    #[diagnostic(code(http_cache_core::invalid_header_name))]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// There was an error parsing the HTTP protocol version.
    #[error("unknown HTTP version")]
    #[diagnostic(code(http_cache_core::bad_version))]
    BadVersion,

    /// A header value could not be coerced to the expected shape.
    #[error("error parsing header value")]
    #[diagnostic(code(http_cache_core::bad_header))]
    BadHeader,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        assert_eq!(
            CacheError::CacheUpdateFailed.to_string(),
            "cache update failed after exhausting CAS retries"
        );
        assert_eq!(CacheError::Cancelled.to_string(), "exchange cancelled");
        assert_eq!(CacheError::BadVersion.to_string(), "unknown HTTP version");
        assert_eq!(
            CacheError::MalformedRequest("missing Content-Length".into())
                .to_string(),
            "malformed request: missing Content-Length"
        );
    }
}
