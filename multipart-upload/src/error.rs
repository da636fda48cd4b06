//! Error and Result module

use std::io;

use actix_web::{
    error::{ParseError, PayloadError},
    http::StatusCode,
    ResponseError,
};
use derive_more::{Display, Error, From};

/// A set of errors that can occur while decoding a multipart stream or running the built-in
/// upload handlers.
///
/// Errors raised by caller-supplied upload handlers are never wrapped in this type; they are
/// returned to the caller exactly as the handler produced them.
#[derive(Debug, Display, From, Error)]
#[non_exhaustive]
pub enum MultipartError {
    /// Request Content-Type is not `multipart/form-data` or it has no `boundary` parameter.
    #[display("Content-Type is not multipart/form-data with a boundary")]
    UnsupportedContentType,

    /// Request has no body.
    #[display("Request body is missing")]
    MissingBody,

    /// Multipart boundary is empty or longer than 70 characters.
    #[display("Multipart boundary is invalid")]
    InvalidBoundary,

    /// A part's header block or delimiter line is not well formed.
    #[display("Malformed part: {_0}")]
    MalformedPart(MalformedPart),

    /// Byte source ended before the close delimiter was found.
    #[display("Multipart stream ended unexpectedly")]
    UnexpectedEndOfStream,

    /// Byte source error.
    #[display("{_0}")]
    Payload(PayloadError),

    /// A part was read after its decoder was dropped.
    #[display("Multipart stream is not consumed")]
    NotConsumed,

    /// Part data is larger than the limit of the handler reading it.
    #[display("Part `{field}` exceeds the size limit of {limit} bytes")]
    #[from(ignore)]
    PartSizeExceeded { field: String, limit: usize },

    /// I/O error while writing part data to disk.
    #[display("I/O error: {_0}")]
    Io(io::Error),
}

/// Reasons a part is rejected as malformed.
#[derive(Debug, Display, Error)]
#[non_exhaustive]
pub enum MalformedPart {
    /// Content-Disposition header is not found or is not equal to "form-data".
    ///
    /// According to [RFC 7578 §4.2](https://datatracker.ietf.org/doc/html/rfc7578#section-4.2) a
    /// Content-Disposition header must always be present and equal to "form-data".
    #[display("no Content-Disposition `form-data` header")]
    ContentDispositionMissing,

    /// Content-Disposition header has no `name` parameter.
    #[display("no name parameter in Content-Disposition header")]
    NameMissing,

    /// Part headers could not be parsed.
    #[display("{_0}")]
    Headers(ParseError),

    /// Part header block is larger than the decoder accepts.
    #[display("header block is too large")]
    HeadersTooLarge,

    /// Nested multipart bodies are not supported.
    #[display("nested multipart is not supported")]
    Nested,

    /// Text following a boundary is neither a line break nor the close marker.
    #[display("invalid delimiter line")]
    Delimiter,
}

impl From<ParseError> for MultipartError {
    fn from(err: ParseError) -> Self {
        MultipartError::MalformedPart(MalformedPart::Headers(err))
    }
}

impl ResponseError for MultipartError {
    fn status_code(&self) -> StatusCode {
        match self {
            MultipartError::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            MultipartError::PartSizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MultipartError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
