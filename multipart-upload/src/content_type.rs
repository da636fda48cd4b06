//! Content-Type parsing and boundary extraction.

use std::str::FromStr;

use actix_web::http::header::{self, HeaderMap};
use mime::Mime;

use crate::error::MultipartError;

/// Longest boundary allowed by [RFC 2046 §5.1.1](https://datatracker.ietf.org/doc/html/rfc2046#section-5.1.1).
pub(crate) const MAX_BOUNDARY_LEN: usize = 70;

/// A parsed media type: essence (`type/subtype`) plus parameters.
///
/// Parameter values may be quoted and may appear in any order. Parameter names are matched
/// case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    mime: Mime,
}

impl MediaType {
    /// Parses a header value such as `multipart/form-data; boundary="abc"`.
    pub fn parse(value: &str) -> Option<MediaType> {
        value.trim().parse::<Mime>().ok().map(|mime| MediaType { mime })
    }

    /// Returns the `type/subtype` part, lower-cased, without parameters.
    pub fn essence(&self) -> &str {
        self.mime.essence_str()
    }

    /// Returns the value of parameter `name`, with surrounding quotes removed.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.mime.get_param(name).map(|value| value.as_str())
    }

    /// Iterates over all parameters in the order they were written.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.mime
            .params()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Returns true for exactly `multipart/form-data`; structured suffixes such as
    /// `multipart/form-data+json` do not match.
    pub fn is_form_data(&self) -> bool {
        self.mime
            .essence_str()
            .eq_ignore_ascii_case(mime::MULTIPART_FORM_DATA.essence_str())
    }

    /// Returns the underlying [`Mime`].
    pub fn as_mime(&self) -> &Mime {
        &self.mime
    }

    /// Converts into the underlying [`Mime`].
    pub fn into_mime(self) -> Mime {
        self.mime
    }
}

impl FromStr for MediaType {
    type Err = MultipartError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        MediaType::parse(value).ok_or(MultipartError::UnsupportedContentType)
    }
}

/// Extracts the boundary from a `multipart/form-data` Content-Type header.
///
/// Fails with [`MultipartError::UnsupportedContentType`] if the header is missing, unparsable,
/// not exactly `multipart/form-data`, or has no non-empty `boundary` parameter.
pub fn form_data_boundary(headers: &HeaderMap) -> Result<String, MultipartError> {
    let media_type = headers
        .get(&header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(MediaType::parse)
        .ok_or(MultipartError::UnsupportedContentType)?;

    if !media_type.is_form_data() {
        return Err(MultipartError::UnsupportedContentType);
    }

    match media_type.param(mime::BOUNDARY.as_str()) {
        Some(boundary) if !boundary.is_empty() => Ok(boundary.to_owned()),
        _ => Err(MultipartError::UnsupportedContentType),
    }
}

/// Parses a part's Content-Type, falling back to `text/plain` when absent or unparsable.
///
/// See [RFC 7578 §4.4](https://datatracker.ietf.org/doc/html/rfc7578#section-4.4).
pub(crate) fn part_content_type(headers: &HeaderMap) -> Mime {
    headers
        .get(&header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(MediaType::parse)
        .map_or(mime::TEXT_PLAIN, MediaType::into_mime)
}
