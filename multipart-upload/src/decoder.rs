//! Streaming `multipart/form-data` decoder.

use std::{
    cell::RefCell,
    fmt,
    pin::Pin,
    rc::Rc,
    task::{ready, Context, Poll},
};

use actix_web::{
    error::{ParseError, PayloadError},
    http::header::{self, ContentDisposition, DispositionType, HeaderMap, HeaderName, HeaderValue},
    web::{Bytes, BytesMut},
};
use futures_core::stream::Stream;

use crate::{
    content_type::{form_data_boundary, part_content_type, MAX_BOUNDARY_LEN},
    error::{MalformedPart, MultipartError},
    part::{partial_delimiter_start, InnerPart},
    payload::{PayloadBuffer, SharedPayload},
    Part,
};

const MAX_HEADERS: usize = 32;

/// Largest part header block accepted, terminating blank line included.
const MAX_HEADER_BLOCK: usize = 16 * 1024;

const CRLF: &[u8] = b"\r\n";
const CRLF_CRLF: &[u8] = b"\r\n\r\n";
const HYPHENS: &[u8] = b"--";

/// Decodes a `multipart/form-data` byte stream into [`Part`]s.
///
/// Parts are yielded through the `Stream` implementation, in the order they appear in the body.
/// The byte source is pulled one chunk at a time and only as fast as parts are read; part bodies
/// are never buffered as a whole.
///
/// A yielded part must be dropped before the next one is requested; until then the decoder stays
/// `Pending`. Any part data left unread is discarded. After an error, or once the close
/// delimiter has been read, the stream is finished and returns `None`.
pub struct MultipartDecoder {
    flow: Flow,
}

enum Flow {
    InFlight(Inner),
    Done,
}

impl MultipartDecoder {
    /// Constructs a decoder for the given boundary and byte-chunk source.
    ///
    /// Fails with [`MultipartError::InvalidBoundary`] if `boundary` is empty, longer than 70
    /// characters, or contains a line break. No bytes are read from `stream` here.
    pub fn new<S>(boundary: &str, stream: S) -> Result<MultipartDecoder, MultipartError>
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
    {
        if boundary.is_empty()
            || boundary.len() > MAX_BOUNDARY_LEN
            || boundary.bytes().any(|b| b == b'\r' || b == b'\n')
        {
            return Err(MultipartError::InvalidBoundary);
        }

        let mut delimiter = BytesMut::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(CRLF);
        delimiter.extend_from_slice(HYPHENS);
        delimiter.extend_from_slice(boundary.as_bytes());

        let mut payload = PayloadBuffer::new(stream);

        // a leading line break lets the first delimiter be found like all the others
        payload.buf.extend_from_slice(CRLF);

        Ok(MultipartDecoder {
            flow: Flow::InFlight(Inner {
                payload: SharedPayload::new(payload),
                header_scan: 0,
                delimiter: delimiter.freeze(),
                state: State::Preamble,
                item: None,
            }),
        })
    }

    /// Constructs a decoder using the boundary of a `multipart/form-data` Content-Type header.
    pub fn from_headers<S>(headers: &HeaderMap, stream: S) -> Result<MultipartDecoder, MultipartError>
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
    {
        let boundary = form_data_boundary(headers)?;
        MultipartDecoder::new(&boundary, stream)
    }
}

impl Stream for MultipartDecoder {
    type Item = Result<Part, MultipartError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let Flow::InFlight(ref mut inner) = this.flow else {
            return Poll::Ready(None);
        };

        let payload = Rc::clone(&inner.payload);

        let res = match payload.for_decoder(cx) {
            Some(mut buffer) => ready!(inner.poll(&mut buffer, cx)),

            None => {
                log::trace!("part is in flight");
                return Poll::Pending;
            }
        };

        if !matches!(res, Some(Ok(_))) {
            this.flow = Flow::Done;
        }

        Poll::Ready(res)
    }
}

impl fmt::Debug for MultipartDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("MultipartDecoder");

        match &self.flow {
            Flow::InFlight(inner) => dbg
                .field("state", &inner.state)
                .field("boundary", &String::from_utf8_lossy(&inner.delimiter[4..])),
            Flow::Done => dbg.field("state", &"Done"),
        };

        dbg.finish()
    }
}

#[derive(PartialEq, Debug)]
enum State {
    /// Skip data until first boundary.
    Preamble,

    /// Reading boundary line.
    Boundary,

    /// Reading part headers.
    Headers,

    /// Close delimiter read.
    Eof,
}

struct Inner {
    /// Request's payload stream & buffer.
    payload: Rc<SharedPayload>,

    /// Header block bytes already searched for the terminating blank line.
    header_scan: usize,

    /// `CRLF--boundary`.
    delimiter: Bytes,

    state: State,

    /// Body state of the last yielded part.
    item: Option<Rc<RefCell<InnerPart>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.payload.abandon();
    }
}

impl Inner {
    fn boundary_len(&self) -> usize {
        self.delimiter.len() - CRLF.len() - HYPHENS.len()
    }

    /// Skips the preamble up to the first delimiter.
    ///
    /// Returns `Ok(true)` once positioned at `--boundary`, `Ok(false)` if more data is needed.
    fn read_preamble(&mut self, payload: &mut PayloadBuffer) -> Result<bool, MultipartError> {
        match memchr::memmem::find(&payload.buf, &self.delimiter) {
            Some(idx) => {
                payload.advance(idx + CRLF.len());
                self.state = State::Boundary;
                Ok(true)
            }

            None if payload.eof => Err(MultipartError::UnexpectedEndOfStream),

            None => {
                let keep_from = partial_delimiter_start(&payload.buf, &self.delimiter);
                payload.advance(keep_from);
                Ok(false)
            }
        }
    }

    /// Reads a boundary line (and discards it).
    ///
    /// Reads "in-between" and "final" boundaries. E.g. for boundary = "foo":
    ///
    /// ```plain
    /// --foo    <-- in-between parts
    /// --foo--  <-- end of request body, anything after it is ignored
    /// ```
    ///
    /// The buffer is known to start with `--foo` here since the delimiter was already matched.
    fn read_boundary(&mut self, payload: &mut PayloadBuffer) -> Result<bool, MultipartError> {
        let marker_at = HYPHENS.len() + self.boundary_len();
        let line_len = marker_at + 2;

        if payload.buf.len() < line_len {
            return if payload.eof {
                Err(MultipartError::UnexpectedEndOfStream)
            } else {
                Ok(false)
            };
        }

        match &payload.buf[marker_at..line_len] {
            // boundary is followed by line-break, indicating more parts to come
            CRLF => self.state = State::Headers,

            HYPHENS => {
                log::trace!("close delimiter read");
                self.state = State::Eof;
            }

            _ => return Err(MalformedPart::Delimiter.into()),
        }

        payload.advance(line_len);
        Ok(true)
    }

    /// Reads a part's header block, up to and including the blank line.
    fn read_headers(
        &mut self,
        payload: &mut PayloadBuffer,
    ) -> Result<Option<HeaderMap>, MultipartError> {
        let block = if payload.buf.starts_with(CRLF) {
            // no headers at all
            Some(payload.buf.split_to(CRLF.len()).freeze())
        } else {
            payload.read_until(CRLF_CRLF, &mut self.header_scan)
        };

        let Some(block) = block else {
            return if payload.buf.len() > MAX_HEADER_BLOCK {
                Err(MalformedPart::HeadersTooLarge.into())
            } else if payload.eof {
                Err(MultipartError::UnexpectedEndOfStream)
            } else {
                Ok(None)
            };
        };

        if block.len() > MAX_HEADER_BLOCK {
            return Err(MalformedPart::HeadersTooLarge.into());
        }

        let mut hdrs = [httparse::EMPTY_HEADER; MAX_HEADERS];

        match httparse::parse_headers(&block, &mut hdrs).map_err(ParseError::from)? {
            httparse::Status::Complete((_, hdrs)) => {
                // convert headers
                let mut headers = HeaderMap::with_capacity(hdrs.len());

                for h in hdrs {
                    let name = HeaderName::try_from(h.name).map_err(|_| ParseError::Header)?;
                    let value = HeaderValue::try_from(h.value).map_err(|_| ParseError::Header)?;
                    headers.append(name, value);
                }

                Ok(Some(headers))
            }

            httparse::Status::Partial => Err(ParseError::Header.into()),
        }
    }

    /// Validates a part's headers and hands out the part.
    fn start_part(&mut self, headers: HeaderMap) -> Result<Part, MultipartError> {
        // According to RFC 7578 §4.2, parts of "multipart/form-data" requests must have a
        // Content-Disposition header, its disposition type must be "form-data", and it must have
        // a name parameter.
        let content_disposition = headers
            .get(&header::CONTENT_DISPOSITION)
            .and_then(|cd| ContentDisposition::from_raw(cd).ok())
            .filter(|cd| matches!(cd.disposition, DispositionType::FormData))
            .ok_or(MalformedPart::ContentDispositionMissing)?;

        let name = content_disposition
            .get_name()
            .ok_or(MalformedPart::NameMissing)?
            .to_owned();

        let content_type = part_content_type(&headers);

        // nested multipart stream is not supported
        if content_type.type_() == mime::MULTIPART {
            return Err(MalformedPart::Nested.into());
        }

        log::trace!("part `{}` headers read", name);

        let inner = InnerPart::new_in_rc(self.delimiter.clone());
        self.item = Some(Rc::clone(&inner));
        self.state = State::Boundary;

        Ok(Part::new(
            name,
            content_disposition,
            content_type,
            headers,
            self.payload.lease(),
            inner,
        ))
    }

    fn poll(
        &mut self,
        payload: &mut PayloadBuffer,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Part, MultipartError>>> {
        // previous part must be read to its end before the next boundary can be found
        if let Some(item) = &self.item {
            loop {
                match ready!(item.borrow_mut().poll(payload, cx)) {
                    Some(Ok(chunk)) => {
                        log::trace!("discarding {} unread part bytes", chunk.len());
                    }
                    Some(Err(err)) => return Poll::Ready(Some(Err(err))),
                    None => break,
                }
            }

            self.item = None;
        }

        loop {
            let advanced = match self.state {
                State::Preamble => self.read_preamble(payload)?,

                State::Boundary => self.read_boundary(payload)?,

                State::Headers => match self.read_headers(payload)? {
                    Some(headers) => {
                        return Poll::Ready(Some(self.start_part(headers)));
                    }
                    None => false,
                },

                State::Eof => return Poll::Ready(None),
            };

            if !advanced {
                ready!(payload.poll_fill(cx))?;
            }
        }
    }
}
