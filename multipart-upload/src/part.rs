use std::{
    cell::RefCell,
    fmt,
    pin::Pin,
    rc::Rc,
    task::{ready, Context, Poll},
};

use actix_web::{
    http::header::{ContentDisposition, HeaderMap},
    web::{Bytes, BytesMut},
};
use futures_core::Stream;
use futures_util::TryStreamExt as _;
use mime::Mime;

use crate::{
    error::MultipartError,
    payload::{Lease, PayloadBuffer},
};

/// A single part of a `multipart/form-data` body.
///
/// The part's body is read through its [`Stream`] implementation. It can be read only once: after
/// the stream has returned `None` it keeps returning `None`. Bytes that are not read are discarded
/// before the next part is decoded.
///
/// While a `Part` is alive its [`MultipartDecoder`](crate::MultipartDecoder) will not advance.
/// Drop the part before asking the decoder for the next one.
pub struct Part {
    /// Form field name.
    ///
    // INVARIANT: taken from the `name` parameter of a `form-data` Content-Disposition.
    name: String,

    /// The `filename` parameter of the Content-Disposition header, present for file inputs.
    filename: Option<String>,

    /// Declared Content-Type, `text/plain` when absent.
    content_type: Mime,

    content_disposition: ContentDisposition,

    headers: HeaderMap,

    lease: Lease,
    inner: Rc<RefCell<InnerPart>>,
}

impl Part {
    pub(crate) fn new(
        name: String,
        content_disposition: ContentDisposition,
        content_type: Mime,
        headers: HeaderMap,
        lease: Lease,
        inner: Rc<RefCell<InnerPart>>,
    ) -> Self {
        Part {
            filename: content_disposition.get_filename().map(ToOwned::to_owned),
            name,
            content_type,
            content_disposition,
            headers,
            lease,
            inner,
        }
    }

    /// Returns the form field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the client supplied file name, if this part is a file upload.
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Returns true if the part carries a file name.
    pub fn is_file(&self) -> bool {
        self.filename.is_some()
    }

    /// Returns the part's content (mime) type.
    ///
    /// According to [RFC 7578](https://www.rfc-editor.org/rfc/rfc7578#section-4.4), if it is not
    /// present, it should default to "text/plain". Note it is the responsibility of the client to
    /// provide the appropriate content type, there is no attempt to validate this.
    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    /// Returns the part's parsed Content-Disposition header.
    pub fn content_disposition(&self) -> &ContentDisposition {
        &self.content_disposition
    }

    /// Returns a reference to the part's header map.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns true once the body has been read to its end.
    pub fn is_consumed(&self) -> bool {
        self.inner.borrow().done
    }

    /// Collects the rest of the body into memory, up to `limit` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MultipartError::PartSizeExceeded`] as soon as more than `limit` bytes have been
    /// seen. The remaining bytes are left unread.
    pub async fn bytes(&mut self, limit: usize) -> Result<Bytes, MultipartError> {
        let mut buf = BytesMut::new();

        while let Some(chunk) = self.try_next().await? {
            if buf.len() + chunk.len() > limit {
                return Err(MultipartError::PartSizeExceeded {
                    field: self.name.clone(),
                    limit,
                });
            }

            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }

    /// Reads and discards whatever is left of the body.
    ///
    /// Returns the number of bytes discarded; zero if the body was already read to its end.
    pub async fn drain(&mut self) -> Result<u64, MultipartError> {
        let mut discarded = 0;

        while let Some(chunk) = self.try_next().await? {
            discarded += chunk.len() as u64;
        }

        if discarded > 0 {
            log::debug!(
                "discarded {} unread bytes of part `{}`",
                discarded,
                self.name
            );
        }

        Ok(discarded)
    }
}

impl Stream for Part {
    type Item = Result<Bytes, MultipartError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.inner.borrow().done {
            return Poll::Ready(None);
        }

        match this.lease.buffer() {
            Ok(mut buffer) => this.inner.borrow_mut().poll(&mut buffer, cx),

            // decoder was dropped while this part was in flight
            Err(err) => Poll::Ready(Some(Err(err))),
        }
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nPart: {}", self.content_type)?;
        writeln!(f, "  name: {}", self.name)?;
        if let Some(filename) = &self.filename {
            writeln!(f, "  filename: {}", filename)?;
        }
        writeln!(f, "  headers:")?;
        for (key, val) in self.headers.iter() {
            writeln!(f, "    {:?}: {:?}", key, val)?;
        }
        Ok(())
    }
}

/// Body reading state shared by a [`Part`] and the decoder that yielded it.
pub(crate) struct InnerPart {
    /// `CRLF--boundary`.
    delimiter: Bytes,

    /// True once the delimiter ending this body has been reached.
    done: bool,
}

impl InnerPart {
    pub(crate) fn new_in_rc(delimiter: Bytes) -> Rc<RefCell<InnerPart>> {
        Rc::new(RefCell::new(InnerPart {
            delimiter,
            done: false,
        }))
    }

    /// Reads the next body chunk, pulling from the source as needed.
    pub(crate) fn poll(
        &mut self,
        payload: &mut PayloadBuffer,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Bytes, MultipartError>>> {
        if self.done {
            return Poll::Ready(None);
        }

        loop {
            match Self::read_body(payload, &self.delimiter) {
                // more bytes needed
                Poll::Pending => ready!(payload.poll_fill(cx))?,

                Poll::Ready(None) => {
                    self.done = true;
                    return Poll::Ready(None);
                }

                res => return res,
            }
        }
    }

    /// Splits the next chunk of body data off the buffer.
    ///
    /// Returns:
    ///
    /// - `Ready(Some(Ok(chunk)))` - bytes known to belong to the body
    /// - `Ready(None)` - delimiter reached; its leading CRLF is consumed, leaving `--boundary`
    /// - `Ready(Some(Err(UnexpectedEndOfStream)))` - source ended inside the body
    /// - `Pending` - more bytes are needed to tell body data from a delimiter
    fn read_body(
        payload: &mut PayloadBuffer,
        delimiter: &[u8],
    ) -> Poll<Option<Result<Bytes, MultipartError>>> {
        match memchr::memmem::find(&payload.buf, delimiter) {
            Some(0) => {
                payload.advance(2);
                Poll::Ready(None)
            }

            Some(idx) => Poll::Ready(Some(Ok(payload.buf.split_to(idx).freeze()))),

            None => match partial_delimiter_start(&payload.buf, delimiter) {
                0 if payload.eof => {
                    Poll::Ready(Some(Err(MultipartError::UnexpectedEndOfStream)))
                }
                0 => Poll::Pending,
                idx => Poll::Ready(Some(Ok(payload.buf.split_to(idx).freeze()))),
            },
        }
    }
}

/// Returns where a delimiter cut short by the end of `buf` could start, or `buf.len()`.
///
/// Only the last `delimiter.len() - 1` bytes are inspected, so bytes before the returned index
/// can never be part of a delimiter.
pub(crate) fn partial_delimiter_start(buf: &[u8], delimiter: &[u8]) -> usize {
    let from = buf.len().saturating_sub(delimiter.len() - 1);

    memchr::memchr_iter(b'\r', &buf[from..])
        .map(|idx| from + idx)
        .find(|&idx| delimiter.starts_with(&buf[idx..]))
        .unwrap_or(buf.len())
}
