use std::{
    cell::{Cell, RefCell, RefMut},
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use actix_web::{
    error::PayloadError,
    web::{Bytes, BytesMut},
};
use futures_core::stream::{LocalBoxStream, Stream};
use local_waker::LocalWaker;

use crate::error::MultipartError;

/// Payload buffer shared by a decoder and the one part it may have in flight.
///
/// While a part holds the [`Lease`] only the part reads the buffer; the decoder parks and is woken
/// when the lease is dropped.
pub(crate) struct SharedPayload {
    buffer: RefCell<PayloadBuffer>,

    /// True while a yielded part is alive.
    leased: Cell<bool>,

    /// Set once the decoder is dropped; the part in flight can no longer make progress.
    abandoned: Cell<bool>,

    /// Decoder task parked behind the part in flight.
    decoder_task: LocalWaker,
}

impl SharedPayload {
    pub(crate) fn new(buffer: PayloadBuffer) -> Rc<SharedPayload> {
        Rc::new(SharedPayload {
            buffer: RefCell::new(buffer),
            leased: Cell::new(false),
            abandoned: Cell::new(false),
            decoder_task: LocalWaker::new(),
        })
    }

    /// Borrows the buffer for the decoder.
    ///
    /// Returns `None` while a part is in flight, registering the decoder task to be woken when the
    /// part is dropped.
    pub(crate) fn for_decoder(&self, cx: &Context<'_>) -> Option<RefMut<'_, PayloadBuffer>> {
        if self.leased.get() {
            self.decoder_task.register(cx.waker());
            None
        } else {
            Some(self.buffer.borrow_mut())
        }
    }

    /// Hands the buffer over to a newly yielded part.
    pub(crate) fn lease(self: &Rc<Self>) -> Lease {
        debug_assert!(!self.leased.get(), "only one part may be in flight");
        self.leased.set(true);

        Lease {
            payload: Rc::clone(self),
        }
    }

    /// Marks the decoder as gone.
    pub(crate) fn abandon(&self) {
        self.abandoned.set(true);
    }
}

/// A part's claim on the [`SharedPayload`]. Dropping it returns the buffer to the decoder.
pub(crate) struct Lease {
    payload: Rc<SharedPayload>,
}

impl Lease {
    /// Borrows the buffer for the part.
    ///
    /// Fails with [`MultipartError::NotConsumed`] once the decoder has been dropped.
    pub(crate) fn buffer(&self) -> Result<RefMut<'_, PayloadBuffer>, MultipartError> {
        if self.payload.abandoned.get() {
            Err(MultipartError::NotConsumed)
        } else {
            Ok(self.payload.buffer.borrow_mut())
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.payload.leased.set(false);
        self.payload.decoder_task.wake();
    }
}

/// Rolling buffer over the request's byte-chunk source.
///
/// Chunks are pulled one at a time and only when the reader has run out of usable bytes, so the
/// buffer holds at most one chunk plus a delimiter's worth of held-back bytes.
pub(crate) struct PayloadBuffer {
    pub(crate) stream: LocalBoxStream<'static, Result<Bytes, PayloadError>>,
    pub(crate) buf: BytesMut,
    /// EOF flag. If true, no more payload reads will be attempted.
    pub(crate) eof: bool,
}

impl PayloadBuffer {
    /// Constructs new payload buffer.
    pub(crate) fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
    {
        PayloadBuffer {
            stream: Box::pin(stream),
            buf: BytesMut::with_capacity(1_024), // pre-allocate 1KiB
            eof: false,
        }
    }

    /// Pulls the next chunk from the source into the buffer.
    ///
    /// Resolves once a chunk was appended or the source is exhausted. Empty chunks are skipped.
    pub(crate) fn poll_fill(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), PayloadError>> {
        if self.eof {
            return Poll::Ready(Ok(()));
        }

        loop {
            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(data))) if data.is_empty() => continue,
                Poll::Ready(Some(Ok(data))) => {
                    self.buf.extend_from_slice(&data);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Err(err)),
                Poll::Ready(None) => {
                    self.eof = true;
                    return Poll::Ready(Ok(()));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    /// Reads until specified ending.
    ///
    /// `scanned` is the offset where the search starts. It is moved past the bytes already ruled
    /// out when `needle` is not found and reset to zero when it is, so repeated calls while the
    /// buffer fills never search the same bytes twice.
    ///
    /// Returns:
    ///
    /// - `Some(chunk)` - `needle` is found, with chunk ending after needle
    /// - `None` - `needle` is not found in the buffered bytes
    pub(crate) fn read_until(&mut self, needle: &[u8], scanned: &mut usize) -> Option<Bytes> {
        match memchr::memmem::find(&self.buf[*scanned..], needle) {
            Some(idx) => {
                let end = *scanned + idx + needle.len();
                *scanned = 0;
                Some(self.buf.split_to(end).freeze())
            }

            None => {
                *scanned = self.buf.len().saturating_sub(needle.len() - 1);
                None
            }
        }
    }

    /// Discards `size` bytes from the front of the buffer.
    pub(crate) fn advance(&mut self, size: usize) {
        let _ = self.buf.split_to(size);
    }
}
