//! Buffers parts in memory.

use std::{fmt, rc::Rc};

use actix_web::web::BytesMut;
use futures_core::future::LocalBoxFuture;
use futures_util::TryStreamExt as _;

use super::{accepts, PartFilter};
use crate::{File, FormValue, Handled, MultipartError, Part, UploadHandler};

const DEFAULT_MAX_PART_SIZE: usize = 3 * 1024 * 1024; // 3 MiB

/// Reads whole parts into memory.
///
/// Parts with a file name become [`FormValue::File`], others become [`FormValue::Text`] (invalid
/// UTF-8 is replaced lossily).
///
/// Parts larger than [`max_part_size`](Self::max_part_size) (3 MiB by default) fail with
/// [`MultipartError::PartSizeExceeded`] as soon as the limit is crossed.
#[derive(Clone)]
pub struct MemoryUploadHandler {
    max_part_size: usize,
    filter: Option<PartFilter>,
}

impl MemoryUploadHandler {
    /// Constructs a handler with the default 3 MiB part size limit.
    pub fn new() -> Self {
        MemoryUploadHandler {
            max_part_size: DEFAULT_MAX_PART_SIZE,
            filter: None,
        }
    }

    /// Sets maximum accepted size of a single part, in bytes.
    pub fn max_part_size(mut self, max_part_size: usize) -> Self {
        self.max_part_size = max_part_size;
        self
    }

    /// Only handles parts for which `filter` returns true; other parts are skipped.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Part) -> bool + 'static,
    {
        self.filter = Some(Rc::new(filter));
        self
    }

    async fn read(&self, part: &mut Part) -> Result<Handled<FormValue>, MultipartError> {
        if !accepts(self.filter.as_ref(), part) {
            return Ok(Handled::Skip);
        }

        let mut buf = BytesMut::new();

        while let Some(chunk) = part.try_next().await? {
            if buf.len() + chunk.len() > self.max_part_size {
                return Err(MultipartError::PartSizeExceeded {
                    field: part.name().to_owned(),
                    limit: self.max_part_size,
                });
            }

            buf.extend_from_slice(&chunk);
        }

        let value = match part.filename() {
            Some(filename) => FormValue::File(File::new(
                filename,
                part.content_type().clone(),
                buf.freeze(),
            )),
            None => FormValue::Text(String::from_utf8_lossy(&buf).into_owned()),
        };

        log::trace!("buffered part `{}` in memory", part.name());

        Ok(Handled::Value(value))
    }
}

impl Default for MemoryUploadHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryUploadHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryUploadHandler")
            .field("max_part_size", &self.max_part_size)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl<E> UploadHandler<FormValue, E> for MemoryUploadHandler
where
    E: From<MultipartError> + 'static,
{
    fn handle<'a>(&'a self, part: &'a mut Part) -> LocalBoxFuture<'a, Result<Handled<FormValue>, E>> {
        Box::pin(async move { self.read(part).await.map_err(E::from) })
    }
}
