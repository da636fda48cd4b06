//! Streams file parts to temporary files on disk.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    rc::Rc,
};

use futures_core::future::LocalBoxFuture;
use futures_util::TryStreamExt as _;
use mime::Mime;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt as _;

use super::{accepts, PartFilter};
use crate::{FormValue, Handled, MultipartError, Part, UploadHandler};

/// A file part written to a temporary file.
///
/// The file is deleted when this value is dropped unless it is [persisted](Self::persist).
#[derive(Debug)]
pub struct TempFile {
    file: NamedTempFile,
    name: String,
    content_type: Mime,
    size: u64,
}

impl TempFile {
    /// Returns the client supplied file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the part's media type.
    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    /// Returns the number of bytes written.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns the location of the temporary file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Returns the underlying temporary file.
    pub fn file(&self) -> &NamedTempFile {
        &self.file
    }

    /// Consumes the value, returning the underlying temporary file.
    pub fn into_file(self) -> NamedTempFile {
        self.file
    }

    /// Moves the file to `path`, keeping it after this value is dropped.
    pub fn persist(self, path: impl AsRef<Path>) -> io::Result<std::fs::File> {
        self.file.persist(path).map_err(|err| err.error)
    }
}

/// Writes file parts (those with a file name) to temporary files.
///
/// Parts without a file name are skipped, as are parts rejected by the
/// [`filter`](Self::filter). There is no size limit unless one is set with
/// [`max_part_size`](Self::max_part_size).
#[derive(Clone, Default)]
pub struct TempFileUploadHandler {
    directory: Option<PathBuf>,
    max_part_size: Option<usize>,
    filter: Option<PartFilter>,
}

impl TempFileUploadHandler {
    /// Constructs a handler writing to the system temporary directory, with no size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory temporary files are created in.
    ///
    /// Defaults to the system temporary directory.
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = Some(dir.into());
        self
    }

    /// Sets maximum accepted size of a single file, in bytes.
    pub fn max_part_size(mut self, max_part_size: usize) -> Self {
        self.max_part_size = Some(max_part_size);
        self
    }

    /// Only handles file parts for which `filter` returns true; other parts are skipped.
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Part) -> bool + 'static,
    {
        self.filter = Some(Rc::new(filter));
        self
    }

    fn create_tempfile(&self) -> io::Result<NamedTempFile> {
        match self.directory {
            Some(ref dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
    }

    async fn write(&self, part: &mut Part) -> Result<Handled<FormValue>, MultipartError> {
        let Some(filename) = part.filename().map(ToOwned::to_owned) else {
            return Ok(Handled::Skip);
        };

        if !accepts(self.filter.as_ref(), part) {
            return Ok(Handled::Skip);
        }

        let file = self.create_tempfile()?;
        let mut file_async = tokio::fs::File::from_std(file.reopen()?);
        let mut size = 0;

        while let Some(chunk) = part.try_next().await? {
            if let Some(limit) = self.max_part_size {
                if size + chunk.len() > limit {
                    return Err(MultipartError::PartSizeExceeded {
                        field: part.name().to_owned(),
                        limit,
                    });
                }
            }

            size += chunk.len();
            file_async.write_all(&chunk).await?;
        }

        file_async.flush().await?;

        log::debug!(
            "wrote {} bytes of part `{}` to {}",
            size,
            part.name(),
            file.path().display()
        );

        Ok(Handled::Value(FormValue::TempFile(TempFile {
            file,
            name: filename,
            content_type: part.content_type().clone(),
            size: size as u64,
        })))
    }
}

impl fmt::Debug for TempFileUploadHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempFileUploadHandler")
            .field("directory", &self.directory)
            .field("max_part_size", &self.max_part_size)
            .field("filter", &self.filter.is_some())
            .finish()
    }
}

impl<E> UploadHandler<FormValue, E> for TempFileUploadHandler
where
    E: From<MultipartError> + 'static,
{
    fn handle<'a>(&'a self, part: &'a mut Part) -> LocalBoxFuture<'a, Result<Handled<FormValue>, E>> {
        Box::pin(async move { self.write(part).await.map_err(E::from) })
    }
}
