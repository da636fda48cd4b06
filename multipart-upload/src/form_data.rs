//! Ordered multi-value collection of parsed form entries.

use std::{slice, str, vec};

use actix_web::web::Bytes;
use mime::Mime;
use serde::de::DeserializeOwned;

/// Ordered name → value entries produced by parsing a form.
///
/// Mirrors the web platform `FormData` interface: names may repeat, and entries keep the order in
/// which parts appeared in the request body.
#[derive(Debug, Clone, PartialEq)]
pub struct FormData<V = FormValue> {
    entries: Vec<(String, V)>,
}

impl<V> FormData<V> {
    /// Constructs an empty form.
    pub fn new() -> Self {
        FormData {
            entries: Vec::new(),
        }
    }

    /// Appends an entry, keeping any existing entries with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: V) {
        self.entries.push((name.into(), value));
    }

    /// Replaces all entries named `name` with a single entry.
    ///
    /// The new entry takes the position of the first existing one, or goes last if there was none.
    pub fn set(&mut self, name: impl Into<String>, value: V) {
        let name = name.into();

        match self.entries.iter().position(|(key, _)| *key == name) {
            Some(idx) => {
                self.entries[idx].1 = value;
                let mut seen = 0;
                self.entries.retain(|(key, _)| {
                    if *key == name {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Removes every entry named `name`.
    pub fn delete(&mut self, name: &str) {
        self.entries.retain(|(key, _)| key != name);
    }

    /// Returns the first value named `name`.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Returns all values named `name`, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a V> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Returns true if at least one entry is named `name`.
    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    /// Iterates over entry names, repeated names included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Iterates over values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, value)| value)
    }

    /// Iterates over `(name, value)` entries in insertion order.
    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            inner: self.entries.iter(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FormData<FormValue> {
    /// Returns the first value named `name` if it is text.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FormValue::as_text)
    }

    /// Deserializes the first text value named `name`.
    ///
    /// Uses [`serde_plain`], which supports primitive types including strings, numbers, and simple
    /// enums. Returns `None` if there is no such text entry.
    pub fn get_text_as<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Option<Result<T, serde_plain::Error>> {
        self.get_text(name).map(serde_plain::from_str)
    }
}

impl<V> Default for FormData<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Into<String>, V> FromIterator<(N, V)> for FormData<V> {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut form = FormData::new();
        form.extend(iter);
        form
    }
}

impl<N: Into<String>, V> Extend<(N, V)> for FormData<V> {
    fn extend<I: IntoIterator<Item = (N, V)>>(&mut self, iter: I) {
        for (name, value) in iter {
            self.append(name, value);
        }
    }
}

/// Borrowing iterator over [`FormData`] entries.
#[derive(Debug)]
pub struct Iter<'a, V> {
    inner: slice::Iter<'a, (String, V)>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a str, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(key, value)| (key.as_str(), value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, V> IntoIterator for &'a FormData<V> {
    type Item = (&'a str, &'a V);
    type IntoIter = Iter<'a, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V> IntoIterator for FormData<V> {
    type Item = (String, V);
    type IntoIter = vec::IntoIter<(String, V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// A form entry value produced by the built-in upload handlers.
#[derive(Debug)]
#[non_exhaustive]
pub enum FormValue {
    /// A plain form field.
    Text(String),

    /// A file held in memory.
    File(File),

    /// A file written to a temporary location on disk.
    #[cfg(feature = "tempfile")]
    TempFile(crate::handlers::TempFile),
}

impl FormValue {
    /// Returns the text of a plain field.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the in-memory file.
    pub fn as_file(&self) -> Option<&File> {
        match self {
            FormValue::File(file) => Some(file),
            _ => None,
        }
    }

    /// Returns the client supplied file name of a file value.
    pub fn filename(&self) -> Option<&str> {
        match self {
            FormValue::Text(_) => None,
            FormValue::File(file) => Some(file.name()),
            #[cfg(feature = "tempfile")]
            FormValue::TempFile(file) => Some(file.name()),
        }
    }
}

impl PartialEq for FormValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FormValue::Text(a), FormValue::Text(b)) => a == b,
            (FormValue::File(a), FormValue::File(b)) => a == b,
            #[cfg(feature = "tempfile")]
            (FormValue::TempFile(a), FormValue::TempFile(b)) => a.path() == b.path(),
            _ => false,
        }
    }
}

impl From<String> for FormValue {
    fn from(text: String) -> Self {
        FormValue::Text(text)
    }
}

impl From<&str> for FormValue {
    fn from(text: &str) -> Self {
        FormValue::Text(text.to_owned())
    }
}

impl From<File> for FormValue {
    fn from(file: File) -> Self {
        FormValue::File(file)
    }
}

/// An uploaded file held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    name: String,
    content_type: Mime,
    data: Bytes,
}

impl File {
    /// Constructs a file from its name, media type, and contents.
    pub fn new(name: impl Into<String>, content_type: Mime, data: Bytes) -> Self {
        File {
            name: name.into(),
            content_type,
            data,
        }
    }

    /// Returns the client supplied file name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the part's media type.
    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    /// Returns the contents.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Returns the contents as UTF-8 text.
    pub fn text(&self) -> Result<&str, str::Utf8Error> {
        str::from_utf8(&self.data)
    }

    /// Returns the size of the contents in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Consumes the file, returning its contents.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}
