//! Ready-made upload handlers.

use std::rc::Rc;

use crate::Part;

mod memory;
#[cfg(feature = "tempfile")]
mod tempfile;

pub use self::memory::MemoryUploadHandler;
#[cfg(feature = "tempfile")]
pub use self::tempfile::{TempFile, TempFileUploadHandler};

/// Predicate deciding whether a handler accepts a part.
type PartFilter = Rc<dyn Fn(&Part) -> bool>;

fn accepts(filter: Option<&PartFilter>, part: &Part) -> bool {
    filter.map_or(true, |filter| filter(part))
}
