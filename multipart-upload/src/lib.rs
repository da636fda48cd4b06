//! Streaming `multipart/form-data` decoding with composable upload handlers.
//!
//! [`MultipartDecoder`] turns a stream of body chunks into a stream of [`Part`]s without buffering
//! whole parts. [`parse_multipart_form_data`] drives the decoder, hands each part to an
//! [`UploadHandler`], and collects the values into an ordered [`FormData`].
//!
//! Handlers can be combined with [`compose!`]: for each part the first handler producing a value
//! wins. Ready-made handlers live in [`handlers`].
//!
//! # Examples
//!
//! ```no_run
//! use actix_web::{post, web, HttpRequest, HttpResponse};
//! use multipart_upload::{
//!     compose, handlers::{MemoryUploadHandler, TempFileUploadHandler},
//!     parse_request, ComposedHandler, FormValue, MultipartError,
//! };
//!
//! #[post("/upload")]
//! async fn upload(
//!     req: HttpRequest,
//!     payload: web::Payload,
//! ) -> Result<HttpResponse, MultipartError> {
//!     let handler: ComposedHandler<FormValue> = compose![
//!         TempFileUploadHandler::new().max_part_size(64 * 1024 * 1024),
//!         MemoryUploadHandler::new().max_part_size(1024),
//!     ];
//!
//!     let form = parse_request(&req, &mut payload.into_inner(), &handler).await?;
//!
//!     Ok(HttpResponse::Ok().body(format!("received {} fields", form.len())))
//! }
//! ```

#![allow(clippy::borrow_interior_mutable_const)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod content_type;
mod decoder;
mod error;
mod form_data;
mod handler;
pub mod handlers;
mod part;
mod payload;
mod upload;

pub use self::content_type::{form_data_boundary, MediaType};
pub use self::decoder::MultipartDecoder;
pub use self::error::{MalformedPart, MultipartError};
pub use self::form_data::{File, FormData, FormValue, Iter};
pub use self::handler::{compose, handler_fn, ComposedHandler, Handled, HandlerFn, UploadHandler};
pub use self::part::Part;
pub use self::upload::{parse_multipart_form_data, parse_request};
