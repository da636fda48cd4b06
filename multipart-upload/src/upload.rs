//! Drives the decoder and upload handlers to build a [`FormData`].

use actix_web::{
    dev,
    error::PayloadError,
    http::header::{self, HeaderMap},
    web::Bytes,
    HttpRequest,
};
use futures_core::Stream;
use futures_util::TryStreamExt as _;

use crate::{
    content_type::form_data_boundary, FormData, Handled, MultipartDecoder, MultipartError,
    UploadHandler,
};

/// Parses a `multipart/form-data` body, passing each part to `handler`.
///
/// Parts are handled one at a time, in body order. Values produced by the handler are appended to
/// the returned form under the part's field name; skipped parts leave no entry. Whatever the
/// handler leaves unread is discarded before the next part is decoded.
///
/// # Errors
///
/// - [`MultipartError::UnsupportedContentType`] if `headers` do not declare `multipart/form-data`
///   with a boundary. Nothing is read from `body`.
/// - [`MultipartError::MissingBody`] if `body` is `None`.
/// - Any decoding error, converted into `E`.
/// - The first error returned by `handler`, as is. Parsing stops there and no form is returned.
///
/// # Examples
///
/// ```
/// # actix_rt::System::new().block_on(async {
/// use actix_web::{error::PayloadError, web::Bytes};
/// use futures_util::stream;
/// use multipart_upload::{
///     handlers::MemoryUploadHandler, parse_multipart_form_data, test::FormBuilder, FormData,
///     FormValue, MultipartError,
/// };
///
/// let (body, headers) = FormBuilder::new().field("greeting", "hello").build();
/// let body = stream::iter([Ok::<Bytes, PayloadError>(body)]);
///
/// let handler = MemoryUploadHandler::new();
/// let form: FormData<FormValue> =
///     parse_multipart_form_data::<_, _, _, MultipartError>(&headers, Some(body), &handler)
///         .await
///         .unwrap();
///
/// assert_eq!(form.get_text("greeting"), Some("hello"));
/// # });
/// ```
pub async fn parse_multipart_form_data<S, H, V, E>(
    headers: &HeaderMap,
    body: Option<S>,
    handler: &H,
) -> Result<FormData<V>, E>
where
    S: Stream<Item = Result<Bytes, PayloadError>> + 'static,
    H: UploadHandler<V, E> + ?Sized,
    E: From<MultipartError>,
{
    let boundary = form_data_boundary(headers)?;
    let body = body.ok_or(MultipartError::MissingBody)?;

    let mut parts = MultipartDecoder::new(&boundary, body)?;
    let mut form = FormData::new();

    while let Some(mut part) = parts.try_next().await? {
        let handled = handler.handle(&mut part).await?;
        part.drain().await?;

        match handled {
            Handled::Value(value) => form.append(part.name(), value),
            Handled::Skip => log::trace!("handler skipped part `{}`", part.name()),
        }
    }

    Ok(form)
}

/// Parses the `multipart/form-data` body of an actix-web request.
///
/// Takes the request payload. The body counts as missing, failing with
/// [`MultipartError::MissingBody`], when the payload is [`dev::Payload::None`] or the request
/// declares `Content-Length: 0`. See [`parse_multipart_form_data`] for the rest of the behavior.
pub async fn parse_request<H, V, E>(
    req: &HttpRequest,
    payload: &mut dev::Payload,
    handler: &H,
) -> Result<FormData<V>, E>
where
    H: UploadHandler<V, E> + ?Sized,
    E: From<MultipartError>,
{
    let body = match payload.take() {
        dev::Payload::None => None,
        _ if declares_empty_body(req.headers()) => None,
        payload => Some(payload),
    };

    parse_multipart_form_data(req.headers(), body, handler).await
}

fn declares_empty_body(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|len| len.to_str().ok())
        .and_then(|len| len.trim().parse::<u64>().ok())
        == Some(0)
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use actix_web::{http::header::HeaderValue, test::TestRequest};
    use assert_matches::assert_matches;
    use futures_test::stream::StreamTestExt as _;
    use futures_util::{stream, StreamExt as _};

    use super::*;
    use crate::{
        compose, handler_fn, handlers::MemoryUploadHandler, test::FormBuilder, ComposedHandler,
        FormValue, Part,
    };

    #[derive(Debug, PartialEq)]
    enum AppError {
        Rejected(String),
        Multipart(String),
    }

    impl From<MultipartError> for AppError {
        fn from(err: MultipartError) -> Self {
            AppError::Multipart(err.to_string())
        }
    }

    fn one_chunk(body: Bytes) -> impl Stream<Item = Result<Bytes, PayloadError>> {
        stream::iter([Ok(body)])
    }

    fn chunked(body: &Bytes, size: usize) -> Vec<Result<Bytes, PayloadError>> {
        body.chunks(size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect()
    }

    fn scenario() -> (Bytes, HeaderMap) {
        FormBuilder::new()
            .field("a", "value")
            .file("blob", "blob.txt", mime::TEXT_PLAIN, "blob")
            .file("file", "file.txt", mime::TEXT_PLAIN, "file")
            .build()
    }

    async fn parse(
        (body, headers): (Bytes, HeaderMap),
        handler: &dyn UploadHandler<FormValue>,
    ) -> Result<FormData<FormValue>, MultipartError> {
        parse_multipart_form_data(&headers, Some(one_chunk(body)), handler).await
    }

    /// Yields `(filename, bytes)` for every part.
    fn reassemble() -> impl UploadHandler<(Option<String>, Bytes)> {
        handler_fn(|part: &mut Part| {
            Box::pin(async move {
                let filename = part.filename().map(ToOwned::to_owned);
                let data = part.bytes(usize::MAX).await?;
                Ok::<_, MultipartError>(Handled::Value((filename, data)))
            })
        })
    }

    /// Rejects parts with the given name.
    fn reject(name: &'static str) -> impl UploadHandler<FormValue, AppError> {
        handler_fn(move |part: &mut Part| {
            let res = if part.name() == name {
                Err(AppError::Rejected(name.to_owned()))
            } else {
                Ok(Handled::Skip)
            };
            Box::pin(async move { res })
        })
    }

    #[actix_rt::test]
    async fn text_and_files() {
        let form = parse(scenario(), &MemoryUploadHandler::new()).await.unwrap();

        assert_eq!(form.get_text("a"), Some("value"));

        let blob = form.get("blob").and_then(FormValue::as_file).unwrap();
        assert_eq!(blob.text(), Ok("blob"));

        let file = form.get("file").and_then(FormValue::as_file).unwrap();
        assert_eq!(file.name(), "file.txt");
        assert_eq!(file.text(), Ok("file"));
    }

    #[actix_rt::test]
    async fn field_values_round_trip() {
        let values = ["", "x", "with spaces", "multi\nline", "crlf\r\ninside", "ünïcödé", "--"];

        for value in values {
            let (body, headers) = FormBuilder::new().field("f", value).build();
            let form = parse((body, headers), &MemoryUploadHandler::new()).await.unwrap();
            assert_eq!(form.get_text("f"), Some(value));
        }
    }

    #[actix_rt::test]
    async fn binary_round_trip() {
        let boundary = FormBuilder::new().boundary().to_owned();

        let payloads = [
            Bytes::new(),
            Bytes::from_static(b"\0\xFF\xFE"),
            Bytes::from_static(b"\r\n"),
            Bytes::from([&b"\r\n--"[..], &boundary.as_bytes()[..boundary.len() - 1]].concat()),
            (0..=255).collect::<Vec<u8>>().repeat(64).into(),
        ];

        for data in payloads {
            let (body, headers) = FormBuilder::with_boundary(boundary.clone())
                .file("upload", "data.bin", mime::APPLICATION_OCTET_STREAM, data.clone())
                .build();

            let form = parse_multipart_form_data(
                &headers,
                Some(stream::iter(chunked(&body, 7))),
                &reassemble(),
            )
            .await
            .unwrap();

            let (filename, bytes) = form.get("upload").unwrap();
            assert_eq!(filename.as_deref(), Some("data.bin"));
            assert_eq!(bytes, &data);
        }
    }

    #[actix_rt::test]
    async fn entries_follow_body_order() {
        let (body, headers) = FormBuilder::new()
            .field("z", "1")
            .field("a", "2")
            .field("z", "3")
            .field("m", "4")
            .build();

        let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
        let handler = {
            let seen = Rc::clone(&seen);
            handler_fn(move |part: &mut Part| {
                seen.borrow_mut().push(part.name().to_owned());
                Box::pin(async move {
                    let data = part.bytes(usize::MAX).await?;
                    Ok::<_, MultipartError>(Handled::Value(data))
                })
            })
        };

        let form = parse_multipart_form_data(&headers, Some(one_chunk(body)), &handler)
            .await
            .unwrap();

        assert_eq!(*seen.borrow(), ["z", "a", "z", "m"]);
        assert_eq!(form.keys().collect::<Vec<_>>(), ["z", "a", "z", "m"]);
        assert_eq!(
            form.get_all("z").collect::<Vec<_>>(),
            [&Bytes::from_static(b"1"), &Bytes::from_static(b"3")],
        );
    }

    #[actix_rt::test]
    async fn composed_first_value_wins() {
        let handler: ComposedHandler<FormValue, AppError> = compose![
            MemoryUploadHandler::new().filter(|part| part.is_file()),
            handler_fn(|_part: &mut Part| {
                Box::pin(async { Ok::<_, AppError>(Handled::Value(FormValue::from("fallback"))) })
            }),
        ];

        let (body, headers) = scenario();
        let form = parse_multipart_form_data(&headers, Some(one_chunk(body)), &handler)
            .await
            .unwrap();

        assert_eq!(form.get_text("a"), Some("fallback"));
        assert_eq!(
            form.get("blob").and_then(FormValue::filename),
            Some("blob.txt"),
        );
    }

    #[actix_rt::test]
    async fn handler_error_is_returned_as_is() {
        let second_called = Rc::new(Cell::new(false));

        let handler: ComposedHandler<FormValue, AppError> = compose![
            reject("blob"),
            MemoryUploadHandler::new(),
            {
                let second_called = Rc::clone(&second_called);
                handler_fn(move |part: &mut Part| {
                    if part.name() == "blob" {
                        second_called.set(true);
                    }
                    Box::pin(async { Ok::<_, AppError>(Handled::Skip) })
                })
            },
        ];

        let (body, headers) = scenario();
        let res = parse_multipart_form_data(&headers, Some(one_chunk(body)), &handler).await;

        assert_eq!(res, Err(AppError::Rejected("blob".to_owned())));
        assert!(!second_called.get());
    }

    #[actix_rt::test]
    async fn handler_error_stops_reading() {
        let (body, headers) = scenario();
        let chunks = chunked(&body, 16);
        let total = chunks.len();

        let pulled = Rc::new(Cell::new(0));
        let source = {
            let pulled = Rc::clone(&pulled);
            stream::iter(chunks).inspect(move |_| pulled.set(pulled.get() + 1))
        };

        let res = parse_multipart_form_data(&headers, Some(source), &reject("a")).await;

        assert_eq!(res, Err(AppError::Rejected("a".to_owned())));
        assert!(pulled.get() < total, "pulled {} of {} chunks", pulled.get(), total);
    }

    #[actix_rt::test]
    async fn skipped_parts_leave_no_entry() {
        let handler = MemoryUploadHandler::new().filter(|part| part.name() != "blob");
        let form = parse(scenario(), &handler).await.unwrap();

        assert!(!form.has("blob"));
        assert_eq!(form.keys().collect::<Vec<_>>(), ["a", "file"]);
    }

    #[actix_rt::test]
    async fn unread_bytes_are_discarded() {
        let _ = env_logger::try_init();

        let peek = handler_fn(|part: &mut Part| {
            Box::pin(async move {
                let first = part.next().await.transpose()?;
                Ok::<_, MultipartError>(Handled::Value(first.map(|chunk| chunk.len())))
            })
        });
        let ignore = handler_fn(|part: &mut Part| {
            Box::pin(async move { Ok::<_, MultipartError>(Handled::Value(part.name().to_owned())) })
        });

        let (body, headers) = FormBuilder::new()
            .field("a", "x".repeat(100))
            .field("b", "y".repeat(100))
            .build();

        let form = parse_multipart_form_data(
            &headers,
            Some(stream::iter(chunked(&body, 10)).interleave_pending()),
            &peek,
        )
        .await
        .unwrap();
        assert_eq!(form.keys().collect::<Vec<_>>(), ["a", "b"]);
        assert!(form.values().all(|first| first.is_some()));

        let form = parse_multipart_form_data(&headers, Some(one_chunk(body)), &ignore)
            .await
            .unwrap();
        assert_eq!(form.values().collect::<Vec<_>>(), ["a", "b"]);
    }

    #[actix_rt::test]
    async fn split_body_parses_the_same() {
        let (body, headers) = scenario();
        let expected = parse((body.clone(), headers.clone()), &MemoryUploadHandler::new())
            .await
            .unwrap();

        for size in 1..body.len() {
            let form = parse_multipart_form_data::<_, _, _, MultipartError>(
                &headers,
                Some(stream::iter(chunked(&body, size)).interleave_pending()),
                &MemoryUploadHandler::new(),
            )
            .await
            .unwrap();

            assert_eq!(form, expected, "chunk size {size}");
        }
    }

    #[actix_rt::test]
    async fn content_type_errors() {
        let handler = MemoryUploadHandler::new();
        let (body, _) = scenario();

        let res = parse_multipart_form_data::<_, _, _, MultipartError>(
            &HeaderMap::new(),
            Some(one_chunk(body.clone())),
            &handler,
        )
        .await;
        assert_matches!(res, Err(MultipartError::UnsupportedContentType));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/mixed; boundary=abc"),
        );
        let res = parse_multipart_form_data::<_, _, _, MultipartError>(
            &headers,
            Some(one_chunk(body.clone())),
            &handler,
        )
        .await;
        assert_matches!(res, Err(MultipartError::UnsupportedContentType));

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data"),
        );
        let res = parse_multipart_form_data::<_, _, _, MultipartError>(
            &headers,
            Some(one_chunk(body)),
            &handler,
        )
        .await;
        assert_matches!(res, Err(MultipartError::UnsupportedContentType));
    }

    #[actix_rt::test]
    async fn missing_body() {
        let (_, headers) = scenario();

        let res = parse_multipart_form_data::<_, _, _, MultipartError>(
            &headers,
            None::<stream::Empty<Result<Bytes, PayloadError>>>,
            &MemoryUploadHandler::new(),
        )
        .await;
        assert_matches!(res, Err(MultipartError::MissingBody));
    }

    #[actix_rt::test]
    async fn decoder_errors_convert_into_caller_error() {
        let (body, headers) = scenario();
        let truncated = body.slice(..body.len() - 10);

        let res = parse_multipart_form_data(
            &headers,
            Some(one_chunk(truncated)),
            &reject("nothing"),
        )
        .await;

        assert_eq!(
            res,
            Err(AppError::Multipart(MultipartError::UnexpectedEndOfStream.to_string())),
        );
    }

    #[actix_rt::test]
    async fn from_actix_request() {
        let (body, headers) = scenario();

        let mut req = TestRequest::post();
        for (name, value) in headers.iter() {
            req = req.insert_header((name.clone(), value.clone()));
        }
        let (req, mut payload) = req
            .insert_header((header::CONTENT_LENGTH, body.len().to_string()))
            .set_payload(body)
            .to_http_parts();

        let handler = MemoryUploadHandler::new();
        let form = parse_request::<_, _, MultipartError>(&req, &mut payload, &handler)
            .await
            .unwrap();
        assert_eq!(form.get_text("a"), Some("value"));
        assert_eq!(form.len(), 3);

        let content_type = headers.get(header::CONTENT_TYPE).unwrap().clone();

        let (req, mut payload) = TestRequest::post()
            .insert_header((header::CONTENT_TYPE, content_type.clone()))
            .insert_header((header::CONTENT_LENGTH, HeaderValue::from_static("0")))
            .to_http_parts();
        let res = parse_request::<_, FormValue, MultipartError>(
            &req,
            &mut payload,
            &MemoryUploadHandler::new(),
        )
        .await;
        assert_matches!(res, Err(MultipartError::MissingBody));

        let req = TestRequest::post()
            .insert_header((header::CONTENT_TYPE, content_type))
            .to_http_request();
        let res = parse_request::<_, FormValue, MultipartError>(
            &req,
            &mut dev::Payload::None,
            &MemoryUploadHandler::new(),
        )
        .await;
        assert_matches!(res, Err(MultipartError::MissingBody));
    }
}
