//! Response capture for after-settlement.
//!
//! The handler's response is buffered into a [`ResponseCapture`] instead of
//! going straight back to the client. Once settlement succeeds the capture
//! is flushed into the [`OutgoingResponse`]; if it fails the capture is
//! discarded and nothing the handler produced leaves the process.
//!
//! Response extensions are not buffered.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum_core::body::Body;
use axum_core::response::Response;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::BodyExt;
use s402::error::BoxError;

/// The writer capabilities shared by the buffer and the real response.
pub trait ResponseWriter: Send + Sync {
    /// Fixes the status. Only the first call has an effect.
    fn set_status(&self, status: StatusCode);

    /// Sets a header, replacing existing values.
    fn insert_header(&self, name: HeaderName, value: HeaderValue);

    /// Adds a header value, keeping existing ones.
    fn append_header(&self, name: HeaderName, value: HeaderValue);

    /// Appends body bytes. Fixes the status to 200 if none was set.
    fn write(&self, chunk: &[u8]);
}

#[derive(Debug, Default)]
struct Buffered {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl Buffered {
    fn set_status(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write(&mut self, chunk: &[u8]) {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(chunk);
    }

    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body.freeze()));
        *response.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = self.headers;
        response
    }
}

#[derive(Debug, Clone, Default)]
struct Shared(Arc<Mutex<Buffered>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Buffered> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take(&self) -> Buffered {
        std::mem::take(&mut *self.lock())
    }
}

/// In-memory response buffer. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct ResponseCapture {
    shared: Shared,
}

impl ResponseCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains a handler response into the capture.
    ///
    /// Multi-valued headers such as `set-cookie` are kept.
    ///
    /// # Errors
    ///
    /// Returns the body error if the handler's body stream fails.
    pub async fn record(&self, response: Response) -> Result<(), BoxError> {
        let (parts, body) = response.into_parts();
        self.set_status(parts.status);
        {
            let mut buffered = self.shared.lock();
            for (name, value) in &parts.headers {
                buffered.headers.append(name, value.clone());
            }
        }
        let bytes = body.collect().await.map_err(BoxError::from)?.to_bytes();
        self.write(&bytes);
        Ok(())
    }

    /// Returns the fixed status, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.shared.lock().status
    }

    /// Returns a copy of the buffered body.
    #[must_use]
    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.shared.lock().body)
    }

    /// Transmits status, headers and body to `writer`, leaving the capture empty.
    pub fn flush(&self, writer: &dyn ResponseWriter) {
        let buffered = self.shared.take();
        writer.set_status(buffered.status.unwrap_or(StatusCode::OK));
        // Continuation entries of a multi-valued header come with a `None` name.
        let mut current: Option<HeaderName> = None;
        for (name, value) in buffered.headers {
            if let Some(name) = name {
                writer.insert_header(name.clone(), value);
                current = Some(name);
            } else if let Some(name) = &current {
                writer.append_header(name.clone(), value);
            }
        }
        writer.write(&buffered.body);
    }

    /// Drops everything buffered. Nothing is ever sent.
    pub fn discard(self) {
        drop(self.shared.take());
    }
}

impl ResponseWriter for ResponseCapture {
    fn set_status(&self, status: StatusCode) {
        self.shared.lock().set_status(status);
    }

    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.shared.lock().headers.insert(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.shared.lock().headers.append(name, value);
    }

    fn write(&self, chunk: &[u8]) {
        self.shared.lock().write(chunk);
    }
}

/// The response that is returned to the transport.
#[derive(Debug, Default)]
pub struct OutgoingResponse {
    shared: Shared,
}

impl OutgoingResponse {
    /// Creates an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finishes the response.
    #[must_use]
    pub fn into_response(self) -> Response {
        self.shared.take().into_response()
    }
}

impl ResponseWriter for OutgoingResponse {
    fn set_status(&self, status: StatusCode) {
        self.shared.lock().set_status(status);
    }

    fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.shared.lock().headers.insert(name, value);
    }

    fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.shared.lock().headers.append(name, value);
    }

    fn write(&self, chunk: &[u8]) {
        self.shared.lock().write(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header;

    #[test]
    fn first_status_wins() {
        let capture = ResponseCapture::new();
        capture.set_status(StatusCode::CREATED);
        capture.set_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(capture.status(), Some(StatusCode::CREATED));
    }

    #[test]
    fn write_defaults_to_ok() {
        let capture = ResponseCapture::new();
        capture.write(b"hello");
        capture.set_status(StatusCode::NOT_FOUND);
        assert_eq!(capture.status(), Some(StatusCode::OK));
        assert_eq!(capture.body().as_ref(), b"hello");
    }

    #[tokio::test]
    async fn flush_transmits_recorded_response() {
        let capture = ResponseCapture::new();
        let response = http::Response::builder()
            .status(StatusCode::CREATED)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::SET_COOKIE, "a=1")
            .header(header::SET_COOKIE, "b=2")
            .body(Body::from(r#"{"orderId":"X"}"#))
            .unwrap();
        capture.record(response).await.unwrap();

        let outgoing = OutgoingResponse::new();
        capture.flush(&outgoing);
        let response = outgoing.into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers().get_all(header::SET_COOKIE).iter().count(), 2);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), br#"{"orderId":"X"}"#);
    }

    #[test]
    fn discard_drops_everything() {
        let capture = ResponseCapture::new();
        let observer = capture.clone();
        capture.set_status(StatusCode::OK);
        capture.insert_header(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        capture.write(b"secret");
        capture.discard();

        assert_eq!(observer.status(), None);
        assert!(observer.body().is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_bytes() {
        let capture = ResponseCapture::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let capture = capture.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        capture.write(b"x");
                    }
                });
            }
        });
        assert_eq!(capture.body().len(), 800);
    }
}
