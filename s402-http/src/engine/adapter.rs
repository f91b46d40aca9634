use bytes::Bytes;
use http::request::Parts;
use http::{Method, header};

use super::HttpAdapter;
use crate::scope::RequestScope;

/// [`HttpAdapter`] over split request parts and the captured body.
#[derive(Debug, Clone, Copy)]
pub struct PartsAdapter<'a> {
    parts: &'a Parts,
    body: &'a Bytes,
    scope: &'a RequestScope,
}

impl<'a> PartsAdapter<'a> {
    /// Creates an adapter borrowing the request pieces.
    #[must_use]
    pub const fn new(parts: &'a Parts, body: &'a Bytes, scope: &'a RequestScope) -> Self {
        Self { parts, body, scope }
    }
}

impl HttpAdapter for PartsAdapter<'_> {
    fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name)?.to_str().ok()
    }

    fn method(&self) -> &Method {
        &self.parts.method
    }

    fn path(&self) -> &str {
        self.parts.uri.path()
    }

    fn url(&self) -> String {
        let uri = &self.parts.uri;
        if uri.scheme().is_some() {
            return uri.to_string();
        }
        let host = self
            .header(header::HOST.as_str())
            .unwrap_or("localhost");
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("http://{host}{path_and_query}")
    }

    fn body(&self) -> &Bytes {
        self.body
    }

    fn scope(&self) -> &RequestScope {
        self.scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(uri: &str, host: Option<&str>) -> Parts {
        let mut builder = http::Request::builder().method(Method::POST).uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn url_uses_host_header() {
        let parts = parts("/checkout?cart=1", Some("shop.example"));
        let body = Bytes::from_static(b"{}");
        let scope = RequestScope::new();
        let adapter = PartsAdapter::new(&parts, &body, &scope);

        assert_eq!(adapter.url(), "http://shop.example/checkout?cart=1");
        assert_eq!(adapter.path(), "/checkout");
        assert_eq!(adapter.accept_header(), "");
        assert_eq!(adapter.body().as_ref(), b"{}");
    }

    #[test]
    fn absolute_uri_is_kept() {
        let parts = parts("https://api.example/data", None);
        let body = Bytes::new();
        let scope = RequestScope::new();
        assert_eq!(
            PartsAdapter::new(&parts, &body, &scope).url(),
            "https://api.example/data"
        );
    }
}
