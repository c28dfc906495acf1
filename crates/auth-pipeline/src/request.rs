//! Request descriptors
//!
//! A descriptor is everything needed to send (and later resend) a request:
//! method, path relative to the pipeline's base URL, headers, body, and the
//! retry mark. Bodies are `Bytes` so replays clone cheaply.

use bytes::Bytes;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};

/// An outgoing request as the pipeline sees it.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: Uuid,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Bytes>,
    retried: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Serialize `value` as the JSON body and set `Content-Type`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("serializing JSON body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(bytes));
        Ok(self)
    }

    /// Correlation id used in log spans.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path as given, including any query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path without the query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Whether this request has already been replayed after a refresh.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// Mark the request as replayed. There is no way to unset the mark.
    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    /// Replace the Authorization header with `Bearer <token>`.
    ///
    /// Returns false (leaving no Authorization header) when the token is not a
    /// valid header value. The header is flagged sensitive so it never shows
    /// up in `Debug` output.
    pub(crate) fn set_bearer(&mut self, token: &str) -> bool {
        self.headers.remove(AUTHORIZATION);
        match HeaderValue::from_str(&format!("Bearer {token}")) {
            Ok(mut value) => {
                value.set_sensitive(true);
                self.headers.insert(AUTHORIZATION, value);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_strips_query() {
        let req = RequestDescriptor::get("/events?project_id=7&limit=20");
        assert_eq!(req.route(), "/events");
        assert_eq!(req.path(), "/events?project_id=7&limit=20");
    }

    #[test]
    fn json_sets_body_and_content_type() {
        let req = RequestDescriptor::post("/projects")
            .json(&serde_json::json!({"name": "billing"}))
            .unwrap();
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            req.body_bytes().unwrap().as_ref(),
            br#"{"name":"billing"}"#
        );
    }

    #[test]
    fn bearer_replaces_existing_authorization() {
        let mut req = RequestDescriptor::get("/me")
            .header(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(req.set_bearer("T2"));
        assert_eq!(req.bearer(), Some("T2"));
        assert_eq!(req.headers().get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn invalid_token_leaves_no_authorization() {
        let mut req = RequestDescriptor::get("/me");
        assert!(req.set_bearer("T1"));
        assert!(!req.set_bearer("bad\ntoken"));
        assert!(req.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn debug_hides_bearer_token() {
        let mut req = RequestDescriptor::get("/me");
        req.set_bearer("super-secret-token");
        let debug = format!("{req:?}");
        assert!(!debug.contains("super-secret-token"), "got: {debug}");
    }

    #[test]
    fn retry_mark_starts_clear_and_sticks() {
        let mut req = RequestDescriptor::get("/rules");
        assert!(!req.is_retried());
        req.mark_retried();
        let replay = req.clone();
        assert!(replay.is_retried());
        assert_eq!(replay.id(), req.id());
    }
}
