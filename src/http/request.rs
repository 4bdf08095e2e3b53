//! Request representation handed to middleware and handlers.
//!
//! # Design Decisions
//! - Fields are private; only `attributes_mut` allows mutation downstream
//! - Path parameters are filled in by the router, never by user code
//! - Query parameters are decoded once at construction

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::http::headers::{self, Headers};
use crate::http::method::{Method, Version};
use crate::net::connection::ConnectionId;

/// Identity of the connection a request arrived on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub addr: Option<SocketAddr>,
    pub connection_id: Option<ConnectionId>,
    pub secure: bool,
}

/// Decoded query string, multi-valued, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(query: &str) -> Self {
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Values bound by `{name}` route segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    values: Vec<(String, String)>,
}

impl PathParams {
    pub(crate) fn push(&mut self, name: &str, value: String) {
        self.values.push((name.to_string(), value));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Typed values computed by middleware for downstream stages.
#[derive(Default)]
pub struct Attributes {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Attributes {
    /// Store a value, returning the previous one of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok().map(|b| *b))
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok().map(|b| *b))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Attributes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attributes").field("len", &self.map.len()).finish()
    }
}

/// A fully framed HTTP request.
#[derive(Debug)]
pub struct Request {
    method: Method,
    target: String,
    path: String,
    query: QueryParams,
    version: Version,
    headers: Headers,
    body: Bytes,
    params: PathParams,
    peer: PeerInfo,
    attributes: Attributes,
}

impl Request {
    /// Build an HTTP/1.1 request for `target` with no headers or body.
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self::from_parts(method, target.into(), Version::Http11, Headers::new(), Bytes::new())
    }

    pub(crate) fn from_parts(
        method: Method,
        target: String,
        version: Version,
        headers: Headers,
        body: Bytes,
    ) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), QueryParams::parse(q)),
            None => (target.clone(), QueryParams::default()),
        };
        Self {
            method,
            target,
            path,
            query,
            version,
            headers,
            body,
            params: PathParams::default(),
            peer: PeerInfo::default(),
            attributes: Attributes::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn set_peer(&mut self, peer: PeerInfo) {
        self.peer = peer;
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Raw request target including any query string.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Target without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    /// Whether the client asked for the connection to persist.
    pub fn keep_alive(&self) -> bool {
        wants_keep_alive(self.version, &self.headers)
    }
}

/// Whether a message with this version and headers lets the connection persist.
pub(crate) fn wants_keep_alive(version: Version, map: &Headers) -> bool {
    if map.has_token(headers::CONNECTION, "close") {
        return false;
    }
    version.keep_alive_by_default() || map.has_token(headers::CONNECTION, "keep-alive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_split_into_path_and_query() {
        let req = Request::new(Method::Get, "/items?limit=10&tag=a&tag=b%20c");
        assert_eq!(req.path(), "/items");
        assert_eq!(req.target(), "/items?limit=10&tag=a&tag=b%20c");
        assert_eq!(req.query().get("limit"), Some("10"));
        let tags: Vec<_> = req.query().get_all("tag").collect();
        assert_eq!(tags, vec!["a", "b c"]);
    }

    #[test]
    fn keep_alive_follows_version_and_connection_header() {
        assert!(Request::new(Method::Get, "/").keep_alive());
        assert!(!Request::new(Method::Get, "/")
            .with_header("Connection", "close")
            .keep_alive());
        assert!(!Request::new(Method::Get, "/")
            .with_version(Version::Http10)
            .keep_alive());
        assert!(Request::new(Method::Get, "/")
            .with_version(Version::Http10)
            .with_header("Connection", "Keep-Alive")
            .keep_alive());
    }

    #[test]
    fn attributes_are_typed() {
        #[derive(Debug, PartialEq)]
        struct User(&'static str);

        let mut req = Request::new(Method::Get, "/");
        assert!(req.attributes_mut().insert(User("ada")).is_none());
        assert_eq!(req.attributes().get::<User>(), Some(&User("ada")));
        assert_eq!(req.attributes_mut().insert(User("bob")), Some(User("ada")));
        assert_eq!(req.attributes_mut().remove::<User>(), Some(User("bob")));
        assert!(req.attributes().is_empty());
    }
}
