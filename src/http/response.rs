//! Response model
//!
//! Bodies are held as `Bytes`, so duplicating a response for the cache and
//! the caller shares one buffer instead of re-reading a stream.

use bytes::Bytes;

use super::request::Headers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
    pub body: Bytes,
    /// Final URL after redirects, when known
    pub url: Option<String>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: String::new(),
            headers: Headers::new(),
            body: body.into(),
            url: None,
        }
    }

    #[cfg(test)]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// 2xx status
    pub fn ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    pub fn is_partial(&self) -> bool {
        self.status == 206
    }

    /// Lower-cased header names listed in `Vary`
    pub fn vary(&self) -> Vec<String> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("vary"))
            .flat_map(|(_, v)| v.split(','))
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_range() {
        assert!(Response::new(200, "x").ok());
        assert!(Response::new(204, "").ok());
        assert!(!Response::new(304, "").ok());
        assert!(!Response::new(404, "").ok());
    }

    #[test]
    fn test_vary_parsing() {
        let resp = Response::new(200, "x").with_header("Vary", "Accept, Accept-Encoding");
        assert_eq!(resp.vary(), vec!["accept", "accept-encoding"]);
        assert!(Response::new(200, "x").vary().is_empty());
    }

    #[test]
    fn test_clone_shares_body() {
        let resp = Response::new(200, Bytes::from_static(b"hello"));
        let copy = resp.clone();
        assert_eq!(copy.body, resp.body);
        assert_eq!(copy.body.as_ptr(), resp.body.as_ptr());
    }
}
