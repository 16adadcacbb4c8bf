//! Request identity
//!
//! Entries are keyed by method and URL (fragment stripped). Headers named in
//! the stored response's `Vary` refine the match at lookup time.

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::http::{Request, Response};

/// Primary cache key for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    pub fn from_request(request: &Request) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method.clone(),
            url: url.to_string(),
        }
    }

    /// Filename-safe digest of this key
    pub fn to_filename(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Request header values captured for each name in the response's `Vary`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaryValues(Vec<(String, Option<String>)>);

impl VaryValues {
    pub fn capture(request: &Request, response: &Response) -> Self {
        Self(
            response
                .vary()
                .into_iter()
                .map(|name| {
                    let value = request.headers.get(&name).map(str::to_string);
                    (name, value)
                })
                .collect(),
        )
    }

    /// Whether `request` carries the same values for every varied header
    pub fn matches(&self, request: &Request) -> bool {
        self.0
            .iter()
            .all(|(name, value)| request.headers.get(name) == value.as_deref())
    }
}
