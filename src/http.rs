//! HTTP fetching for pre-signed chunk URLs.

use crate::{Error, Result};
use std::io::Read;

/// Fetches the body behind a URL via HTTP GET.
///
/// Used by `download_http` to retrieve chunks from pre-signed URLs
/// without any bucket credentials. Any non-2xx response fails.
pub trait HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// [`HttpFetcher`] backed by a blocking `ureq` agent.
pub struct UreqFetcher {
    agent: ureq::Agent,
}

impl UreqFetcher {
    pub fn new() -> Self {
        UreqFetcher {
            agent: ureq::agent(),
        }
    }
}

impl Default for UreqFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher for UreqFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.agent.get(url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => Error::Http {
                url: url.to_string(),
                reason: format!("status {}", code),
            },
            other => Error::Http {
                url: url.to_string(),
                reason: other.to_string(),
            },
        })?;
        let mut body = Vec::new();
        response.into_reader().read_to_end(&mut body)?;
        Ok(body)
    }
}
