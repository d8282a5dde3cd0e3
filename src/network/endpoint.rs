use serde::{Deserialize, Serialize};
use url::Url;

use crate::Result;

pub const DEFAULT_API_URL: &str = "https://api.statsig.com";

/// Statsig API endpoints the client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Initialize,
    Rgstr,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Initialize => "/v1/initialize",
            Endpoint::Rgstr => "/v1/rgstr",
        }
    }

    /// Prefix of this endpoint's entries in fallback DNS TXT records.
    pub(crate) fn dns_key(&self) -> char {
        match self {
            Endpoint::Initialize => 'i',
            Endpoint::Rgstr => 'e',
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Initialize => "initialize",
            Endpoint::Rgstr => "rgstr",
        }
    }

    /// Full URL of the endpoint under `api_url`, e.g. `https://api.statsig.com/v1/initialize`.
    pub fn url(&self, api_url: &str) -> Result<Url> {
        let base = api_url.trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{}", self.path()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls() {
        assert_eq!(
            Endpoint::Initialize.url(DEFAULT_API_URL).unwrap().as_str(),
            "https://api.statsig.com/v1/initialize"
        );
        assert_eq!(
            Endpoint::Rgstr.url("http://localhost:1234/").unwrap().as_str(),
            "http://localhost:1234/v1/rgstr"
        );
        assert!(Endpoint::Rgstr.url("not a url").is_err());
    }
}
