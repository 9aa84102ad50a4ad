//! Jamf Pro API client plumbing
//!
//! The module is organized into specialized components:
//! - `config`: HTTP client configuration and building
//! - `transport`: the `Transport` seam and its reqwest implementation
//! - `token`: bearer token lifecycle with single-flight refresh

use url::Url;

pub mod config;
pub mod token;
pub mod transport;

pub use config::ClientConfig;
pub use token::{AccessToken, TokenConfig, TokenManager};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, RequestBody, ReqwestTransport, Transport};

/// Join an API path onto the server base URL, keeping any base path prefix
///
/// `Url::join` would drop a context path such as `/jamf`, so the path is
/// appended textually.
pub fn endpoint_url(base: &Url, path: &str) -> Result<Url, url::ParseError> {
    let base = base.as_str().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Url::parse(&format!("{}/{}", base, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_keeps_context_path() {
        let base = Url::parse("https://jamf.example.com:8443/jamf").unwrap();
        let url = endpoint_url(&base, "/api/oauth/token").unwrap();
        assert_eq!(url.as_str(), "https://jamf.example.com:8443/jamf/api/oauth/token");

        let base = Url::parse("https://jamf.example.com/").unwrap();
        let url = endpoint_url(&base, "api/v2/mobile-devices").unwrap();
        assert_eq!(url.as_str(), "https://jamf.example.com/api/v2/mobile-devices");
    }
}
