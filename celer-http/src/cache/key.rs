//! Cache-key canonicalization.

use faststr::FastStr;
use http::Method;

/// Canonical cache key of a request: `METHOD || "/" || absolute-url`.
///
/// The URL must be fully qualified (scheme, authority, path and query);
/// two requests map to the same entry exactly when method and URL match.
/// The key stays un-hashed — the single digest step happens at the
/// file-path boundary when a body file name is derived from it.
pub fn cache_key(method: &Method, url: &str) -> FastStr {
    FastStr::new(format!("{}/{url}", method.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_the_method_slash_url_concatenation() {
        let key = cache_key(&Method::GET, "http://localhost:9000/test1?a=10");
        assert_eq!(key, "GET/http://localhost:9000/test1?a=10");
        assert_eq!(key, cache_key(&Method::GET, "http://localhost:9000/test1?a=10"));
    }

    #[test]
    fn method_and_url_both_discriminate() {
        let url = "http://localhost:9000/test1?a=10";
        assert_ne!(cache_key(&Method::GET, url), cache_key(&Method::POST, url));
        assert_ne!(
            cache_key(&Method::GET, url),
            cache_key(&Method::GET, "http://localhost:9000/test1?a=11")
        );
    }
}
