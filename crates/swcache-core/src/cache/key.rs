use crate::models::Request;

/// Normalized cache key for a request.
///
/// Same-origin requests are keyed by path alone, so `/?lang=ko` and `/`
/// share an entry. Cross-origin requests keep their origin in front of the
/// path so they can never collide with a site path.
pub fn cache_key(request: &Request) -> String {
    if request.is_same_origin() {
        request.path().to_string()
    } else {
        format!(
            "{}{}",
            request.url().origin().ascii_serialization(),
            request.path()
        )
    }
}
