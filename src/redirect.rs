//! HTTP redirect method normalization.
//!
//! The transport layer sitting next to this dispatcher follows redirects
//! itself; this is the one pure rule shared with it. Browsers rewrite the
//! request method on certain status codes, and cookie round-trips depend on
//! replaying redirects the same way.

/// Method to use when following a redirect with `status`.
///
/// 301/302 downgrade POST to GET (historic browser behavior); 303 forces
/// GET for everything except HEAD; 307/308 never rewrite the method.
pub fn redirect_method(method: &str, status: u16) -> String {
    match status {
        303 if method != "HEAD" => "GET".to_string(),
        301 | 302 if method == "POST" => "GET".to_string(),
        _ => method.to_string(),
    }
}
