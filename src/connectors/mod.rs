//! Built-in vendor connectors.

pub mod github;
pub mod okta;

/// Strips trailing slashes so paths can be appended with `/`.
pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
