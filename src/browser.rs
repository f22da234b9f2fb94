//! Opening the served page in the user's browser.

/// Open `url` with the platform's default handler.
///
/// Failure is only reported; the server keeps running either way.
pub fn open(url: &str) {
    match open::that_detached(url) {
        Ok(()) => tracing::debug!(url, "opened browser"),
        Err(err) => tracing::warn!(
            error = %err,
            "Could not open browser automatically. Please visit: {url}"
        ),
    }
}
