//! Inbound text normalisation.
//!
//! Chat clients often send multi-line input.  Before a text frame reaches the
//! observer every line break becomes a space and surrounding whitespace is
//! trimmed, so one frame is always one line of output.

/// Returns `text` with `\r\n`, `\n` and `\r` replaced by spaces, trimmed.
///
/// # Examples
///
/// ```rust
/// use fanout_gateway::domain::message::normalize;
///
/// assert_eq!(normalize("  hello\nworld \n"), "hello world");
/// ```
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
        .trim()
        .to_string()
}
