//! Log output limits
//!
//! Argument lists of queued calls (every DNS server or search domain of a
//! link) can grow large; debug lines carry a bounded prefix only.

/// Maximum number of characters of an argument rendering kept in a log line.
const ARGS_LOG_LIMIT: usize = 200;

/// Shorten `s` to at most [`ARGS_LOG_LIMIT`] characters, noting the full size.
pub fn truncate_for_log(s: &str) -> String {
    match s.char_indices().nth(ARGS_LOG_LIMIT) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}... [{} of {} bytes]", &s[..cut], cut, s.len()),
    }
}
