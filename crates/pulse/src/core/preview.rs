//! Display-only truncation for condensed feed renderings

use std::borrow::Cow;

pub const ELLIPSIS: &str = "...";

/// Truncate `body` to `max_chars` characters, appending `...` when cut.
pub fn preview(body: &str, max_chars: usize) -> Cow<'_, str> {
    match body.char_indices().nth(max_chars) {
        Some((cut, _)) => Cow::Owned(format!("{}{}", &body[..cut], ELLIPSIS)),
        None => Cow::Borrowed(body),
    }
}
