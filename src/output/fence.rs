//! Backtick fences for embedding arbitrary text in markdown.

use std::sync::LazyLock;

use regex::Regex;

static FENCE_OPEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<fence>`{3,})[ \t]*(?P<info>[A-Za-z0-9_-]+)(?:[ \t]+.*)?$")
        .expect("fence open regex should compile")
});

/// Length of the longest run of backticks in `text`.
pub fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for ch in text.chars() {
        if ch == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// A fence that cannot be closed by anything inside `text`.
pub fn choose_fence(text: &str) -> String {
    "`".repeat((longest_backtick_run(text) + 1).max(3))
}

/// Recognize an opening fence with an info string; returns `(fence, info)`.
pub fn parse_fence_open(line: &str) -> Option<(String, String)> {
    let caps = FENCE_OPEN.captures(line.trim())?;
    Some((caps["fence"].to_string(), caps["info"].to_string()))
}

pub fn is_fence_close(line: &str, fence: &str) -> bool {
    line.trim() == fence
}

/// Render a fenced block. A final newline is added when `body` lacks one.
pub fn fenced_block(info: &str, body: &str) -> String {
    let fence = choose_fence(body);
    let mut out = String::with_capacity(body.len() + 2 * fence.len() + info.len() + 4);
    out.push_str(&fence);
    out.push_str(info);
    out.push('\n');
    out.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&fence);
    out.push('\n');
    out
}
