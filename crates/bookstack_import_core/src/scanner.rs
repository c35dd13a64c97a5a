/// Locate the span of a balanced `open … close` pair starting at `start`.
///
/// `start` must index a byte equal to `open`. Every further `open` raises the
/// nesting depth and every `close` lowers it; the match is the first `close`
/// that takes the depth below zero, so nested pairs of the same characters are
/// skipped. Returns `(open_index, close_index)`.
pub fn find_balanced(buffer: &[u8], start: usize, open: u8, close: u8) -> Option<(usize, usize)> {
    if buffer.get(start) != Some(&open) {
        return None;
    }

    let mut depth = 0usize;
    for (offset, byte) in buffer[start + 1..].iter().enumerate() {
        if *byte == open {
            depth += 1;
        } else if *byte == close {
            if depth == 0 {
                return Some((start, start + 1 + offset));
            }
            depth -= 1;
        }
    }
    None
}

/// Find the first occurrence of `marker` at or after `start` and return the
/// index of its last byte.
pub fn find_marker(buffer: &[u8], start: usize, marker: &[u8]) -> Option<usize> {
    if marker.is_empty() || start >= buffer.len() {
        return None;
    }
    buffer[start..]
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|offset| start + offset + marker.len() - 1)
}
