/// Characters of a string that take part in its sortable encoding.
///
/// Longer strings are truncated: two values that share their first 100
/// (lower-cased) characters encode identically and are not ordered against
/// each other. This keeps key segments bounded in size.
pub const MAX_STRING_CHARS: usize = 100;

/// Encode a string for use as a sortable key segment.
///
/// The value is lower-cased (so ordering is case-insensitive) and truncated
/// to [`MAX_STRING_CHARS`] characters. Then `\` becomes `\\`, `#` becomes
/// `\#` and NUL becomes `\0`, so the result never contains an unescaped field
/// separator and never begins with the null sentinel.
pub fn encode_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars().flat_map(char::to_lowercase).take(MAX_STRING_CHARS) {
        match c {
            '\\' => out.push_str("\\\\"),
            '#' => out.push_str("\\#"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out
}
