//! Identifier sanitizing

/// Joins safe names inside file names, never produced by [`safe_name`]
pub const NAME_SEPARATOR: char = '@';

/// File name made of a fixed base and safe names
pub fn joined_name(base: &str, parts: &[&str]) -> String {
    let mut name = base.to_string();
    for part in parts {
        name.push(NAME_SEPARATOR);
        name.push_str(part);
    }
    name
}

/// Turn an arbitrary name into something usable as a file name
///
/// Runs of characters other than ASCII letters, digits, `_`, `.` and `-`
/// become a single dash; leading and trailing dashes are dropped.
pub fn safe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }

    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "default".to_string()
    } else {
        trimmed.to_string()
    }
}
