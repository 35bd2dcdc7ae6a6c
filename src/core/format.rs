//! Chat Formatting
//!
//! Game chat carries inline formatting codes: a section sign (`§`) followed
//! by a colour or style selector. The community service has no use for them,
//! so relayed messages are stripped before they leave the server.

/// Prefix character for formatting codes.
pub const FORMAT_PREFIX: char = '§';

/// Whether `c` is a valid selector after [`FORMAT_PREFIX`].
///
/// Colours `0-9a-f`, styles `k-o`, reset `r`, and hex-colour marker `x`,
/// case-insensitive.
pub fn is_format_selector(c: char) -> bool {
    matches!(c.to_ascii_lowercase(), '0'..='9' | 'a'..='f' | 'k'..='o' | 'r' | 'x')
}

/// Remove every formatting code from `message`.
///
/// A prefix not followed by a valid selector is kept as-is.
///
/// ```
/// use linker_bridge::core::format::strip_formatting;
///
/// assert_eq!(strip_formatting("§aHello §lworld§r!"), "Hello world!");
/// ```
pub fn strip_formatting(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        if c == FORMAT_PREFIX {
            if let Some(&next) = chars.peek() {
                if is_format_selector(next) {
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }

    out
}
