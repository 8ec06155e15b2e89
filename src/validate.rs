//! Syntactic validators for protocol identifiers.
//!
//! These implement the RFC 1459 "letter + special" character classes.
//! They are syntax checks only; collision policy is the caller's problem.

/// Characters allowed to open a nick besides ASCII letters.
const NICK_SPECIALS: &[char] = &['_', '\\', '^', '|', '[', ']', '{', '}', '`'];

fn is_nick_start(c: char) -> bool {
    c.is_ascii_alphabetic() || NICK_SPECIALS.contains(&c)
}

fn is_nick_char(c: char) -> bool {
    is_nick_start(c) || c.is_ascii_digit() || c == '-'
}

/// Check whether `s` is a valid nickname.
///
/// `nicklen` caps the length when given (the peer advertises it during
/// capability negotiation).
///
/// # Examples
///
/// ```
/// use slink_proto::validate::is_nick;
///
/// assert!(is_nick("aBcdefgh", Some(30)));
/// assert!(!is_nick("abcdefgh", Some(3)));
/// assert!(!is_nick("9PYAAAAAB", None)); // leading digit
/// assert!(is_nick("_9PYAAAAAB\\", None));
/// ```
pub fn is_nick(s: &str, nicklen: Option<usize>) -> bool {
    if s.is_empty() {
        return false;
    }
    if let Some(max) = nicklen {
        if s.chars().count() > max {
            return false;
        }
    }
    let mut chars = s.chars();
    chars.next().map(is_nick_start).unwrap_or(false) && chars.all(is_nick_char)
}

/// Check whether `s` names a channel: non-empty and starts with `#`.
pub fn is_channel(s: &str) -> bool {
    s.starts_with('#')
}

/// Check whether `s` is a plausible server name: dotted, no whitespace,
/// and not starting with a dot.
pub fn is_server_name(s: &str) -> bool {
    !s.is_empty()
        && s.contains('.')
        && !s.starts_with('.')
        && !s.contains(char::is_whitespace)
}
