use protocol::STRING_LENGTH;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Checks a login name: 3 to 16 characters of letters, digits or underscore.
pub fn is_valid_name(name: &str) -> bool {
    (3..=16).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Prefix of a colour code in chat text.
pub const COLOR_ESCAPE: u8 = b'&';

/// Checks a chat line: printable ASCII only, and every colour escape must be
/// followed by a hex digit.
pub fn is_valid_chat(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().all(|(i, &b)| {
        (0x20..=0x7E).contains(&b)
            && (b != COLOR_ESCAPE || bytes.get(i + 1).is_some_and(u8::is_ascii_hexdigit))
    })
}

/// Generates the random per-boot salt used for name verification.
pub fn generate_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

/// Splits a message into lines that fit a single string field.
///
/// Breaks at the last space when possible, otherwise mid-word.
pub fn wrap_message(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut rest = text.trim_end();

    while rest.len() > STRING_LENGTH {
        let window = &rest[..STRING_LENGTH];
        let split = match window.rfind(' ') {
            Some(i) if i > 0 => i,
            _ => STRING_LENGTH,
        };
        lines.push(rest[..split].to_string());
        rest = rest[split..].trim_start();
    }

    if !rest.is_empty() || lines.is_empty() {
        lines.push(rest.to_string());
    }
    lines
}
