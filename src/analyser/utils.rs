//! Helpers shared by fingerprinting and record rendering.
use md5::{Digest, Md5};
use std::fmt::Write;

/// MD5 hash, rendered as lowercase hex, used as the KEXINIT fingerprint.
pub fn get_md5_hash(string_in: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(string_in.as_bytes());
    let result = hasher.finalize();

    hex::encode(result)
}

/// Decodes a banner segment and drops any trailing CR/LF characters.
pub fn banner_text(banner: &[u8]) -> String {
    String::from_utf8_lossy(banner)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Renders text as a quoted string literal.
///
/// Single quotes are used unless the text contains a single quote and no double quote.
/// Backslashes, the chosen quote and control characters are escaped, so the banner stays on
/// one output line.
pub fn quote_literal(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') { '"' } else { '\'' };

    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if !is_printable(c) => {
                let code = c as u32;
                let _ = if code <= 0xff {
                    write!(out, "\\x{:02x}", code)
                } else if code <= 0xffff {
                    write!(out, "\\u{:04x}", code)
                } else {
                    write!(out, "\\U{:08x}", code)
                };
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Whether `c` can be shown as-is. Control, format, separator (other than ASCII space),
/// private-use and noncharacter code points are not.
fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    if c.is_control() || c.is_whitespace() {
        return false;
    }
    !matches!(c as u32,
        0x00AD
        | 0x0600..=0x0605
        | 0x061C
        | 0x06DD
        | 0x070F
        | 0x0890..=0x0891
        | 0x08E2
        | 0x180E
        | 0x200B..=0x200F
        | 0x202A..=0x202E
        | 0x2060..=0x2064
        | 0x2066..=0x206F
        | 0xE000..=0xF8FF
        | 0xFDD0..=0xFDEF
        | 0xFEFF
        | 0xFFF9..=0xFFFB
        | 0xFFFE..=0xFFFF
        | 0x110BD
        | 0x110CD
        | 0x13430..=0x1343F
        | 0x1BCA0..=0x1BCA3
        | 0x1D173..=0x1D17A
        | 0xE0001
        | 0xE0020..=0xE007F
        | 0xF0000..=0x10FFFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_hash() {
        assert_eq!(get_md5_hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(get_md5_hash("abc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_banner_text_strips_line_ending() {
        assert_eq!(banner_text(b"SSH-2.0-OpenSSH_9.6\r\n"), "SSH-2.0-OpenSSH_9.6");
        assert_eq!(banner_text(b"SSH-2.0-Test\n\r\n"), "SSH-2.0-Test");
        assert_eq!(banner_text(b"SSH-2.0-Test \r\n"), "SSH-2.0-Test ");
        assert_eq!(banner_text(b"\r\n"), "");
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("SSH-2.0-Test"), "'SSH-2.0-Test'");
        assert_eq!(quote_literal(""), "''");
        assert_eq!(quote_literal("it's"), "\"it's\"");
        assert_eq!(quote_literal("'\""), "'\\'\"'");
        assert_eq!(quote_literal("a\\b"), "'a\\\\b'");
        assert_eq!(quote_literal("x\r\ny\0"), "'x\\r\\ny\\x00'");
    }

    #[test]
    fn test_quote_literal_escapes_invisible_characters() {
        assert_eq!(quote_literal("SSH-2.0-a\u{a0}b"), "'SSH-2.0-a\\xa0b'");
        assert_eq!(quote_literal("a\u{200b}b\u{feff}"), "'a\\u200bb\\ufeff'");
        assert_eq!(quote_literal("\u{3000}\u{2028}"), "'\\u3000\\u2028'");
        assert_eq!(quote_literal("\u{e0041}"), "'\\U000e0041'");
        assert_eq!(quote_literal("caf\u{e9} \u{fffd} \u{4e2d}"), "'caf\u{e9} \u{fffd} \u{4e2d}'");
    }
}
