//! 8.3 short-name handling: building the 11-byte padded form from a
//! path component and formatting it back for display.

use heapless::String;

/// Characters never allowed in an 8.3 name.
const ILLEGAL_SHORT_CHARS: &[u8] = b"|<>^+=?/[];,*\"\\";

/// Build the 11-byte space-padded 8.3 name from the next component of
/// `path`, returning the name and the remainder after the component
/// (with the separator still attached, if any). Returns `None` for an
/// invalid name.
///
/// `.` and `..` are accepted verbatim so the reserved directory
/// entries can be resolved by the normal lookup path.
pub(crate) fn make_short_name(path: &str) -> Option<([u8; 11], &str)> {
    let bytes = path.as_bytes();
    let end = bytes
        .iter()
        .position(|&b| b == b'/')
        .unwrap_or(bytes.len());
    let (component, rest) = (&bytes[..end], &path[end..]);

    if component == b"." || component == b".." {
        let mut name = [b' '; 11];
        name[0] = b'.';
        if component.len() == 2 {
            name[1] = b'.';
        }
        return Some((name, rest));
    }

    let mut name = [b' '; 11];
    let mut i = 0usize;
    let mut limit = 7usize; // max index before the dot
    for &c in component {
        if c == b'.' {
            if limit == 10 {
                // only one dot allowed
                return None;
            }
            limit = 10;
            i = 8;
            continue;
        }
        if i > limit || !(0x21..=0x7E).contains(&c) || ILLEGAL_SHORT_CHARS.contains(&c) {
            return None;
        }
        name[i] = c.to_ascii_uppercase();
        i += 1;
    }
    // must have a file name; the extension is optional
    if name[0] == b' ' {
        return None;
    }
    Some((name, rest))
}

/// Strip leading `/` separators.
pub(crate) fn trim_separators(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Format a padded 11-byte name as `NAME.EXT`.
pub fn format_short_name(raw: &[u8; 11]) -> String<12> {
    let mut out = String::new();
    for &b in &raw[0..8] {
        if b == b' ' {
            break;
        }
        let _ = out.push(b as char);
    }
    if raw[8..11].iter().any(|&b| b != b' ') {
        let _ = out.push('.');
        for &b in &raw[8..11] {
            if b == b' ' {
                break;
            }
            let _ = out.push(b as char);
        }
    }
    out
}
