// Tailgate - core/text.rs
//
// Byte-to-line conversion shared by the local and remote tail paths:
// splitting raw chunks into complete lines, decoding them with the source's
// declared encoding, and stripping ANSI colour sequences.
//
// Lines are split on b'\n' *before* decoding so a multi-byte character can
// never straddle a split point. This holds for every ASCII-compatible
// encoding (UTF-8, GBK, Shift_JIS, Latin-1...). UTF-16 files are not
// appended line-by-line in practice and are decoded lossily.

use encoding_rs::Encoding;
use regex::Regex;
use std::borrow::Cow;
use std::sync::OnceLock;

use crate::util::constants::DEBUG_MAX_LINE_PREVIEW;

fn ansi_pattern() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    // Full CSI sequences, plus bare SGR remnants whose ESC byte was lost.
    ANSI.get_or_init(|| {
        Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]|\[[0-9;]+m").expect("ANSI pattern is valid")
    })
}

/// Remove ANSI escape sequences from `text`.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ansi_pattern().replace_all(text, "")
}

/// Resolve an encoding label, returning `None` for labels `encoding_rs`
/// does not recognise.
pub fn lookup_encoding(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}

/// Decode one line of raw bytes. Unknown labels fall back to lossy UTF-8.
pub fn decode(bytes: &[u8], encoding: &str) -> String {
    match lookup_encoding(encoding) {
        Some(enc) if enc != encoding_rs::UTF_8 => {
            let (text, _, _) = enc.decode(bytes);
            text.into_owned()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Turn one raw line (without its terminator) into the text that is emitted,
/// or `None` if nothing visible remains.
pub fn clean_line(raw: &[u8], encoding: &str) -> Option<String> {
    let decoded = decode(raw, encoding);
    let stripped = strip_ansi(decoded.trim_end_matches(['\r', '\n']));
    if stripped.trim().is_empty() {
        None
    } else {
        Some(stripped.into_owned())
    }
}

/// Append `chunk` to `partial`, then drain every complete line.
///
/// Bytes after the final newline stay in `partial` for the next call. Returns
/// the cleaned, non-empty lines in file order.
pub fn drain_complete_lines(partial: &mut Vec<u8>, chunk: &[u8], encoding: &str) -> Vec<String> {
    partial.extend_from_slice(chunk);
    let Some(last_nl) = partial.iter().rposition(|&b| b == b'\n') else {
        return Vec::new();
    };

    let rest = partial.split_off(last_nl + 1);
    let complete = std::mem::replace(partial, rest);
    complete
        .split(|&b| b == b'\n')
        .filter_map(|line| clean_line(line, encoding))
        .collect()
}

/// Drop the first (possibly partial) line of a trailing window that does not
/// begin at offset 0 of the file. A window with no newline at all is one
/// partial line and is dropped entirely.
pub fn skip_partial_first_line(window: &[u8]) -> &[u8] {
    match window.iter().position(|&b| b == b'\n') {
        Some(pos) => &window[pos + 1..],
        None => &[],
    }
}

/// Shorten a line for debug logging.
pub fn preview(line: &str) -> &str {
    match line.char_indices().nth(DEBUG_MAX_LINE_PREVIEW) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
