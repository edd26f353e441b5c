//! Lexical helpers over SQL text.
//!
//! Only what the statement layer needs: finding `$n` placeholders the same
//! way the server does (ignoring string literals, quoted identifiers,
//! dollar-quoted bodies and comments), and trimming a trailing terminator
//! along with any comments after it.

/// Highest positional placeholder (`$1`, `$2`, ...) referenced in `sql`.
///
/// Gaps are allowed; `SELECT $3` reports 3.
pub fn parameter_count(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'\'' => i = skip_quoted(bytes, i, b'\'', backslash_escapes(bytes, i)),
            b'"' => i = skip_quoted(bytes, i, b'"', false),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_line_comment(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_block_comment(bytes, i),
            b'$' if i > 0 && is_ident_byte(bytes[i - 1]) => i += 1,
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    // Overlong indexes cannot be bound anyway; saturate.
                    let n = sql[start..end].parse::<usize>().unwrap_or(usize::MAX);
                    max = max.max(n);
                    i = end;
                } else if let Some(body_start) = dollar_tag_end(bytes, i) {
                    let tag = &bytes[i..body_start];
                    i = find(bytes, body_start, tag).map_or(bytes.len(), |at| at + tag.len());
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    max
}

/// `sql` without trailing whitespace, statement terminators and comments.
///
/// `SELECT 1; -- done` becomes `SELECT 1`. Text inside literals and
/// dollar-quoted bodies is kept as is.
pub fn strip_terminator(sql: &str) -> &str {
    let bytes = sql.as_bytes();
    let mut end = 0;
    let mut i = 0;

    while i < bytes.len() {
        let next = match bytes[i] {
            b';' => {
                i += 1;
                continue;
            }
            b if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_line_comment(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
                continue;
            }
            b'\'' => skip_quoted(bytes, i, b'\'', backslash_escapes(bytes, i)),
            b'"' => skip_quoted(bytes, i, b'"', false),
            b'$' if i == 0 || !is_ident_byte(bytes[i - 1]) => match dollar_tag_end(bytes, i) {
                Some(body_start) => {
                    let tag = &bytes[i..body_start];
                    find(bytes, body_start, tag).map_or(bytes.len(), |at| at + tag.len())
                }
                None => i + 1,
            },
            _ => i + 1,
        };
        // Bytes of a multibyte character all take the last arm, so `end`
        // settles on a character boundary.
        end = next;
        i = next;
    }

    &sql[..end]
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// An `E'...'` literal takes backslash escapes.
fn backslash_escapes(bytes: &[u8], quote: usize) -> bool {
    quote > 0
        && matches!(bytes[quote - 1], b'E' | b'e')
        && (quote < 2 || !is_ident_byte(bytes[quote - 2]))
}

/// Index of the newline ending the comment, or the end of the text.
fn skip_line_comment(bytes: &[u8], open: usize) -> usize {
    bytes[open..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| p + open)
}

/// Index just past the closing quote. Doubled quotes stay inside.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
        } else if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
            } else {
                return i + 1;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// Block comments nest.
fn skip_block_comment(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        if bytes[i] == b'/' && bytes.get(i + 1) == Some(&b'*') {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
            depth -= 1;
            i += 2;
            if depth == 0 {
                return i;
            }
        } else {
            i += 1;
        }
    }
    bytes.len()
}

/// If a dollar-quote tag (`$$` or `$tag$`) starts at `start`, the index just
/// past it.
fn dollar_tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if let Some(&first) = bytes.get(i) {
        if first.is_ascii_digit() {
            return None;
        }
    }
    while i < bytes.len() && is_ident_byte(bytes[i]) {
        i += 1;
    }
    (bytes.get(i) == Some(&b'$')).then_some(i + 1)
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
