/// Replace comments with spaces while preserving content inside string literals.
/// Supported comment styles:
/// - `#` and `--` line comments until end of line
/// - `/* ... */` block comments (nesting is tracked)
/// The output has exactly the same byte length as the input and keeps every newline,
/// so offsets into it are offsets into the original source.
pub fn strip_comments(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    let mut quote: Option<u8> = None;
    let mut block_depth: i32 = 0;
    let mut line_comment = false;

    // Blank one byte, keeping line breaks and leaving multi-byte sequences intact as spaces
    fn blank(out: &mut Vec<u8>, b: u8) {
        if b == b'\n' || b == b'\r' { out.push(b) } else { out.push(b' ') }
    }

    while i < bytes.len() {
        let b = bytes[i];

        if line_comment {
            if b == b'\n' { line_comment = false; }
            blank(&mut out, b);
            i += 1;
            continue;
        }

        if block_depth > 0 {
            if b == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
                block_depth += 1;
                out.extend_from_slice(b"  ");
                i += 2;
                continue;
            }
            if b == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
                block_depth -= 1;
                out.extend_from_slice(b"  ");
                i += 2;
                continue;
            }
            blank(&mut out, b);
            i += 1;
            continue;
        }

        if let Some(q) = quote {
            out.push(b);
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == q { quote = None; }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' => { quote = Some(b); out.push(b); i += 1; }
            b'#' => { line_comment = true; out.push(b' '); i += 1; }
            b'-' if i + 1 < bytes.len() && bytes[i + 1] == b'-' => {
                line_comment = true;
                out.extend_from_slice(b"  ");
                i += 2;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                block_depth = 1;
                out.extend_from_slice(b"  ");
                i += 2;
            }
            _ => { out.push(b); i += 1; }
        }
    }

    // Only ASCII bytes were replaced, and only whole comment bodies: a multi-byte
    // character inside a comment becomes several spaces, which keeps the output valid UTF-8.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Byte range of one statement inside the (comment-stripped) source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Split source into statement spans. Statements end at `;` or a newline that is outside
/// quotes and brackets. A line whose last non-blank character is `\` continues onto the
/// next line. Blank statements are skipped; spans are trimmed.
pub fn split_statements(src: &str) -> Vec<Span> {
    let bytes = src.as_bytes();
    let mut spans = Vec::new();
    let mut quote: Option<u8> = None;
    let mut depth: i32 = 0;
    let mut continued = false;
    let mut start = 0usize;
    let mut i = 0usize;

    let push = |s: usize, e: usize, spans: &mut Vec<Span>| {
        let text = &src[s..e];
        let lead = text.len() - text.trim_start().len();
        let trail = text.len() - text.trim_end().len();
        if lead + trail < text.len() {
            spans.push(Span { start: s + lead, end: e - trail });
        }
    };

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' { i += 2; continue; }
            if b == q { quote = None; }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = (depth - 1).max(0),
            b'\\' => {
                let rest = &src[i + 1..];
                let eol = rest.find('\n').unwrap_or(rest.len());
                if rest[..eol].trim().is_empty() { continued = true; }
            }
            b';' if depth == 0 => {
                push(start, i, &mut spans);
                start = i + 1;
            }
            b'\n' => {
                if continued {
                    continued = false;
                } else if depth == 0 {
                    push(start, i, &mut spans);
                    start = i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    if start < bytes.len() {
        push(start, bytes.len(), &mut spans);
    }
    spans
}

/// 1-based (line, column) of a byte offset.
pub fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(src.len());
    let prefix = &src.as_bytes()[..offset];
    let line = prefix.iter().filter(|b| **b == b'\n').count() + 1;
    let line_start = prefix.iter().rposition(|b| *b == b'\n').map(|p| p + 1).unwrap_or(0);
    let col = String::from_utf8_lossy(&prefix[line_start..]).chars().count() + 1;
    (line, col)
}

/// One-line snippet with a caret under the column, for diagnostics.
pub fn caret_snippet(src: &str, pos: usize) -> String {
    let pos = pos.min(src.len());
    let line_start = src.as_bytes()[..pos].iter().rposition(|b| *b == b'\n').map(|p| p + 1).unwrap_or(0);
    let line_end = src.as_bytes()[pos..].iter().position(|b| *b == b'\n').map(|p| pos + p).unwrap_or(src.len());
    let line = String::from_utf8_lossy(&src.as_bytes()[line_start..line_end]).into_owned();
    let col = String::from_utf8_lossy(&src.as_bytes()[line_start..pos]).chars().count();
    format!("{}\n{}^", line, " ".repeat(col))
}
