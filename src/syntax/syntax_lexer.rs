use crate::error::{HuntError, HuntResult};

use super::syntax_common::line_col;

#[derive(Clone, Debug, PartialEq)]
pub enum TKind {
    /// Identifier or keyword, as written. Entity types may contain `-`.
    Ident(String),
    Str(String),
    /// `t'...'` timestamp literal (contents only).
    Time(String),
    Num(String),
    /// `scheme://...` up to whitespace, `,` or `;`.
    Uri(String),
    LParen, RParen, LBracket, RBracket, LBrace, RBrace,
    Comma, Colon, Dot, Plus, Star,
    Eq, Ne, Lt, Le, Gt, Ge,
}

#[derive(Clone, Debug)]
pub struct Tok {
    pub kind: TKind,
    /// Absolute byte offset in the source.
    pub pos: usize,
}

impl Tok {
    /// Case-insensitive keyword test.
    pub fn is_kw(&self, kw: &str) -> bool {
        matches!(&self.kind, TKind::Ident(s) if s.eq_ignore_ascii_case(kw))
    }
}

fn is_ident_start(c: u8) -> bool { c.is_ascii_alphabetic() || c == b'_' }
fn is_ident_part(c: u8) -> bool { c.is_ascii_alphanumeric() || c == b'_' }

fn uri_scheme_len(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i;
    while j < bytes.len() && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'+' || bytes[j] == b'-' || bytes[j] == b'.') {
        j += 1;
    }
    if j > i && bytes[j..].starts_with(b"://") { Some(j - i) } else { None }
}

fn err(src: &str, pos: usize, msg: impl Into<String>) -> HuntError {
    let (line, column) = line_col(src, pos);
    HuntError::syntax(line, column, msg)
}

/// Read a quoted literal starting at the opening quote. Backslash escapes `\n`, `\t`,
/// `\\` and the quote character; other escaped characters are kept with their backslash.
fn read_quoted(src: &str, start: usize) -> HuntResult<(String, usize)> {
    let bytes = src.as_bytes();
    let q = bytes[start];
    let mut i = start + 1;
    let mut out = String::new();
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' && i + 1 < bytes.len() {
            let n = bytes[i + 1];
            match n {
                b'n' => out.push('\n'),
                b't' => out.push('\t'),
                b'\\' => out.push('\\'),
                _ if n == q => out.push(n as char),
                _ => { out.push('\\'); i += 1; continue; }
            }
            i += 2;
            continue;
        }
        if b == q {
            return Ok((out, i + 1));
        }
        // Copy one full UTF-8 character
        let ch_len = src[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&src[i..i + ch_len]);
        i += ch_len;
    }
    Err(err(src, start, "unterminated string literal"))
}

/// Tokenize `src[start..end]`; positions are absolute offsets into `src`.
pub fn lex(src: &str, start: usize, end: usize) -> HuntResult<Vec<Tok>> {
    let bytes = &src.as_bytes()[..end];
    let mut i = start;
    let mut toks: Vec<Tok> = Vec::new();
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() { i += 1; continue; }
        if c == b'\\' {
            // line continuation marker
            let rest = &src[i + 1..end];
            let eol = rest.find('\n').unwrap_or(rest.len());
            if rest[..eol].trim().is_empty() { i += 1 + eol; continue; }
            return Err(err(src, i, "unexpected '\\'"));
        }
        if c == b'\'' || c == b'"' {
            let (s, next) = read_quoted(src, i)?;
            toks.push(Tok { kind: TKind::Str(s), pos: i });
            i = next;
            continue;
        }
        if (c == b't' || c == b'T') && i + 1 < bytes.len() && bytes[i + 1] == b'\'' {
            let (s, next) = read_quoted(src, i + 1)?;
            toks.push(Tok { kind: TKind::Time(s), pos: i });
            i = next;
            continue;
        }
        let prev_is_operand = matches!(
            toks.last().map(|t| &t.kind),
            Some(TKind::Ident(_) | TKind::Num(_) | TKind::Str(_) | TKind::RParen | TKind::RBracket)
        );
        if c.is_ascii_digit() || (c == b'-' && !prev_is_operand && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit()) {
            let s = i;
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.' || bytes[i] == b'e' || bytes[i] == b'E') {
                i += 1;
            }
            toks.push(Tok { kind: TKind::Num(src[s..i].to_string()), pos: s });
            continue;
        }
        if is_ident_start(c) {
            if let Some(n) = uri_scheme_len(bytes, i) {
                let s = i;
                i += n + 3;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b',' && bytes[i] != b';' {
                    i += 1;
                }
                toks.push(Tok { kind: TKind::Uri(src[s..i].to_string()), pos: s });
                continue;
            }
            let s = i;
            i += 1;
            loop {
                if i < bytes.len() && is_ident_part(bytes[i]) {
                    i += 1;
                } else if i + 1 < bytes.len() && bytes[i] == b'-' && is_ident_part(bytes[i + 1]) && bytes[i + 1] != b'-' {
                    // hyphenated entity types such as network-traffic
                    i += 1;
                } else {
                    break;
                }
            }
            toks.push(Tok { kind: TKind::Ident(src[s..i].to_string()), pos: s });
            continue;
        }
        let (kind, width) = match c {
            b'(' => (TKind::LParen, 1),
            b')' => (TKind::RParen, 1),
            b'[' => (TKind::LBracket, 1),
            b']' => (TKind::RBracket, 1),
            b'{' => (TKind::LBrace, 1),
            b'}' => (TKind::RBrace, 1),
            b',' => (TKind::Comma, 1),
            b':' => (TKind::Colon, 1),
            b'.' => (TKind::Dot, 1),
            b'+' => (TKind::Plus, 1),
            b'*' => (TKind::Star, 1),
            b'=' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' { (TKind::Eq, 2) } else { (TKind::Eq, 1) }
            }
            b'<' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' { (TKind::Le, 2) }
                else if i + 1 < bytes.len() && bytes[i + 1] == b'>' { (TKind::Ne, 2) }
                else { (TKind::Lt, 1) }
            }
            b'>' => {
                if i + 1 < bytes.len() && bytes[i + 1] == b'=' { (TKind::Ge, 2) } else { (TKind::Gt, 1) }
            }
            b'!' if i + 1 < bytes.len() && bytes[i + 1] == b'=' => (TKind::Ne, 2),
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(err(src, i, format!("unexpected character '{}'", ch)));
            }
        };
        toks.push(Tok { kind, pos: i });
        i += width;
    }
    Ok(toks)
}
