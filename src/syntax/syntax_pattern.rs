use crate::error::{HuntError, HuntResult};
use crate::types::{parse_timestamp, Value};

use super::syntax_ast::{CompOp, Comparison, Operand, Pattern};
use super::syntax_common::line_col;
use super::syntax_lexer::{TKind, Tok};

/// Deepest nesting of NOT and grouping accepted in one pattern.
pub const MAX_PATTERN_DEPTH: usize = 64;

/// Token cursor shared by the pattern and command parsers.
pub struct Cursor<'a> {
    pub src: &'a str,
    toks: Vec<Tok>,
    idx: usize,
    end: usize,
    depth: usize,
}

fn describe(t: &Tok) -> String {
    match &t.kind {
        TKind::Ident(s) => format!("'{}'", s),
        TKind::Str(s) => format!("string '{}'", s),
        TKind::Time(s) => format!("timestamp t'{}'", s),
        TKind::Num(s) => format!("number {}", s),
        TKind::Uri(s) => format!("'{}'", s),
        other => {
            let s = match other {
                TKind::LParen => "(", TKind::RParen => ")", TKind::LBracket => "[", TKind::RBracket => "]",
                TKind::LBrace => "{", TKind::RBrace => "}", TKind::Comma => ",", TKind::Colon => ":",
                TKind::Dot => ".", TKind::Plus => "+", TKind::Star => "*", TKind::Eq => "=", TKind::Ne => "!=",
                TKind::Lt => "<", TKind::Le => "<=", TKind::Gt => ">", TKind::Ge => ">=",
                _ => "?",
            };
            format!("'{}'", s)
        }
    }
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str, toks: Vec<Tok>, end: usize) -> Self { Self { src, toks, idx: 0, end, depth: 0 } }

    pub fn peek(&self) -> Option<&Tok> { self.toks.get(self.idx) }
    pub fn peek_n(&self, n: usize) -> Option<&Tok> { self.toks.get(self.idx + n) }
    pub fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.idx).cloned();
        if t.is_some() { self.idx += 1; }
        t
    }
    pub fn at_end(&self) -> bool { self.idx >= self.toks.len() }
    pub fn skip_to_end(&mut self) { self.idx = self.toks.len(); }
    pub fn end(&self) -> usize { self.end }

    /// Offset of the current token, or the end of the statement.
    pub fn pos(&self) -> usize { self.peek().map(|t| t.pos).unwrap_or(self.end) }

    pub fn error_at(&self, pos: usize, msg: impl Into<String>) -> HuntError {
        let (line, column) = line_col(self.src, pos);
        HuntError::syntax(line, column, msg)
    }

    /// "expected X, found Y" at the current token.
    pub fn expected(&self, what: &str) -> HuntError {
        match self.peek() {
            Some(t) => self.error_at(t.pos, format!("expected {}, found {}", what, describe(t))),
            None => self.error_at(self.end, format!("expected {}, found end of statement", what)),
        }
    }

    pub fn at_kw(&self, kw: &str) -> bool { self.peek().map(|t| t.is_kw(kw)).unwrap_or(false) }
    pub fn at_kw_n(&self, n: usize, kw: &str) -> bool { self.peek_n(n).map(|t| t.is_kw(kw)).unwrap_or(false) }

    pub fn eat_kw(&mut self, kw: &str) -> bool {
        if self.at_kw(kw) { self.idx += 1; true } else { false }
    }

    pub fn expect_kw(&mut self, kw: &str) -> HuntResult<()> {
        if self.eat_kw(kw) { Ok(()) } else { Err(self.expected(kw)) }
    }

    pub fn at(&self, kind: &TKind) -> bool { self.peek().map(|t| &t.kind == kind).unwrap_or(false) }

    pub fn eat(&mut self, kind: &TKind) -> bool {
        if self.at(kind) { self.idx += 1; true } else { false }
    }

    pub fn expect(&mut self, kind: &TKind, what: &str) -> HuntResult<()> {
        if self.eat(kind) { Ok(()) } else { Err(self.expected(what)) }
    }

    /// Any identifier (keywords included).
    pub fn ident(&mut self, what: &str) -> HuntResult<String> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TKind::Ident(s)) => { self.idx += 1; Ok(s) }
            _ => Err(self.expected(what)),
        }
    }

    /// Attribute name: `name`, `type:name` or a dotted path such as `src_ref.value`.
    /// Returns (type prefix, attribute).
    pub fn attr_ref(&mut self) -> HuntResult<(Option<String>, String)> {
        let first = self.ident("an attribute name")?;
        let (prefix, mut attr) = if self.eat(&TKind::Colon) {
            (Some(first), self.ident("an attribute name after ':'")?)
        } else {
            (None, first)
        };
        while self.at(&TKind::Dot) && matches!(self.peek_n(1).map(|t| &t.kind), Some(TKind::Ident(_))) {
            self.idx += 1;
            let part = self.ident("an attribute name")?;
            attr.push('.');
            attr.push_str(&part);
        }
        Ok((prefix, attr))
    }

    /// Non-negative integer (LIMIT, OFFSET, LAST n).
    pub fn count(&mut self, what: &str) -> HuntResult<usize> {
        match self.peek().map(|t| (t.kind.clone(), t.pos)) {
            Some((TKind::Num(n), pos)) => {
                self.idx += 1;
                n.parse::<usize>().map_err(|_| self.error_at(pos, format!("{} must be a non-negative integer, found {}", what, n)))
            }
            _ => Err(self.expected(what)),
        }
    }

    /// Literal value: string, number, timestamp, TRUE, FALSE or NULL.
    pub fn literal(&mut self) -> HuntResult<Value> {
        let Some(t) = self.peek().cloned() else { return Err(self.expected("a value")) };
        let v = match &t.kind {
            TKind::Str(s) => Value::Str(s.clone()),
            TKind::Time(s) => match parse_timestamp(s) {
                Some(ts) => Value::Time(ts),
                None => return Err(self.error_at(t.pos, format!("invalid timestamp '{}'", s))),
            },
            TKind::Num(n) => parse_number(n).ok_or_else(|| self.error_at(t.pos, format!("invalid number '{}'", n)))?,
            TKind::Ident(s) if s.eq_ignore_ascii_case("TRUE") => Value::Bool(true),
            TKind::Ident(s) if s.eq_ignore_ascii_case("FALSE") => Value::Bool(false),
            TKind::Ident(s) if s.eq_ignore_ascii_case("NULL") => Value::Null,
            _ => return Err(self.expected("a value")),
        };
        self.idx += 1;
        Ok(v)
    }
}

pub fn parse_number(n: &str) -> Option<Value> {
    if let Ok(i) = n.parse::<i64>() { return Some(Value::Int(i)); }
    n.parse::<f64>().ok().map(Value::Float)
}

/// Parse a boolean pattern at the cursor. Precedence: OR < AND < NOT < comparison.
pub fn parse_pattern(cur: &mut Cursor) -> HuntResult<Pattern> {
    parse_or(cur)
}

fn parse_or(cur: &mut Cursor) -> HuntResult<Pattern> {
    let mut parts = vec![parse_and(cur)?];
    while cur.eat_kw("OR") {
        parts.push(parse_and(cur)?);
    }
    Ok(if parts.len() == 1 { parts.remove(0) } else { Pattern::Or(parts) })
}

fn parse_and(cur: &mut Cursor) -> HuntResult<Pattern> {
    let mut parts = vec![parse_not(cur)?];
    while cur.eat_kw("AND") {
        parts.push(parse_not(cur)?);
    }
    Ok(if parts.len() == 1 { parts.remove(0) } else { Pattern::And(parts) })
}

/// Run `f` one nesting level deeper, failing once the pattern nests too deeply.
fn nested<T>(cur: &mut Cursor, f: impl FnOnce(&mut Cursor) -> HuntResult<T>) -> HuntResult<T> {
    if cur.depth >= MAX_PATTERN_DEPTH {
        let pos = cur.pos();
        return Err(cur.error_at(pos, format!("pattern nests deeper than {} levels", MAX_PATTERN_DEPTH)));
    }
    cur.depth += 1;
    let r = f(cur);
    cur.depth -= 1;
    r
}

fn parse_not(cur: &mut Cursor) -> HuntResult<Pattern> {
    if cur.eat_kw("NOT") {
        return nested(cur, |c| Ok(Pattern::Not(Box::new(parse_not(c)?))));
    }
    parse_primary(cur)
}

fn parse_primary(cur: &mut Cursor) -> HuntResult<Pattern> {
    if cur.eat(&TKind::LParen) {
        let inner = nested(cur, parse_or)?;
        cur.expect(&TKind::RParen, "')'")?;
        return Ok(inner);
    }
    if cur.eat(&TKind::LBracket) {
        let inner = nested(cur, parse_or)?;
        cur.expect(&TKind::RBracket, "']'")?;
        return Ok(inner);
    }
    parse_comparison(cur).map(Pattern::Cmp)
}

fn parse_comparison(cur: &mut Cursor) -> HuntResult<Comparison> {
    let (type_prefix, attr) = cur.attr_ref()?;
    let op_pos = cur.pos();
    let op = if cur.eat(&TKind::Eq) { CompOp::Eq }
        else if cur.eat(&TKind::Ne) { CompOp::Ne }
        else if cur.eat(&TKind::Lt) { CompOp::Lt }
        else if cur.eat(&TKind::Le) { CompOp::Le }
        else if cur.eat(&TKind::Gt) { CompOp::Gt }
        else if cur.eat(&TKind::Ge) { CompOp::Ge }
        else if cur.eat_kw("LIKE") { CompOp::Like }
        else if cur.eat_kw("MATCHES") { CompOp::Matches }
        else if cur.eat_kw("IN") { CompOp::In }
        else if cur.eat_kw("IS") {
            let negated = cur.eat_kw("NOT");
            cur.expect_kw("NULL")?;
            let op = if negated { CompOp::IsNotNull } else { CompOp::IsNull };
            return Ok(Comparison { attr, type_prefix, op, operand: Operand::None });
        }
        else if cur.at_kw("NOT") {
            cur.next();
            if cur.eat_kw("LIKE") { CompOp::NotLike }
            else if cur.eat_kw("MATCHES") { CompOp::NotMatches }
            else if cur.eat_kw("IN") { CompOp::NotIn }
            else { return Err(cur.expected("LIKE, MATCHES or IN after NOT")); }
        }
        else { return Err(cur.expected("a comparison operator")); };

    let operand = parse_operand(cur, op)?;
    // `attr = NULL` reads as a null test
    if let Operand::Value(Value::Null) = operand {
        return match op {
            CompOp::Eq => Ok(Comparison { attr, type_prefix, op: CompOp::IsNull, operand: Operand::None }),
            CompOp::Ne => Ok(Comparison { attr, type_prefix, op: CompOp::IsNotNull, operand: Operand::None }),
            _ => Err(cur.error_at(op_pos, format!("NULL cannot be used with {}", op.as_str()))),
        };
    }
    if matches!(op, CompOp::Like | CompOp::NotLike | CompOp::Matches | CompOp::NotMatches) && !matches!(operand, Operand::Value(Value::Str(_))) {
        return Err(cur.error_at(op_pos, format!("{} expects a quoted pattern", op.as_str())));
    }
    Ok(Comparison { attr, type_prefix, op, operand })
}

fn parse_operand(cur: &mut Cursor, op: CompOp) -> HuntResult<Operand> {
    // var.attr reference
    if let (Some(Tok { kind: TKind::Ident(var), .. }), Some(Tok { kind: TKind::Dot, .. })) = (cur.peek().cloned(), cur.peek_n(1).cloned()) {
        let is_literal_kw = ["TRUE", "FALSE", "NULL"].iter().any(|k| var.eq_ignore_ascii_case(k));
        if !is_literal_kw {
            cur.next();
            cur.next();
            let attr = cur.ident("an attribute name after '.'")?;
            return Ok(Operand::Ref { var, attr });
        }
    }
    if matches!(op, CompOp::In | CompOp::NotIn) {
        cur.expect(&TKind::LParen, "'(' or a variable reference after IN")?;
        let mut items = Vec::new();
        if !cur.at(&TKind::RParen) {
            loop {
                items.push(cur.literal()?);
                if !cur.eat(&TKind::Comma) { break; }
            }
        }
        cur.expect(&TKind::RParen, "',' or ')'")?;
        return Ok(Operand::List(items));
    }
    Ok(Operand::Value(cur.literal()?))
}
