use crate::config::SortOrder;
use crate::error::HuntResult;
use crate::types::{parse_timestamp, TimeWindow, Value};

use super::syntax_ast::*;
use super::syntax_common::Span;
use super::syntax_lexer::{lex, TKind};
use super::syntax_pattern::{parse_pattern, Cursor};
use super::syntax_time::{TimeSpec, TimeUnit};

/// Words that cannot be used as variable names.
const RESERVED: &[&str] = &[
    "GET", "FIND", "JOIN", "SORT", "GROUP", "APPLY", "DISP", "INFO", "SAVE", "LOAD", "NEW",
    "FROM", "WHERE", "BY", "AS", "ON", "WITH", "TO", "ATTR", "LIMIT", "OFFSET", "START", "STOP",
    "LAST", "BETWEEN", "AND", "OR", "NOT", "ASC", "DESC", "TRUE", "FALSE", "NULL",
];

/// Clause keywords that end a variable operand in DISP / transforms.
const CLAUSES: &[&str] = &["WHERE", "ATTR", "SORT", "LIMIT", "OFFSET"];

fn is_reserved(s: &str) -> bool { RESERVED.iter().any(|k| s.eq_ignore_ascii_case(k)) }

fn valid_var_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Parse one statement occupying `span` of `src`.
pub fn parse_statement(src: &str, span: Span) -> HuntResult<Statement> {
    let toks = lex(src, span.start, span.end)?;
    let mut cur = Cursor::new(src, toks, span.end);

    let assigned = matches!(cur.peek().map(|t| &t.kind), Some(TKind::Ident(_))) && cur.peek_n(1).map(|t| t.kind == TKind::Eq).unwrap_or(false);
    let output = if assigned {
        let pos = cur.pos();
        let name = cur.ident("a variable name")?;
        if !valid_var_name(&name) || is_reserved(&name) {
            return Err(cur.error_at(pos, format!("'{}' is not a valid variable name", name)));
        }
        cur.next();
        Some(name)
    } else {
        None
    };

    let command = parse_command(&mut cur, output.is_some())?;
    if !cur.at_end() {
        return Err(cur.expected("end of statement"));
    }
    Ok(Statement { output, command })
}

fn parse_command(cur: &mut Cursor, assigned: bool) -> HuntResult<Command> {
    let kw_pos = cur.pos();
    if cur.eat_kw("GET") { return parse_get(cur); }
    if cur.eat_kw("FIND") { return parse_find(cur); }
    if cur.eat_kw("JOIN") { return parse_join(cur); }
    if cur.eat_kw("SORT") { return parse_sort(cur); }
    if cur.eat_kw("GROUP") { return parse_group(cur); }
    if cur.eat_kw("APPLY") { return parse_apply(cur); }
    if cur.eat_kw("LOAD") { return parse_load(cur); }
    if cur.eat_kw("NEW") { return parse_new(cur); }
    for kw in ["DISP", "INFO", "SAVE"] {
        if cur.at_kw(kw) {
            if assigned {
                return Err(cur.error_at(kw_pos, format!("{} does not produce a variable and cannot be assigned", kw)));
            }
            cur.next();
            return match kw {
                "DISP" => parse_disp(cur),
                "INFO" => parse_info(cur),
                _ => parse_save(cur),
            };
        }
    }
    if assigned {
        if matches!(cur.peek().map(|t| &t.kind), Some(TKind::Ident(_))) {
            return parse_expression(cur);
        }
        return Err(cur.expected("a command or variable"));
    }
    Err(cur.expected("a command"))
}

fn variable(cur: &mut Cursor) -> HuntResult<String> {
    let pos = cur.pos();
    let name = cur.ident("a variable name")?;
    if !valid_var_name(&name) || is_reserved(&name) {
        return Err(cur.error_at(pos, format!("'{}' is not a valid variable name", name)));
    }
    Ok(name)
}

/// Optional leading variable for commands that fall back to the default variable.
fn optional_variable(cur: &mut Cursor, stop_kws: &[&str]) -> HuntResult<Option<String>> {
    match cur.peek().map(|t| t.kind.clone()) {
        Some(TKind::Ident(s)) if !stop_kws.iter().any(|k| s.eq_ignore_ascii_case(k)) => Ok(Some(variable(cur)?)),
        _ => Ok(None),
    }
}

fn entity_type(cur: &mut Cursor) -> HuntResult<String> {
    let pos = cur.pos();
    let t = cur.ident("an entity type")?;
    if is_reserved(&t) {
        return Err(cur.error_at(pos, format!("expected an entity type, found keyword '{}'", t)));
    }
    Ok(t)
}

fn sort_order(cur: &mut Cursor) -> Option<SortOrder> {
    if cur.eat_kw("ASC") { Some(SortOrder::Asc) } else if cur.eat_kw("DESC") { Some(SortOrder::Desc) } else { None }
}

fn timestamp_literal(cur: &mut Cursor, what: &str) -> HuntResult<chrono::DateTime<chrono::Utc>> {
    let pos = cur.pos();
    match cur.peek().map(|t| t.kind.clone()) {
        Some(TKind::Time(s)) | Some(TKind::Str(s)) => {
            cur.next();
            parse_timestamp(&s).ok_or_else(|| cur.error_at(pos, format!("invalid timestamp '{}'", s)))
        }
        _ => Err(cur.expected(what)),
    }
}

fn time_spec(cur: &mut Cursor) -> HuntResult<Option<TimeSpec>> {
    if cur.at_kw("START") {
        let pos = cur.pos();
        cur.next();
        let start = timestamp_literal(cur, "a timestamp after START")?;
        cur.expect_kw("STOP")?;
        let stop = timestamp_literal(cur, "a timestamp after STOP")?;
        if start > stop {
            return Err(cur.error_at(pos, "START must not be later than STOP"));
        }
        return Ok(Some(TimeSpec::Absolute(TimeWindow { start, stop })));
    }
    if cur.eat_kw("LAST") {
        let amount_pos = cur.pos();
        let amount = cur.count("a duration after LAST")?;
        let amount = i64::try_from(amount).map_err(|_| cur.error_at(amount_pos, "duration after LAST is too large"))?;
        let pos = cur.pos();
        let unit_word = cur.ident("a time unit (DAYS, HOURS, MINUTES or SECONDS)")?;
        let unit = TimeUnit::parse(&unit_word)
            .ok_or_else(|| cur.error_at(pos, format!("unknown time unit '{}'", unit_word)))?;
        return Ok(Some(TimeSpec::Last { amount, unit }));
    }
    Ok(None)
}

fn limit(cur: &mut Cursor) -> HuntResult<Option<usize>> {
    if cur.eat_kw("LIMIT") { Ok(Some(cur.count("a row count after LIMIT")?)) } else { Ok(None) }
}

fn where_clause(cur: &mut Cursor) -> HuntResult<Option<Pattern>> {
    if cur.eat_kw("WHERE") { Ok(Some(parse_pattern(cur)?)) } else { Ok(None) }
}

fn parse_get(cur: &mut Cursor) -> HuntResult<Command> {
    let entity_type = entity_type(cur)?;
    let mut sources = Vec::new();
    if cur.eat_kw("FROM") {
        loop {
            let src = match cur.peek().map(|t| t.kind.clone()) {
                Some(TKind::Uri(u)) => Source::Uri(u),
                Some(TKind::Str(s)) if s.contains("://") => Source::Uri(s),
                Some(TKind::Str(s)) => Source::Name(s),
                Some(TKind::Ident(s)) if !is_reserved(&s) => Source::Name(s),
                _ => return Err(cur.expected("a data source")),
            };
            cur.next();
            sources.push(src);
            if !cur.eat(&TKind::Comma) { break; }
        }
    }
    let pattern = where_clause(cur)?;
    let window = time_spec(cur)?;
    let limit = limit(cur)?;
    Ok(Command::Get { entity_type, sources, pattern, window, limit })
}

fn parse_find(cur: &mut Cursor) -> HuntResult<Command> {
    let first = entity_type(cur)?;
    if cur.eat_kw("BETWEEN") {
        let from = variable(cur)?;
        cur.expect_kw("AND")?;
        let to = variable(cur)?;
        let window = time_spec(cur)?;
        return Ok(Command::FindBetween { relation: first.to_ascii_lowercase(), from, to, window });
    }
    let relation = cur.ident("a relation")?.to_ascii_lowercase();
    let reversed = cur.eat_kw("BY");
    let input = variable(cur)?;
    let pattern = where_clause(cur)?;
    let window = time_spec(cur)?;
    let limit = limit(cur)?;
    Ok(Command::FindRelated { entity_type: first, relation, reversed, input, pattern, window, limit })
}

fn parse_join(cur: &mut Cursor) -> HuntResult<Command> {
    let left = variable(cur)?;
    cur.expect(&TKind::Comma, "','")?;
    let right = variable(cur)?;
    let by = if cur.eat_kw("BY") {
        let (_, a) = cur.attr_ref()?;
        let b = if cur.eat(&TKind::Comma) { cur.attr_ref()?.1 } else { a.clone() };
        Some((a, b))
    } else {
        None
    };
    Ok(Command::Join { left, right, by })
}

fn parse_sort(cur: &mut Cursor) -> HuntResult<Command> {
    let input = optional_variable(cur, &["BY"])?;
    cur.expect_kw("BY")?;
    let (_, attr) = cur.attr_ref()?;
    let order = sort_order(cur);
    Ok(Command::Sort { input, key: SortKey { attr, order } })
}

fn parse_group(cur: &mut Cursor) -> HuntResult<Command> {
    let input = optional_variable(cur, &["BY"])?;
    cur.expect_kw("BY")?;
    let mut by = Vec::new();
    loop {
        by.push(cur.attr_ref()?.1);
        if !cur.eat(&TKind::Comma) { break; }
    }
    let mut aggregations = Vec::new();
    if cur.eat_kw("WITH") {
        loop {
            let pos = cur.pos();
            let fname = cur.ident("an aggregation function")?;
            let func = AggFunc::parse(&fname)
                .ok_or_else(|| cur.error_at(pos, format!("unknown aggregation '{}'", fname)))?;
            cur.expect(&TKind::LParen, "'('")?;
            let attr = if cur.eat(&TKind::Star) { "*".to_string() } else { cur.attr_ref()?.1 };
            cur.expect(&TKind::RParen, "')'")?;
            let alias = if cur.eat_kw("AS") {
                variable(cur)?
            } else if attr == "*" {
                func.as_str().to_string()
            } else {
                format!("{}_{}", func.as_str(), attr.replace('.', "_"))
            };
            aggregations.push(Aggregation { func, attr, alias });
            if !cur.eat(&TKind::Comma) { break; }
        }
    }
    Ok(Command::Group { input, by, aggregations })
}

fn parse_apply(cur: &mut Cursor) -> HuntResult<Command> {
    let module = match cur.peek().map(|t| t.kind.clone()) {
        Some(TKind::Uri(u)) | Some(TKind::Str(u)) => { cur.next(); u }
        Some(TKind::Ident(s)) if !is_reserved(&s) => { cur.next(); s }
        _ => return Err(cur.expected("an analytics module")),
    };
    cur.expect_kw("ON")?;
    let mut inputs = Vec::new();
    loop {
        inputs.push(variable(cur)?);
        if !cur.eat(&TKind::Comma) { break; }
    }
    let mut params = Vec::new();
    if cur.eat_kw("WITH") {
        loop {
            let key = cur.ident("a parameter name")?;
            cur.expect(&TKind::Eq, "'='")?;
            let value = match cur.peek().map(|t| t.kind.clone()) {
                Some(TKind::Ident(s)) if !["TRUE", "FALSE", "NULL"].iter().any(|k| s.eq_ignore_ascii_case(k)) => {
                    cur.next();
                    Value::Str(s)
                }
                _ => cur.literal()?,
            };
            params.push((key, value));
            if !cur.eat(&TKind::Comma) { break; }
        }
    }
    Ok(Command::Apply { module, inputs, params })
}

fn refinement(cur: &mut Cursor) -> HuntResult<Refinement> {
    let mut r = Refinement::default();
    loop {
        let pos = cur.pos();
        let dup = |cur: &Cursor, kw: &str| cur.error_at(pos, format!("duplicate {} clause", kw));
        if cur.eat_kw("WHERE") {
            if r.pattern.is_some() { return Err(dup(cur, "WHERE")); }
            r.pattern = Some(parse_pattern(cur)?);
        } else if cur.eat_kw("ATTR") {
            if r.attrs.is_some() { return Err(dup(cur, "ATTR")); }
            let mut attrs = Vec::new();
            loop {
                attrs.push(cur.attr_ref()?.1);
                if !cur.eat(&TKind::Comma) { break; }
            }
            r.attrs = Some(attrs);
        } else if cur.eat_kw("SORT") {
            if r.sort.is_some() { return Err(dup(cur, "SORT")); }
            cur.expect_kw("BY")?;
            let (_, attr) = cur.attr_ref()?;
            r.sort = Some(SortKey { attr, order: sort_order(cur) });
        } else if cur.eat_kw("LIMIT") {
            if r.limit.is_some() { return Err(dup(cur, "LIMIT")); }
            r.limit = Some(cur.count("a row count after LIMIT")?);
        } else if cur.eat_kw("OFFSET") {
            if r.offset.is_some() { return Err(dup(cur, "OFFSET")); }
            r.offset = Some(cur.count("a row count after OFFSET")?);
        } else {
            break;
        }
    }
    Ok(r)
}

/// `v = a`, `v = a + b`, `v = a WHERE ...`
fn parse_expression(cur: &mut Cursor) -> HuntResult<Command> {
    let input = variable(cur)?;
    if cur.at(&TKind::Plus) {
        let mut inputs = vec![input];
        while cur.eat(&TKind::Plus) {
            inputs.push(variable(cur)?);
        }
        return Ok(Command::Merge { inputs });
    }
    if cur.at_end() {
        return Ok(Command::Assign { input });
    }
    if !CLAUSES.iter().any(|k| cur.at_kw(k)) {
        return Err(cur.expected("WHERE, ATTR, SORT BY, LIMIT, OFFSET or '+'"));
    }
    let refine = refinement(cur)?;
    Ok(Command::Transform { input, refine })
}

fn parse_disp(cur: &mut Cursor) -> HuntResult<Command> {
    let input = optional_variable(cur, CLAUSES)?;
    let refine = refinement(cur)?;
    Ok(Command::Disp { input, refine })
}

fn parse_info(cur: &mut Cursor) -> HuntResult<Command> {
    let input = optional_variable(cur, &[])?;
    Ok(Command::Info { input })
}

fn target(cur: &mut Cursor, what: &str) -> HuntResult<String> {
    match cur.peek().map(|t| t.kind.clone()) {
        Some(TKind::Uri(s)) | Some(TKind::Str(s)) => { cur.next(); Ok(s) }
        _ => Err(cur.expected(what)),
    }
}

fn parse_save(cur: &mut Cursor) -> HuntResult<Command> {
    let input = optional_variable(cur, &["TO"])?;
    cur.expect_kw("TO")?;
    let target = target(cur, "a quoted path or URI after TO")?;
    Ok(Command::Save { input, target })
}

fn parse_load(cur: &mut Cursor) -> HuntResult<Command> {
    let target = target(cur, "a quoted path or URI after LOAD")?;
    let entity_type = if cur.eat_kw("AS") { Some(entity_type(cur)?) } else { None };
    Ok(Command::Load { target, entity_type })
}

fn parse_new(cur: &mut Cursor) -> HuntResult<Command> {
    let entity_type = match cur.peek().map(|t| t.kind.clone()) {
        Some(TKind::Ident(_)) => Some(entity_type(cur)?),
        _ => None,
    };
    if !cur.at(&TKind::LBracket) {
        return Err(cur.expected("a JSON array of records"));
    }
    let start = cur.pos();
    let src: &str = cur.src;
    let raw = &src[start..cur.end()];
    let parsed: serde_json::Value = serde_json::from_str(raw).map_err(|e| {
        // serde_json reports 1-based line/column relative to `raw`
        let offset = offset_of(raw, e.line(), e.column());
        cur.error_at(start + offset, format!("invalid JSON: {}", e))
    })?;
    let records = match parsed {
        serde_json::Value::Array(items) => items,
        _ => return Err(cur.error_at(start, "NEW expects a JSON array")),
    };
    cur.skip_to_end();
    Ok(Command::New { entity_type, records })
}

fn offset_of(raw: &str, line: usize, column: usize) -> usize {
    let mut offset = 0usize;
    for (i, l) in raw.split('\n').enumerate() {
        if i + 1 == line {
            return offset + column.saturating_sub(1).min(l.len());
        }
        offset += l.len() + 1;
    }
    raw.len()
}
