//! Hunt language front-end: comment stripping, statement splitting, tokenizing and
//! parsing into the statement AST. Parsing is pure; it resolves no variables.

pub mod syntax_ast;
pub mod syntax_commands;
pub mod syntax_common;
pub mod syntax_lexer;
pub mod syntax_pattern;
pub mod syntax_time;

pub use syntax_ast::*;
pub use syntax_time::{TimeSpec, TimeUnit};

use crate::error::{HuntResult, StatementFailure};

use syntax_common::{line_col, split_statements, strip_comments};

/// Parse every statement in `text`, failing on the first malformed one.
pub fn parse(text: &str) -> HuntResult<Vec<Statement>> {
    parse_batch(text)
        .into_iter()
        .map(|r| r.map(|p| p.statement).map_err(|f| f.error))
        .collect()
}

/// Parse `text` statement by statement. A malformed statement yields one failure and
/// parsing continues with the next statement.
pub fn parse_batch(text: &str) -> Vec<Result<ParsedStatement, StatementFailure>> {
    let src = strip_comments(text);
    split_statements(&src)
        .into_iter()
        .map(|span| {
            let stmt_text = src[span.start..span.end].to_string();
            let (line, column) = line_col(&src, span.start);
            match syntax_commands::parse_statement(&src, span) {
                Ok(statement) => Ok(ParsedStatement { text: stmt_text, line, column, statement }),
                Err(error) => Err(StatementFailure { statement: stmt_text, line, error }),
            }
        })
        .collect()
}

/// Parse a standalone pattern such as `name = 'cmd.exe' AND pid > 4`.
pub fn parse_pattern(text: &str) -> HuntResult<Pattern> {
    let src = strip_comments(text);
    let toks = syntax_lexer::lex(&src, 0, src.len())?;
    let mut cur = syntax_pattern::Cursor::new(&src, toks, src.len());
    let p = syntax_pattern::parse_pattern(&mut cur)?;
    if !cur.at_end() {
        return Err(cur.expected("end of pattern"));
    }
    Ok(p)
}
