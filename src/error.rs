//! Unified statement error model.
//! Every statement either succeeds or fails with one `HuntError`; the kind decides how a
//! host renders the diagnostic. Connector-level failures are not errors here: the
//! federation engine absorbs them into `FetchReport` as degraded coverage.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HuntError {
    #[error("line {line}, column {column}: {message}")]
    Syntax { line: usize, column: usize, message: String },
    #[error("variable '{name}' is not defined")]
    UndefinedVariable { name: String },
    #[error("{message}")]
    TypeMismatch { message: String },
    #[error("{message}")]
    SchemaMismatch { message: String },
    #[error("{message}")]
    NoApplicableConnector { message: String },
    #[error("analytics '{module}' failed: {message}")]
    Analytics { module: String, message: String },
    #[error("{message}")]
    Store { message: String },
    #[error("{message}")]
    Semantic { message: String },
    #[error("{message}")]
    Internal { message: String },
}

impl HuntError {
    pub fn code_str(&self) -> &'static str {
        match self {
            HuntError::Syntax { .. } => "SyntaxError",
            HuntError::UndefinedVariable { .. } => "UndefinedVariableError",
            HuntError::TypeMismatch { .. } => "TypeMismatchError",
            HuntError::SchemaMismatch { .. } => "SchemaMismatch",
            HuntError::NoApplicableConnector { .. } => "NoApplicableConnector",
            HuntError::Analytics { .. } => "AnalyticsError",
            HuntError::Store { .. } => "StoreError",
            HuntError::Semantic { .. } => "SemanticError",
            HuntError::Internal { .. } => "InternalError",
        }
    }

    pub fn message(&self) -> String {
        match self {
            HuntError::Syntax { message, .. }
            | HuntError::TypeMismatch { message }
            | HuntError::SchemaMismatch { message }
            | HuntError::NoApplicableConnector { message }
            | HuntError::Analytics { message, .. }
            | HuntError::Store { message }
            | HuntError::Semantic { message }
            | HuntError::Internal { message } => message.clone(),
            HuntError::UndefinedVariable { name } => format!("variable '{}' is not defined", name),
        }
    }

    /// Parse-time and planning-time failures. These abort the statement before any I/O.
    pub fn is_compile_time(&self) -> bool {
        matches!(
            self,
            HuntError::Syntax { .. }
                | HuntError::UndefinedVariable { .. }
                | HuntError::TypeMismatch { .. }
                | HuntError::SchemaMismatch { .. }
                | HuntError::Semantic { .. }
        )
    }

    pub fn syntax<S: Into<String>>(line: usize, column: usize, msg: S) -> Self { HuntError::Syntax { line, column, message: msg.into() } }
    pub fn undefined<S: Into<String>>(name: S) -> Self { HuntError::UndefinedVariable { name: name.into() } }
    pub fn type_mismatch<S: Into<String>>(msg: S) -> Self { HuntError::TypeMismatch { message: msg.into() } }
    pub fn schema_mismatch<S: Into<String>>(msg: S) -> Self { HuntError::SchemaMismatch { message: msg.into() } }
    pub fn no_connector<S: Into<String>>(msg: S) -> Self { HuntError::NoApplicableConnector { message: msg.into() } }
    pub fn analytics<S: Into<String>, M: Into<String>>(module: S, msg: M) -> Self { HuntError::Analytics { module: module.into(), message: msg.into() } }
    pub fn semantic<S: Into<String>>(msg: S) -> Self { HuntError::Semantic { message: msg.into() } }
    pub fn internal<S: Into<String>>(msg: S) -> Self { HuntError::Internal { message: msg.into() } }

    /// Map an underlying store failure. Takes anything displayable so it can be used
    /// directly in `map_err` over `anyhow::Error`.
    pub fn store<E: std::fmt::Display>(err: E) -> Self { HuntError::Store { message: err.to_string() } }
}

pub type HuntResult<T> = Result<T, HuntError>;

impl From<anyhow::Error> for HuntError {
    fn from(err: anyhow::Error) -> Self {
        // Default mapping: treat as Internal unless mapped explicitly at the call site
        HuntError::Internal { message: format!("{:#}", err) }
    }
}

/// A failed statement with enough structure to render a user-facing diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementFailure {
    /// Statement text as written (trimmed).
    pub statement: String,
    /// 1-based line of the statement's first character in the submitted source.
    pub line: usize,
    pub error: HuntError,
}

impl std::fmt::Display for StatementFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[ERROR] {}: {}\n  in statement (line {}): {}", self.error.code_str(), self.error, self.line, self.statement)
    }
}

impl std::error::Error for StatementFailure {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
