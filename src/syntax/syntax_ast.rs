use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::config::SortOrder;
use crate::types::Value;

use super::syntax_time::TimeSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CompOp { Eq, Ne, Lt, Le, Gt, Ge, Like, NotLike, Matches, NotMatches, In, NotIn, IsNull, IsNotNull }

impl CompOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompOp::Eq => "=",
            CompOp::Ne => "!=",
            CompOp::Lt => "<",
            CompOp::Le => "<=",
            CompOp::Gt => ">",
            CompOp::Ge => ">=",
            CompOp::Like => "LIKE",
            CompOp::NotLike => "NOT LIKE",
            CompOp::Matches => "MATCHES",
            CompOp::NotMatches => "NOT MATCHES",
            CompOp::In => "IN",
            CompOp::NotIn => "NOT IN",
            CompOp::IsNull => "IS NULL",
            CompOp::IsNotNull => "IS NOT NULL",
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Operand {
    Value(Value),
    List(Vec<Value>),
    /// `var.attr`: the distinct values of `attr` in variable `var`, resolved at planning time.
    Ref { var: String, attr: String },
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub attr: String,
    /// Entity type written as `type:attr`, if any.
    pub type_prefix: Option<String>,
    pub op: CompOp,
    pub operand: Operand,
}

/// Boolean attribute-match expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Pattern {
    And(Vec<Pattern>),
    Or(Vec<Pattern>),
    Not(Box<Pattern>),
    Cmp(Comparison),
}

impl Pattern {
    /// Visit every comparison.
    pub fn comparisons(&self) -> Vec<&Comparison> {
        let mut out = Vec::new();
        fn walk<'a>(p: &'a Pattern, out: &mut Vec<&'a Comparison>) {
            match p {
                Pattern::And(v) | Pattern::Or(v) => v.iter().for_each(|c| walk(c, out)),
                Pattern::Not(inner) => walk(inner, out),
                Pattern::Cmp(c) => out.push(c),
            }
        }
        walk(self, &mut out);
        out
    }

    /// Variable references (`var.attr`) used as operands.
    pub fn references(&self) -> Vec<(String, String)> {
        self.comparisons()
            .into_iter()
            .filter_map(|c| match &c.operand {
                Operand::Ref { var, attr } => Some((var.clone(), attr.clone())),
                _ => None,
            })
            .collect()
    }

    /// Rewrite every comparison through `f`.
    pub fn try_map<E, F>(&self, f: &mut F) -> Result<Pattern, E>
    where
        F: FnMut(&Comparison) -> Result<Comparison, E>,
    {
        Ok(match self {
            Pattern::And(v) => Pattern::And(v.iter().map(|p| p.try_map(f)).collect::<Result<_, _>>()?),
            Pattern::Or(v) => Pattern::Or(v.iter().map(|p| p.try_map(f)).collect::<Result<_, _>>()?),
            Pattern::Not(inner) => Pattern::Not(Box::new(inner.try_map(f)?)),
            Pattern::Cmp(c) => Pattern::Cmp(f(c)?),
        })
    }

    /// Canonical text: operands of AND/OR are sorted so that logically identical patterns
    /// written in different orders produce the same text. Used for cache keys.
    pub fn normalized(&self) -> String {
        match self {
            Pattern::And(v) | Pattern::Or(v) => {
                let mut parts: Vec<String> = v.iter().map(|p| p.normalized()).collect();
                parts.sort();
                parts.dedup();
                if parts.len() == 1 {
                    return parts.remove(0);
                }
                let sep = if matches!(self, Pattern::And(_)) { " AND " } else { " OR " };
                format!("({})", parts.join(sep))
            }
            Pattern::Not(inner) => format!("NOT {}", inner.normalized()),
            Pattern::Cmp(c) => c.normalized(),
        }
    }
}

impl Comparison {
    fn normalized(&self) -> String {
        match (&self.op, &self.operand) {
            (CompOp::IsNull | CompOp::IsNotNull, _) | (_, Operand::None) => format!("{} {}", self.attr, self.op.as_str()),
            (_, Operand::List(items)) => {
                let mut vals: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                vals.sort();
                vals.dedup();
                format!("{} {} ({})", self.attr, self.op.as_str(), vals.join(", "))
            }
            (_, Operand::Value(v)) => format!("{} {} {}", self.attr, self.op.as_str(), v),
            (_, Operand::Ref { var, attr }) => format!("{} {} {}.{}", self.attr, self.op.as_str(), var, attr),
        }
    }
}

impl Display for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::And(v) | Pattern::Or(v) => {
                let sep = if matches!(self, Pattern::And(_)) { " AND " } else { " OR " };
                let parts: Vec<String> = v.iter().map(|p| p.to_string()).collect();
                write!(f, "({})", parts.join(sep))
            }
            Pattern::Not(inner) => write!(f, "NOT {}", inner),
            Pattern::Cmp(c) => f.write_str(&c.normalized()),
        }
    }
}

/// A data source named in `FROM`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Source {
    /// Connector name or bound variable; resolved during planning.
    Name(String),
    /// `scheme://rest` URI. `file://` URIs are bundle files.
    Uri(String),
}

impl Display for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self { Source::Name(n) => f.write_str(n), Source::Uri(u) => f.write_str(u) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggFunc { Sum, Count, Avg, Min, Max, NUnique }

impl AggFunc {
    pub fn parse(s: &str) -> Option<AggFunc> {
        match s.to_ascii_uppercase().as_str() {
            "SUM" => Some(AggFunc::Sum),
            "COUNT" => Some(AggFunc::Count),
            "AVG" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            "NUNIQUE" => Some(AggFunc::NUnique),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::NUnique => "nunique",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregation {
    pub func: AggFunc,
    pub attr: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub attr: String,
    /// `None` means the configured default order.
    pub order: Option<SortOrder>,
}

/// Post-processing clauses shared by transform and DISP.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Refinement {
    pub pattern: Option<Pattern>,
    pub attrs: Option<Vec<String>>,
    pub sort: Option<SortKey>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Refinement {
    pub fn is_empty(&self) -> bool {
        self.pattern.is_none() && self.attrs.is_none() && self.sort.is_none() && self.limit.is_none() && self.offset.is_none()
    }
}

/// One command, tagged by kind. The executor matches on this exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    Get {
        entity_type: String,
        sources: Vec<Source>,
        pattern: Option<Pattern>,
        window: Option<TimeSpec>,
        limit: Option<usize>,
    },
    FindBetween {
        relation: String,
        from: String,
        to: String,
        window: Option<TimeSpec>,
    },
    FindRelated {
        entity_type: String,
        relation: String,
        reversed: bool,
        input: String,
        pattern: Option<Pattern>,
        window: Option<TimeSpec>,
        limit: Option<usize>,
    },
    Join {
        left: String,
        right: String,
        by: Option<(String, String)>,
    },
    Sort {
        input: Option<String>,
        key: SortKey,
    },
    Group {
        input: Option<String>,
        by: Vec<String>,
        aggregations: Vec<Aggregation>,
    },
    Transform {
        input: String,
        refine: Refinement,
    },
    Merge {
        inputs: Vec<String>,
    },
    Assign {
        input: String,
    },
    Apply {
        module: String,
        inputs: Vec<String>,
        params: Vec<(String, Value)>,
    },
    Disp {
        input: Option<String>,
        refine: Refinement,
    },
    Info {
        input: Option<String>,
    },
    Save {
        input: Option<String>,
        target: String,
    },
    Load {
        target: String,
        entity_type: Option<String>,
    },
    New {
        entity_type: Option<String>,
        records: Vec<serde_json::Value>,
    },
}

impl Command {
    /// Command keyword, used in summaries and variable metadata.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::FindBetween { .. } | Command::FindRelated { .. } => "FIND",
            Command::Join { .. } => "JOIN",
            Command::Sort { .. } => "SORT",
            Command::Group { .. } => "GROUP",
            Command::Transform { .. } => "TRANSFORM",
            Command::Merge { .. } => "MERGE",
            Command::Assign { .. } => "ASSIGN",
            Command::Apply { .. } => "APPLY",
            Command::Disp { .. } => "DISP",
            Command::Info { .. } => "INFO",
            Command::Save { .. } => "SAVE",
            Command::Load { .. } => "LOAD",
            Command::New { .. } => "NEW",
        }
    }

    /// Commands that only read variables and never bind one.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Command::Disp { .. } | Command::Info { .. } | Command::Save { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    /// Variable on the left of `=`, if any.
    pub output: Option<String>,
    pub command: Command,
}

/// A statement together with where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedStatement {
    pub text: String,
    pub line: usize,
    pub column: usize,
    pub statement: Statement,
}
