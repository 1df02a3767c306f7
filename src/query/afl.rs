// ==============================================================================
// afl.rs - Typed AFL Statement Builder
// ==============================================================================
// Description: Expression tree for array-store queries, rendered to AFL text
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-03-12
// Version: 1.0.0
// ==============================================================================
// Names are validated when an Ident/ArrayName is built and literals are
// escaped when rendered, so no stage ever splices raw text into a query.
// ==============================================================================

use std::fmt;

use crate::error::PipelineResult;
use crate::models::StructureSchema;
use crate::validator::{quote_literal, validate_identifier};

/// Validated attribute, dimension or function name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: impl Into<String>) -> PipelineResult<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated array (structure) name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayName(Ident);

impl ArrayName {
    pub fn new(name: impl Into<String>) -> PipelineResult<Self> {
        Ok(Self(Ident::new(name)?))
    }

    /// `<name>_<suffix>`; suffixes are compile-time constants made of legal characters
    pub fn with_suffix(&self, suffix: &str) -> ArrayName {
        ArrayName(Ident(format!("{}_{}", self.0, suffix)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// `<array>.<attr>` reference used by index_lookup
    pub fn attr(&self, attr: &Ident) -> QualifiedAttr {
        QualifiedAttr {
            array: self.clone(),
            attr: attr.clone(),
        }
    }
}

impl fmt::Display for ArrayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedAttr {
    pub array: ArrayName,
    pub attr: Ident,
}

impl fmt::Display for QualifiedAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.array, self.attr)
    }
}

/// Scalar expression used inside apply() and filter()
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Int(i64),
    Str(String),
    Attr(Ident),
    Call { func: Ident, args: Vec<Term> },
    Add(Box<Term>, Box<Term>),
}

impl Term {
    pub fn attr(name: &Ident) -> Term {
        Term::Attr(name.clone())
    }

    pub fn call(func: &Ident, args: Vec<Term>) -> Term {
        Term::Call {
            func: func.clone(),
            args,
        }
    }

    pub fn plus(self, other: Term) -> Term {
        Term::Add(Box::new(self), Box::new(other))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Int(v) => write!(f, "{}", v),
            Term::Str(s) => f.write_str(&quote_literal(s)),
            Term::Attr(name) => write!(f, "{}", name),
            Term::Call { func, args } => {
                write!(f, "{}(", func)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Term::Add(a, b) => write!(f, "{}+{}", a, b),
        }
    }
}

/// Filter predicate (only equality is needed by the pipeline)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Eq(Ident, Term),
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Eq(name, value) => write!(f, "{}={}", name, value),
        }
    }
}

/// Aggregate call; the store names its output `<attr>_<func>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggCall {
    Sum(Ident),
    Max(Ident),
}

impl AggCall {
    pub fn output_name(&self) -> String {
        match self {
            AggCall::Sum(a) => format!("{}_sum", a),
            AggCall::Max(a) => format!("{}_max", a),
        }
    }
}

impl fmt::Display for AggCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggCall::Sum(a) => write!(f, "sum({})", a),
            AggCall::Max(a) => write!(f, "max({})", a),
        }
    }
}

/// Read expression producing an array
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Array(ArrayName),
    Project {
        input: Box<Expr>,
        attrs: Vec<Ident>,
    },
    Filter {
        input: Box<Expr>,
        predicate: Predicate,
    },
    CrossJoin {
        left: Box<Expr>,
        right: Box<Expr>,
        on: Vec<(Ident, Ident)>,
    },
    Apply {
        input: Box<Expr>,
        bindings: Vec<(Ident, Term)>,
    },
    Aggregate {
        input: Box<Expr>,
        calls: Vec<AggCall>,
        group_by: Vec<Ident>,
    },
    AttributeRename {
        input: Box<Expr>,
        from: Ident,
        to: Ident,
    },
    Unpack {
        input: Box<Expr>,
        dim: Ident,
    },
    Between {
        input: Box<Expr>,
        low: Vec<i64>,
        high: Vec<i64>,
    },
    Redimension {
        input: Box<Expr>,
        schema_of: ArrayName,
    },
    IndexLookup {
        input: Box<Expr>,
        index: Box<Expr>,
        source: QualifiedAttr,
        output: Ident,
    },
    Sort {
        input: Box<Expr>,
        attrs: Vec<Ident>,
    },
    Uniq(Box<Expr>),
    Count(Box<Expr>),
    Dimensions(ArrayName),
    Versions(ArrayName),
    /// `list('arrays')`: one row per structure in the store
    ListArrays,
}

impl Expr {
    pub fn array(name: &ArrayName) -> Expr {
        Expr::Array(name.clone())
    }

    pub fn project(self, attrs: &[&Ident]) -> Expr {
        Expr::Project {
            input: Box::new(self),
            attrs: attrs.iter().map(|a| (*a).clone()).collect(),
        }
    }

    pub fn filter(self, predicate: Predicate) -> Expr {
        Expr::Filter {
            input: Box::new(self),
            predicate,
        }
    }

    pub fn cross_join(self, right: Expr, on: Vec<(Ident, Ident)>) -> Expr {
        Expr::CrossJoin {
            left: Box::new(self),
            right: Box::new(right),
            on,
        }
    }

    pub fn apply(self, bindings: Vec<(Ident, Term)>) -> Expr {
        Expr::Apply {
            input: Box::new(self),
            bindings,
        }
    }

    pub fn aggregate(self, calls: Vec<AggCall>, group_by: Vec<Ident>) -> Expr {
        Expr::Aggregate {
            input: Box::new(self),
            calls,
            group_by,
        }
    }

    pub fn rename(self, from: Ident, to: Ident) -> Expr {
        Expr::AttributeRename {
            input: Box::new(self),
            from,
            to,
        }
    }

    pub fn unpack(self, dim: Ident) -> Expr {
        Expr::Unpack {
            input: Box::new(self),
            dim,
        }
    }

    /// Inclusive one-dimensional row range
    pub fn between(self, low: u64, high: u64) -> Expr {
        Expr::Between {
            input: Box::new(self),
            low: vec![low as i64],
            high: vec![high as i64],
        }
    }

    pub fn redimension(self, schema_of: &ArrayName) -> Expr {
        Expr::Redimension {
            input: Box::new(self),
            schema_of: schema_of.clone(),
        }
    }

    pub fn index_lookup(self, index: Expr, source: QualifiedAttr, output: Ident) -> Expr {
        Expr::IndexLookup {
            input: Box::new(self),
            index: Box::new(index),
            source,
            output,
        }
    }

    pub fn sort(self, attrs: &[&Ident]) -> Expr {
        Expr::Sort {
            input: Box::new(self),
            attrs: attrs.iter().map(|a| (*a).clone()).collect(),
        }
    }

    pub fn uniq(self) -> Expr {
        Expr::Uniq(Box::new(self))
    }

    pub fn count(self) -> Expr {
        Expr::Count(Box::new(self))
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Array(name) => write!(f, "{}", name),
            Expr::Project { input, attrs } => {
                write!(f, "project({}", input)?;
                write_tail(f, attrs)?;
                f.write_str(")")
            }
            Expr::Filter { input, predicate } => write!(f, "filter({},{})", input, predicate),
            Expr::CrossJoin { left, right, on } => {
                write!(f, "cross_join({},{}", left, right)?;
                for (l, r) in on {
                    write!(f, ",{},{}", l, r)?;
                }
                f.write_str(")")
            }
            Expr::Apply { input, bindings } => {
                write!(f, "apply({}", input)?;
                for (name, term) in bindings {
                    write!(f, ",{},{}", name, term)?;
                }
                f.write_str(")")
            }
            Expr::Aggregate {
                input,
                calls,
                group_by,
            } => {
                write!(f, "aggregate({}", input)?;
                write_tail(f, calls)?;
                write_tail(f, group_by)?;
                f.write_str(")")
            }
            Expr::AttributeRename { input, from, to } => {
                write!(f, "attribute_rename({},{},{})", input, from, to)
            }
            Expr::Unpack { input, dim } => write!(f, "unpack({},{})", input, dim),
            Expr::Between { input, low, high } => {
                write!(f, "between({}", input)?;
                write_tail(f, low)?;
                write_tail(f, high)?;
                f.write_str(")")
            }
            Expr::Redimension { input, schema_of } => {
                write!(f, "redimension({},{})", input, schema_of)
            }
            Expr::IndexLookup {
                input,
                index,
                source,
                output,
            } => write!(f, "index_lookup({},{},{},{})", input, index, source, output),
            Expr::Sort { input, attrs } => {
                write!(f, "sort({}", input)?;
                write_tail(f, attrs)?;
                f.write_str(")")
            }
            Expr::Uniq(input) => write!(f, "uniq({})", input),
            Expr::Count(input) => write!(f, "count({})", input),
            Expr::Dimensions(name) => write!(f, "dimensions({})", name),
            Expr::Versions(name) => write!(f, "versions({})", name),
            Expr::ListArrays => f.write_str("list('arrays')"),
        }
    }
}

/// Complete statement sent to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Read(Expr),
    Store { input: Expr, into: ArrayName },
    Create { name: ArrayName, schema: StructureSchema },
    Insert { input: Expr, into: ArrayName },
    RedimensionStore { source: ArrayName, target: ArrayName },
    Remove(ArrayName),
    RemoveVersions { array: ArrayName, below: u64 },
}

impl Query {
    /// Whether this statement changes store state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Query::Read(_))
    }
}

impl From<Expr> for Query {
    fn from(expr: Expr) -> Self {
        Query::Read(expr)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Read(expr) => write!(f, "{}", expr),
            Query::Store { input, into } => write!(f, "store({},{})", input, into),
            Query::Create { name, schema } => write!(f, "create array {} {}", name, schema),
            Query::Insert { input, into } => write!(f, "insert({},{})", input, into),
            Query::RedimensionStore { source, target } => {
                write!(f, "redimension_store({},{})", source, target)
            }
            Query::Remove(name) => write!(f, "remove({})", name),
            Query::RemoveVersions { array, below } => {
                write!(f, "remove_versions({},{})", array, below)
            }
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

fn write_tail<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for item in items {
        write!(f, ",{}", item)?;
    }
    Ok(())
}
