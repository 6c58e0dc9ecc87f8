//! Query engine for bitframe
//!
//! A query is a sequence of calls such as
//! `SetBit(id=1, frame="f", profileID=100) Bitmap(id=1, frame="f")`.
//! The parser turns the text into generic [`Call`] trees, the planner
//! compiles those into typed [`Operation`]s and the executor runs them.

mod executor;
mod parser;
mod planner;

pub use executor::Executor;
pub use parser::QueryParser;
pub use planner::QueryPlanner;

use crate::storage::AttrUpdates;
use crate::{AttrMap, Profile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Parsed Query
// ============================================================================

/// Literal argument value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Non-negative integer
    Uint(u64),
    /// Negative integer
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Quoted string or bare identifier
    String(String),
    Null,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Uint(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            // Debug keeps the fractional part so 2.0 stays a float
            Value::Float(v) => write!(f, "{:?}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::String(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                f.write_str("\"")
            }
            Value::Null => f.write_str("null"),
        }
    }
}

/// A call: name, nested calls, keyword arguments
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Call {
    pub name: String,
    pub children: Vec<Call>,
    pub args: BTreeMap<String, Value>,
}

impl Call {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    pub fn with_child(mut self, child: Call) -> Self {
        self.children.push(child);
        self
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for child in &self.children {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}", child)?;
            first = false;
        }
        for (key, value) in &self.args {
            if !first {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        f.write_str(")")
    }
}

/// Parsed query text
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub calls: Vec<Call>,
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, call) in self.calls.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", call)?;
        }
        Ok(())
    }
}

// ============================================================================
// Compiled Operations
// ============================================================================

/// Expression producing a set of columns
#[derive(Debug, Clone, PartialEq)]
pub enum BitmapExpr {
    /// One row of one frame
    Bitmap { row: u64, frame: String },
    Union(Vec<BitmapExpr>),
    Intersect(Vec<BitmapExpr>),
    Difference(Vec<BitmapExpr>),
}

impl BitmapExpr {
    /// Frames read by this expression
    pub fn frames(&self) -> Vec<&str> {
        let mut frames = Vec::new();
        self.collect_frames(&mut frames);
        frames
    }

    fn collect_frames<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            BitmapExpr::Bitmap { frame, .. } => out.push(frame),
            BitmapExpr::Union(children)
            | BitmapExpr::Intersect(children)
            | BitmapExpr::Difference(children) => {
                for child in children {
                    child.collect_frames(out);
                }
            }
        }
    }

    /// Canonical call form
    pub fn to_call(&self) -> Call {
        let (name, children) = match self {
            BitmapExpr::Bitmap { row, frame } => {
                return Call::new("Bitmap")
                    .with_arg("id", Value::Uint(*row))
                    .with_arg("frame", Value::String(frame.clone()));
            }
            BitmapExpr::Union(c) => ("Union", c),
            BitmapExpr::Intersect(c) => ("Intersect", c),
            BitmapExpr::Difference(c) => ("Difference", c),
        };
        children
            .iter()
            .fold(Call::new(name), |call, child| call.with_child(child.to_call()))
    }
}

/// A typed, validated query operation
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    SetBit { row: u64, frame: String, column: u64 },
    ClearBit { row: u64, frame: String, column: u64 },
    SetBitmapAttrs { row: u64, frame: String, attrs: AttrUpdates },
    SetProfileAttrs { column: u64, attrs: AttrUpdates },
    /// Bitmap, Union, Intersect or Difference
    Bitmap(BitmapExpr),
    Count(BitmapExpr),
}

impl Operation {
    /// Whether the operation mutates state
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::SetBit { .. }
                | Operation::ClearBit { .. }
                | Operation::SetBitmapAttrs { .. }
                | Operation::SetProfileAttrs { .. }
        )
    }

    /// Frames the operation touches
    pub fn frames(&self) -> Vec<&str> {
        match self {
            Operation::SetBit { frame, .. }
            | Operation::ClearBit { frame, .. }
            | Operation::SetBitmapAttrs { frame, .. } => vec![frame.as_str()],
            Operation::SetProfileAttrs { .. } => Vec::new(),
            Operation::Bitmap(expr) | Operation::Count(expr) => expr.frames(),
        }
    }

    /// Canonical call form, addressing columns as `profileID`.
    /// Every database accepts this form whatever its column label.
    pub fn to_call(&self) -> Call {
        fn with_attrs(call: Call, attrs: &AttrUpdates) -> Call {
            attrs.iter().fold(call, |call, (k, v)| {
                let value = match v {
                    Some(crate::AttrValue::Integer(i)) if *i >= 0 => Value::Uint(*i as u64),
                    Some(crate::AttrValue::Integer(i)) => Value::Int(*i),
                    Some(crate::AttrValue::Float(f)) => Value::Float(*f),
                    Some(crate::AttrValue::Boolean(b)) => Value::Bool(*b),
                    Some(crate::AttrValue::String(s)) => Value::String(s.clone()),
                    None => Value::Null,
                };
                call.with_arg(k.clone(), value)
            })
        }

        match self {
            Operation::SetBit { row, frame, column }
            | Operation::ClearBit { row, frame, column } => {
                let name = if matches!(self, Operation::SetBit { .. }) {
                    "SetBit"
                } else {
                    "ClearBit"
                };
                Call::new(name)
                    .with_arg("id", Value::Uint(*row))
                    .with_arg("frame", Value::String(frame.clone()))
                    .with_arg(crate::config::DEFAULT_COLUMN_LABEL, Value::Uint(*column))
            }
            Operation::SetBitmapAttrs { row, frame, attrs } => with_attrs(
                Call::new("SetBitmapAttrs")
                    .with_arg("id", Value::Uint(*row))
                    .with_arg("frame", Value::String(frame.clone())),
                attrs,
            ),
            Operation::SetProfileAttrs { column, attrs } => with_attrs(
                Call::new("SetProfileAttrs")
                    .with_arg(crate::config::DEFAULT_COLUMN_LABEL, Value::Uint(*column)),
                attrs,
            ),
            Operation::Bitmap(expr) => expr.to_call(),
            Operation::Count(expr) => Call::new("Count").with_child(expr.to_call()),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_call())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Bitmap result: row attributes plus ascending column ids
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BitmapResult {
    pub attrs: AttrMap,
    pub bits: Vec<u64>,
}

/// Result of one top-level call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallResult {
    Bitmap(BitmapResult),
    Bool(bool),
    Count(u64),
    Null,
}

/// Query response body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<CallResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<Profile>,
}

/// Per-request execution options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOptions {
    /// Attach column attributes of every returned column
    pub profiles: bool,
    /// Request forwarded by another node; execute locally only
    pub remote: bool,
    /// Slices a remote bitmap request covers
    pub slices: Option<Vec<u64>>,
}

impl ExecOptions {
    /// Options for a request forwarded to another node
    pub fn remote(slices: Option<Vec<u64>>) -> Self {
        Self {
            profiles: false,
            remote: true,
            slices,
        }
    }
}
