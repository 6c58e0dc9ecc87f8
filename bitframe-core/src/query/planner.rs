//! Query planner - compiles parsed calls into typed operations

use super::{BitmapExpr, Call, Operation, Query, Value};
use crate::config::DEFAULT_COLUMN_LABEL;
use crate::storage::AttrUpdates;
use crate::{AttrValue, Error, Result};

/// Compiles [`Call`]s into [`Operation`]s
pub struct QueryPlanner;

impl QueryPlanner {
    /// Compile every call of a query; fails on the first invalid call
    pub fn plan(query: &Query, column_label: &str) -> Result<Vec<Operation>> {
        query
            .calls
            .iter()
            .map(|call| Self::compile(call, column_label))
            .collect()
    }

    /// Compile one top-level call
    pub fn compile(call: &Call, column_label: &str) -> Result<Operation> {
        match call.name.as_str() {
            "SetBit" | "ClearBit" => {
                no_children(call)?;
                let row = required_uint(call, "id")?;
                let frame = required_string(call, "frame")?;
                let (key, column) = column_arg(call, column_label, false)?;
                allow_only(call, &["id", "frame", key])?;

                Ok(if call.name == "SetBit" {
                    Operation::SetBit { row, frame, column }
                } else {
                    Operation::ClearBit { row, frame, column }
                })
            }
            "SetBitmapAttrs" => {
                no_children(call)?;
                let row = required_uint(call, "id")?;
                let frame = required_string(call, "frame")?;
                let attrs = attr_updates(call, &["id", "frame"])?;
                Ok(Operation::SetBitmapAttrs { row, frame, attrs })
            }
            "SetProfileAttrs" => {
                no_children(call)?;
                let (key, column) = column_arg(call, column_label, true)?;
                let attrs = attr_updates(call, &[key])?;
                Ok(Operation::SetProfileAttrs { column, attrs })
            }
            "Count" => {
                if call.children.len() != 1 || !call.args.is_empty() {
                    return Err(Error::Query("Count() takes exactly one bitmap call".into()));
                }
                Ok(Operation::Count(Self::compile_bitmap(&call.children[0])?))
            }
            "Bitmap" | "Union" | "Intersect" | "Difference" => {
                Ok(Operation::Bitmap(Self::compile_bitmap(call)?))
            }
            name => Err(Error::Query(format!("unknown call: {}", name))),
        }
    }

    fn compile_bitmap(call: &Call) -> Result<BitmapExpr> {
        match call.name.as_str() {
            "Bitmap" => {
                no_children(call)?;
                let row = required_uint(call, "id")?;
                let frame = required_string(call, "frame")?;
                allow_only(call, &["id", "frame"])?;
                Ok(BitmapExpr::Bitmap { row, frame })
            }
            "Union" | "Intersect" | "Difference" => {
                if !call.args.is_empty() {
                    return Err(Error::Query(format!(
                        "{}() takes bitmap calls only",
                        call.name
                    )));
                }
                if call.name != "Union" && call.children.is_empty() {
                    return Err(Error::Query(format!(
                        "{}() requires at least one bitmap call",
                        call.name
                    )));
                }
                let children = call
                    .children
                    .iter()
                    .map(Self::compile_bitmap)
                    .collect::<Result<Vec<_>>>()?;
                Ok(match call.name.as_str() {
                    "Union" => BitmapExpr::Union(children),
                    "Intersect" => BitmapExpr::Intersect(children),
                    _ => BitmapExpr::Difference(children),
                })
            }
            name => Err(Error::Query(format!("{}() does not produce a bitmap", name))),
        }
    }
}

fn no_children(call: &Call) -> Result<()> {
    if call.children.is_empty() {
        Ok(())
    } else {
        Err(Error::Query(format!("{}() does not take nested calls", call.name)))
    }
}

fn allow_only(call: &Call, keys: &[&str]) -> Result<()> {
    match call.args.keys().find(|k| !keys.contains(&k.as_str())) {
        Some(key) => Err(Error::Query(format!(
            "{}(): unexpected argument {:?}",
            call.name, key
        ))),
        None => Ok(()),
    }
}

fn uint(call: &Call, key: &str, value: &Value) -> Result<u64> {
    match value {
        Value::Uint(v) => Ok(*v),
        other => Err(Error::Query(format!(
            "{}(): {} must be an unsigned integer, got {}",
            call.name, key, other
        ))),
    }
}

fn required_uint(call: &Call, key: &str) -> Result<u64> {
    match call.args.get(key) {
        Some(value) => uint(call, key, value),
        None => Err(Error::Query(format!("{}(): {} required", call.name, key))),
    }
}

fn required_string(call: &Call, key: &str) -> Result<String> {
    match call.args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(Error::Query(format!(
            "{}(): {} must be a string, got {}",
            call.name, key, other
        ))),
        None => Err(Error::Query(format!("{}(): {} required", call.name, key))),
    }
}

/// The column id argument: `profileID`, the database's column label, and
/// `id` when `allow_id` is set. Exactly one of them must be present.
fn column_arg<'a>(call: &Call, label: &'a str, allow_id: bool) -> Result<(&'a str, u64)> {
    let mut candidates: Vec<&'a str> = Vec::with_capacity(3);
    if allow_id {
        candidates.push("id");
    }
    candidates.push(DEFAULT_COLUMN_LABEL);
    if label != DEFAULT_COLUMN_LABEL {
        candidates.push(label);
    }

    let present: Vec<&'a str> = candidates
        .into_iter()
        .filter(|k| call.args.contains_key(*k))
        .collect();

    match present.as_slice() {
        [key] => Ok((*key, uint(call, key, &call.args[*key])?)),
        [] => Err(Error::Query(format!(
            "{}(): {} required",
            call.name, label
        ))),
        _ => Err(Error::Query(format!(
            "{}(): column given more than once ({})",
            call.name,
            present.join(", ")
        ))),
    }
}

fn attr_updates(call: &Call, reserved: &[&str]) -> Result<AttrUpdates> {
    let mut attrs = AttrUpdates::new();
    for (key, value) in &call.args {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        let value = match value {
            Value::Uint(v) => Some(AttrValue::Integer(i64::try_from(*v).map_err(|_| {
                Error::Query(format!("{}(): {} is out of range", call.name, key))
            })?)),
            Value::Int(v) => Some(AttrValue::Integer(*v)),
            Value::Float(v) if v.is_finite() => Some(AttrValue::Float(*v)),
            Value::Float(_) => {
                return Err(Error::Query(format!(
                    "{}(): {} is not a finite number",
                    call.name, key
                )));
            }
            Value::Bool(v) => Some(AttrValue::Boolean(*v)),
            Value::String(v) => Some(AttrValue::String(v.clone())),
            Value::Null => None,
        };
        attrs.insert(key.clone(), value);
    }
    Ok(attrs)
}
