//! Path queries over converted cell values
//!
//! A query is a chain of operators applied breadth-first:
//!
//! - `.name` reads an object member
//! - `[N]` reads an array element
//! - `[*]` expands every array element
//! - `[.]` expands every key of an object
//!
//! Any operator may be suffixed with `?`, which turns a failed access into "no
//! result" instead of an error. After the last operator every result must be a
//! string or a number.

use std::fmt;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Member(String),
    Index(usize),
    Each,
    Keys,
}

#[derive(Debug, Clone, PartialEq)]
struct Op {
    step: Step,
    optional: bool,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.step {
            Step::Member(name) => write!(f, ".{}", name)?,
            Step::Index(i) => write!(f, "[{}]", i)?,
            Step::Each => write!(f, "[*]")?,
            Step::Keys => write!(f, "[.]")?,
        }
        if self.optional {
            write!(f, "?")?;
        }
        Ok(())
    }
}

/// A query failure with the value that could not be navigated
#[derive(Debug, Clone, PartialEq)]
pub struct QueryError {
    pub message: String,
    pub value: String,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at {})", self.message, self.value)
    }
}

/// Compiled path query
#[derive(Debug, Clone, PartialEq)]
pub struct PathQuery {
    ops: Vec<Op>,
}

impl PathQuery {
    /// Parse a query. An optional leading `$` is accepted.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        let text = text.strip_prefix('$').unwrap_or(text);
        let chars: Vec<char> = text.chars().collect();
        let mut ops = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            let step = match chars[i] {
                '.' => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && !matches!(chars[end], '.' | '[' | '?') {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    if name.trim().is_empty() {
                        return Err(format!("empty member name at offset {} in '{}'", i, text));
                    }
                    i = end;
                    Step::Member(name.trim().to_string())
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|c| *c == ']')
                        .map(|p| p + i)
                        .ok_or_else(|| format!("unclosed '[' in '{}'", text))?;
                    let inner: String = chars[i + 1..close].iter().collect();
                    i = close + 1;
                    match inner.trim() {
                        "*" => Step::Each,
                        "." => Step::Keys,
                        n => Step::Index(
                            n.parse()
                                .map_err(|_| format!("invalid index '[{}]' in '{}'", inner, text))?,
                        ),
                    }
                }
                other => return Err(format!("unexpected '{}' in query '{}'", other, text)),
            };
            let optional = chars.get(i) == Some(&'?');
            if optional {
                i += 1;
            }
            ops.push(Op { step, optional });
        }

        Ok(Self { ops })
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Run the query against a value. Each operator consumes only the results the
    /// previous operator produced.
    pub fn evaluate(&self, root: &Value) -> Result<Vec<Value>, QueryError> {
        let mut results: Vec<Value> = vec![root.unwrapped().clone()];
        let mut frontier = 0..1;

        for op in &self.ops {
            let start = results.len();
            for idx in frontier.clone() {
                let current = results[idx].clone();
                apply(op, &current, &mut results)?;
            }
            frontier = start..results.len();
        }

        let leaves: Vec<Value> = results.drain(frontier).collect();
        if let Some(bad) = leaves.iter().find(|v| !v.is_leaf()) {
            return Err(QueryError {
                message: "query result is not a string or number".to_string(),
                value: bad.to_string(),
            });
        }
        Ok(leaves)
    }
}

impl fmt::Display for PathQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for op in &self.ops {
            write!(f, "{}", op)?;
        }
        Ok(())
    }
}

fn apply(op: &Op, current: &Value, out: &mut Vec<Value>) -> Result<(), QueryError> {
    let fail = |message: String| -> Result<(), QueryError> {
        if op.optional {
            Ok(())
        } else {
            Err(QueryError {
                message,
                value: current.to_string(),
            })
        }
    };

    match (&op.step, current.unwrapped()) {
        (Step::Member(name), Value::Object(obj)) => match obj.get(name) {
            Some(v) => out.push(v.unwrapped().clone()),
            None => return fail(format!("missing member '{}'", name)),
        },
        (Step::Index(i), Value::Array(arr)) => match arr.items.get(*i) {
            Some(v) => out.push(v.unwrapped().clone()),
            None => return fail(format!("index {} out of range", i)),
        },
        (Step::Each, Value::Array(arr)) => out.extend(arr.items.iter().map(|v| v.unwrapped().clone())),
        (Step::Keys, Value::Object(obj)) => out.extend(obj.members.keys().cloned().map(Value::String)),
        (_, other) => return fail(format!("cannot apply '{}' to {}", op, other.kind())),
    }
    Ok(())
}
