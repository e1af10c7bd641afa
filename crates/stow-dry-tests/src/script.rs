// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! A tiny line-oriented language standing in for notebook cells.
//!
//! Statements are separated by `;` or newlines:
//!
//! | statement          | effect                                              |
//! |--------------------|-----------------------------------------------------|
//! | `x = lit 1 2 3`    | fresh buffer                                        |
//! | `x = alias y`      | `x` shares `y`'s storage                            |
//! | `x = copy y`       | fresh buffer with `y`'s contents                    |
//! | `x = scale y K`    | fresh buffer, every element of `y` times `K`        |
//! | `x = sum y z`      | fresh one-element buffer, sum of all elements       |
//! | `x = open label`   | opaque handle (cannot be serialized)                |
//! | `push x K`         | append `K` in place; writes every alias of `x`      |
//! | `del x`            | remove `x`                                          |
use std::collections::{BTreeMap, BTreeSet};

use stow_checkpoint::{EnvError, ReplayEnv};
use stow_core::{GraphError, SessionState};
use thiserror::Error;

use crate::value::SharedValue;

/// Errors raised while running a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// The statement does not parse.
    #[error("cannot parse `{statement}`: {reason}")]
    Parse {
        /// Offending statement.
        statement: String,
        /// What is wrong with it.
        reason: String,
    },
    /// A statement read a name that is not bound.
    #[error("name `{0}` is not bound")]
    Unbound(String),
    /// A buffer operation was applied to a handle.
    #[error("`{0}` is an opaque handle")]
    Opaque(String),
    /// Recording the cell in the snapshot graph failed.
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Net effect of one cell on the namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effects {
    /// Names read before the cell wrote them.
    pub reads: BTreeSet<String>,
    /// Names bound when the cell finished and written by it.
    pub writes: BTreeSet<String>,
    /// Names that existed before the cell and are gone after it.
    pub deletes: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Statement {
    Lit(String, Vec<i64>),
    Alias(String, String),
    Copy(String, String),
    Scale(String, String, i64),
    Sum(String, String, String),
    Open(String, String),
    Push(String, i64),
    Del(String),
}

fn parse_int(statement: &str, token: &str) -> Result<i64, ScriptError> {
    token.parse().map_err(|_| ScriptError::Parse {
        statement: statement.to_string(),
        reason: format!("`{token}` is not an integer"),
    })
}

fn parse_statement(statement: &str) -> Result<Statement, ScriptError> {
    let tokens: Vec<&str> = statement.split_whitespace().collect();
    let bad = |reason: &str| ScriptError::Parse {
        statement: statement.to_string(),
        reason: reason.to_string(),
    };
    match tokens.as_slice() {
        ["push", x, k] => Ok(Statement::Push((*x).to_string(), parse_int(statement, k)?)),
        ["del", x] => Ok(Statement::Del((*x).to_string())),
        [x, "=", "lit", rest @ ..] => {
            let data = rest
                .iter()
                .map(|t| parse_int(statement, t))
                .collect::<Result<_, _>>()?;
            Ok(Statement::Lit((*x).to_string(), data))
        }
        [x, "=", "alias", y] => Ok(Statement::Alias((*x).to_string(), (*y).to_string())),
        [x, "=", "copy", y] => Ok(Statement::Copy((*x).to_string(), (*y).to_string())),
        [x, "=", "scale", y, k] => Ok(Statement::Scale(
            (*x).to_string(),
            (*y).to_string(),
            parse_int(statement, k)?,
        )),
        [x, "=", "sum", y, z] => Ok(Statement::Sum(
            (*x).to_string(),
            (*y).to_string(),
            (*z).to_string(),
        )),
        [x, "=", "open", label] => Ok(Statement::Open((*x).to_string(), (*label).to_string())),
        [_, "=", op, ..] => Err(bad(&format!("unknown operation `{op}`"))),
        _ => Err(bad("expected `name = op ...`, `push` or `del`")),
    }
}

fn parse(source: &str) -> Result<Vec<Statement>, ScriptError> {
    source
        .split([';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_statement)
        .collect()
}

fn note_read(touched: &BTreeSet<String>, fx: &mut Effects, name: &str) {
    if !touched.contains(name) {
        fx.reads.insert(name.to_string());
    }
}

/// In-memory interpreter holding the live namespace.
///
/// Serves as the live session at checkpoint time ([`SessionState`]) and as
/// the target of a restore ([`ReplayEnv`]).
///
/// # Example
///
/// ```
/// use stow_dry_tests::ScriptedEnv;
///
/// let mut env = ScriptedEnv::new();
/// let fx = env.run("a = lit 1 2; b = alias a; push b 3").unwrap();
/// assert!(fx.writes.contains("a"));
/// assert_eq!(env.value("a").unwrap().contents(), Some(vec![1, 2, 3]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedEnv {
    vars: BTreeMap<String, SharedValue>,
    next_region: u64,
    executed: Vec<String>,
}

impl ScriptedEnv {
    /// Empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value of `name`.
    pub fn value(&self, name: &str) -> Option<&SharedValue> {
        self.vars.get(name)
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.vars.keys().map(String::as_str).collect()
    }

    /// Every name and value, sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SharedValue)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sources executed so far, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Allocates a storage region no live value uses.
    pub fn fresh_region(&mut self) -> u64 {
        let region = self.next_region;
        self.next_region += 1;
        region
    }

    /// Binds a fresh buffer holding `data`.
    pub fn insert_buffer(&mut self, name: &str, data: Vec<i64>) {
        let region = self.fresh_region();
        self.vars
            .insert(name.to_string(), SharedValue::buffer(region, data));
    }

    fn get(&self, name: &str) -> Result<&SharedValue, ScriptError> {
        self.vars
            .get(name)
            .ok_or_else(|| ScriptError::Unbound(name.to_string()))
    }

    fn contents(&self, name: &str) -> Result<Vec<i64>, ScriptError> {
        self.get(name)?
            .contents()
            .ok_or_else(|| ScriptError::Opaque(name.to_string()))
    }

    /// Runs one cell and reports its net effect.
    ///
    /// Statements before a failing one have already taken effect.
    pub fn run(&mut self, source: &str) -> Result<Effects, ScriptError> {
        let statements = parse(source)?;
        let before: BTreeSet<String> = self.vars.keys().cloned().collect();
        let mut fx = Effects::default();
        let mut touched = BTreeSet::new();

        for statement in statements {
            let (target, value) = match statement {
                Statement::Lit(x, data) => {
                    let region = self.fresh_region();
                    (x, SharedValue::buffer(region, data))
                }
                Statement::Alias(x, y) => {
                    note_read(&touched, &mut fx, &y);
                    (x, self.get(&y)?.clone())
                }
                Statement::Copy(x, y) => {
                    note_read(&touched, &mut fx, &y);
                    let data = self.contents(&y)?;
                    let region = self.fresh_region();
                    (x, SharedValue::buffer(region, data))
                }
                Statement::Scale(x, y, k) => {
                    note_read(&touched, &mut fx, &y);
                    let data = self
                        .contents(&y)?
                        .into_iter()
                        .map(|v| v.saturating_mul(k))
                        .collect();
                    let region = self.fresh_region();
                    (x, SharedValue::buffer(region, data))
                }
                Statement::Sum(x, y, z) => {
                    note_read(&touched, &mut fx, &y);
                    note_read(&touched, &mut fx, &z);
                    let total = self
                        .contents(&y)?
                        .into_iter()
                        .chain(self.contents(&z)?)
                        .fold(0_i64, i64::saturating_add);
                    let region = self.fresh_region();
                    (x, SharedValue::buffer(region, vec![total]))
                }
                Statement::Open(x, label) => {
                    let region = self.fresh_region();
                    (x, SharedValue::handle(region, &label))
                }
                Statement::Push(x, k) => {
                    note_read(&touched, &mut fx, &x);
                    let target = self.get(&x)?.clone();
                    if !target.push(k) {
                        return Err(ScriptError::Opaque(x));
                    }
                    for (name, value) in &self.vars {
                        if value.shares_storage(&target) {
                            touched.insert(name.clone());
                            fx.writes.insert(name.clone());
                        }
                    }
                    continue;
                }
                Statement::Del(x) => {
                    self.get(&x)?;
                    self.vars.remove(&x);
                    fx.writes.remove(&x);
                    if before.contains(&x) {
                        fx.deletes.insert(x.clone());
                    }
                    touched.insert(x);
                    continue;
                }
            };
            fx.deletes.remove(&target);
            fx.writes.insert(target.clone());
            touched.insert(target.clone());
            self.vars.insert(target, value);
        }
        self.executed.push(source.to_string());
        Ok(fx)
    }
}

impl SessionState for ScriptedEnv {
    type Value = SharedValue;

    fn get_variable_value(&self, name: &str) -> Option<&SharedValue> {
        self.vars.get(name)
    }
}

impl ReplayEnv for ScriptedEnv {
    type Value = SharedValue;

    fn bind(&mut self, name: &str, value: SharedValue) {
        self.next_region = self.next_region.max(value.region().saturating_add(1));
        self.vars.insert(name.to_string(), value);
    }

    fn execute(&mut self, source: &str) -> Result<(), EnvError> {
        self.run(source).map(|_| ()).map_err(Into::into)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn reads_exclude_names_written_earlier_in_the_cell() {
        let mut env = ScriptedEnv::new();
        env.run("a = lit 1").unwrap();
        let fx = env.run("b = copy a; c = scale b 2").unwrap();
        assert_eq!(fx.reads, set(&["a"]));
        assert_eq!(fx.writes, set(&["b", "c"]));
        assert_eq!(env.value("c").unwrap().contents(), Some(vec![2]));
    }

    #[test]
    fn push_writes_every_alias() {
        let mut env = ScriptedEnv::new();
        env.run("a = lit 1; b = alias a; c = copy a").unwrap();
        let fx = env.run("push b 2").unwrap();
        assert_eq!(fx.reads, set(&["b"]));
        assert_eq!(fx.writes, set(&["a", "b"]));
        assert_eq!(env.value("a").unwrap().contents(), Some(vec![1, 2]));
        assert_eq!(env.value("c").unwrap().contents(), Some(vec![1]));
    }

    #[test]
    fn deletes_are_net_of_the_cell() {
        let mut env = ScriptedEnv::new();
        env.run("a = lit 1; b = lit 2").unwrap();
        let fx = env.run("t = lit 0; del t; del a; b = lit 3; del b; b = lit 4").unwrap();
        assert_eq!(fx.deletes, set(&["a"]));
        assert_eq!(fx.writes, set(&["b"]));
        assert_eq!(env.names(), vec!["b"]);
    }

    #[test]
    fn errors() {
        let mut env = ScriptedEnv::new();
        assert!(matches!(env.run("x = frob y"), Err(ScriptError::Parse { .. })));
        assert!(matches!(env.run("x = lit one"), Err(ScriptError::Parse { .. })));
        assert_eq!(env.run("x = copy nope"), Err(ScriptError::Unbound("nope".into())));
        env.run("h = open socket").unwrap();
        assert_eq!(env.run("push h 1"), Err(ScriptError::Opaque("h".into())));
        assert_eq!(env.run("c = copy h"), Err(ScriptError::Opaque("h".into())));
        assert_eq!(env.executed().len(), 1);
    }

    #[test]
    fn bind_keeps_fresh_regions_disjoint() {
        let mut env = ScriptedEnv::new();
        env.bind("a", SharedValue::buffer(41, vec![1]));
        env.run("b = copy a").unwrap();
        assert_eq!(env.value("b").unwrap().region(), 42);
        env.execute("c = sum a b").unwrap();
        assert_eq!(env.value("c").unwrap().contents(), Some(vec![2]));
        assert!(env.execute("push nope 1").is_err());
    }
}
