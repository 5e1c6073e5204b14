// Tolerant evaluation environment
// Every resolution step classifies three ways: resolved value, absorbing
// sentinel, or fatal fault. Missing data always takes the sentinel path;
// only grammar violations, unknown filter/test names, and faults on
// concrete literals are errors.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};

use crate::ast::{BinaryOp, Expr, Node, UnaryOp};
use crate::filters::{is_known_test, FilterTable};
use crate::normalize;
use crate::parser::{self, ParseError};
use crate::value::TValue;

/// Cap on expression-tree depth during evaluation. The parser bounds its
/// own nesting, so tripping this means a hand-built tree.
const MAX_EVAL_DEPTH: usize = 300;

/// Evaluation errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("No filter named '{0}'")]
    UnknownFilter(String),

    #[error("No test named '{0}'")]
    UnknownTest(String),

    #[error("Unsupported operand types for {op}: '{lhs}' and '{rhs}'")]
    UnsupportedOperands {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("Unsupported operand type for unary {op}: '{ty}'")]
    UnsupportedUnary { op: &'static str, ty: &'static str },

    #[error("'{0}' object is not callable")]
    NotCallable(&'static str),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Maximum evaluation depth exceeded")]
    RecursionLimit,
}

/// One validation attempt's environment: the filter table for this attempt
/// plus the names bound by `set` and `for` during the walk. The data
/// context is always empty, so every unbound name resolves to a fresh
/// sentinel, which is what lets structurally sound documents validate with
/// zero supplied data.
pub struct Environment {
    filters: FilterTable,
    scope: HashMap<String, TValue>,
}

impl Environment {
    pub fn new() -> Self {
        Environment::with_filters(FilterTable::with_registered())
    }

    pub fn with_filters(filters: FilterTable) -> Self {
        Environment {
            filters,
            scope: HashMap::new(),
        }
    }

    /// Validate one document: normalize expression regions, parse, then
    /// walk every node. Walking covers all branches of every statement:
    /// the renderer resolves filters at compile time across all branches,
    /// and validation has to see exactly what the renderer would.
    pub fn validate_source(&mut self, source: &str) -> Result<(), RenderError> {
        debug!(filters = self.filters.len(), "starting validation attempt");
        let normalized = normalize::normalize_source(source);
        let nodes = parser::parse(&normalized)?;
        self.walk_nodes(&nodes)
    }

    fn walk_nodes(&mut self, nodes: &[Node]) -> Result<(), RenderError> {
        for node in nodes {
            self.walk_node(node)?;
        }
        Ok(())
    }

    fn walk_node(&mut self, node: &Node) -> Result<(), RenderError> {
        match node {
            Node::Text(_) => Ok(()),
            Node::Output(expr) => {
                self.eval(expr, 0)?;
                Ok(())
            }
            Node::If { arms, else_body } => {
                for arm in arms {
                    self.eval(&arm.condition, 0)?;
                    self.walk_nodes(&arm.body)?;
                }
                self.walk_nodes(else_body)
            }
            Node::For {
                targets,
                iterable,
                body,
                else_body,
            } => {
                self.eval(iterable, 0)?;

                // Body walked once with loop targets bound to named
                // sentinels; shadowed bindings are restored afterwards
                let mut saved = Vec::with_capacity(targets.len() + 1);
                for target in targets {
                    let sentinel = TValue::undefined_name(target.clone());
                    saved.push((target.clone(), self.scope.insert(target.clone(), sentinel)));
                }
                saved.push((
                    "loop".to_string(),
                    self.scope
                        .insert("loop".to_string(), TValue::undefined_name("loop")),
                ));

                self.walk_nodes(body)?;
                self.walk_nodes(else_body)?;

                for (name, previous) in saved.into_iter().rev() {
                    match previous {
                        Some(value) => {
                            self.scope.insert(name, value);
                        }
                        None => {
                            self.scope.remove(&name);
                        }
                    }
                }
                Ok(())
            }
            Node::Set { name, value } => {
                let value = self.eval(value, 0)?;
                self.scope.insert(name.clone(), value);
                Ok(())
            }
            Node::SetBlock { name, body } => {
                self.walk_nodes(body)?;
                self.scope.insert(name.clone(), TValue::string(""));
                Ok(())
            }
            Node::FilterBlock {
                name,
                args,
                kwargs,
                body,
            } => {
                let filter = self
                    .filters
                    .get(name)
                    .ok_or_else(|| RenderError::UnknownFilter(name.clone()))?;
                let args = self.eval_all(args)?;
                let kwargs = self.eval_kwargs(kwargs)?;
                self.walk_nodes(body)?;
                filter(TValue::string(""), &args, &kwargs);
                Ok(())
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<TValue>, RenderError> {
        exprs.iter().map(|expr| self.eval(expr, 0)).collect()
    }

    fn eval_kwargs(
        &mut self,
        kwargs: &[(String, Expr)],
    ) -> Result<Vec<(String, TValue)>, RenderError> {
        kwargs
            .iter()
            .map(|(name, expr)| Ok((name.clone(), self.eval(expr, 0)?)))
            .collect()
    }

    /// Evaluate one expression against the (empty) data context.
    fn eval(&mut self, expr: &Expr, depth: usize) -> Result<TValue, RenderError> {
        if depth > MAX_EVAL_DEPTH {
            return Err(RenderError::RecursionLimit);
        }
        let depth = depth + 1;

        match expr {
            Expr::String(s) => Ok(TValue::string(s.as_str())),
            Expr::Number(n) => Ok(TValue::Number(*n)),
            Expr::Bool(b) => Ok(TValue::Bool(*b)),
            Expr::None => Ok(TValue::None),
            Expr::Name(name) => Ok(self.lookup_name(name)),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, depth)?);
                }
                Ok(TValue::list(values))
            }
            Expr::Dict(pairs) => {
                let mut map = indexmap::IndexMap::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = self.eval(key, depth)?;
                    let value = self.eval(value, depth)?;
                    map.insert(key.to_string(), value);
                }
                Ok(TValue::dict(map))
            }
            Expr::Attr { base, attr } => {
                let base = self.eval(base, depth)?;
                Ok(self.get_attr(&base, attr))
            }
            Expr::Index { base, index } => {
                let base = self.eval(base, depth)?;
                let index = self.eval(index, depth)?;
                Ok(self.get_item(&base, &index))
            }
            Expr::Call {
                callee,
                args,
                kwargs,
            } => {
                let callee = self.eval(callee, depth)?;
                for arg in args {
                    self.eval(arg, depth)?;
                }
                for (_, value) in kwargs {
                    self.eval(value, depth)?;
                }
                // The sentinel absorbs calls; nothing concrete is callable
                // in this model
                if callee.is_undefined() {
                    Ok(callee)
                } else {
                    Err(RenderError::NotCallable(callee.type_name()))
                }
            }
            Expr::Filter {
                value,
                name,
                args,
                kwargs,
            } => {
                let value = self.eval(value, depth)?;
                let filter = self
                    .filters
                    .get(name)
                    .ok_or_else(|| RenderError::UnknownFilter(name.clone()))?;
                let args = self.eval_all(args)?;
                let kwargs = self.eval_kwargs(kwargs)?;
                Ok(filter(value, &args, &kwargs))
            }
            Expr::Test {
                value,
                name,
                negated,
                args,
            } => {
                let value = self.eval(value, depth)?;
                let args = self.eval_all(args)?;
                if !is_known_test(name) {
                    return Err(RenderError::UnknownTest(name.clone()));
                }
                let outcome = self.apply_test(name, &value, &args);
                Ok(TValue::Bool(if *negated { !outcome } else { outcome }))
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, depth)?;
                match op {
                    UnaryOp::Not => Ok(TValue::Bool(!operand.is_truthy())),
                    UnaryOp::Negate => {
                        if operand.is_undefined() {
                            return Ok(operand);
                        }
                        match operand.as_f64() {
                            Some(n) => Ok(TValue::Number(-n)),
                            None => Err(RenderError::UnsupportedUnary {
                                op: "-",
                                ty: operand.type_name(),
                            }),
                        }
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let lhs = self.eval(lhs, depth)?;
                let rhs = self.eval(rhs, depth)?;
                self.eval_binary(*op, lhs, rhs)
            }
            Expr::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.eval(condition, depth)?;
                let then_value = self.eval(then_branch, depth)?;
                let else_value = match else_branch {
                    Some(expr) => self.eval(expr, depth)?,
                    None => TValue::None,
                };
                Ok(if condition.is_truthy() {
                    then_value
                } else {
                    else_value
                })
            }
        }
    }

    /// Name resolution against the scope. A miss is normal, since the data
    /// context is empty, and produces a fresh named sentinel.
    fn lookup_name(&self, name: &str) -> TValue {
        match self.scope.get(name) {
            Some(value) => value.clone(),
            None => {
                trace!(name, "unresolved name");
                TValue::undefined_name(name)
            }
        }
    }

    /// Attribute resolution. The sentinel propagates itself; a missing key
    /// on a resolved value becomes an access-tagged sentinel, never an
    /// error.
    fn get_attr(&self, base: &TValue, attr: &str) -> TValue {
        match base {
            TValue::Undefined(_) => base.clone(),
            TValue::Dict(map) => match map.get(attr) {
                Some(value) => value.clone(),
                None => TValue::undefined_access("dict", attr),
            },
            other => TValue::undefined_access(other.type_name(), attr),
        }
    }

    /// Subscript resolution, same policy as `get_attr`. List indices count
    /// from the end when negative.
    fn get_item(&self, base: &TValue, index: &TValue) -> TValue {
        match base {
            TValue::Undefined(_) => base.clone(),
            TValue::Dict(map) => match index.as_str().and_then(|key| map.get(key)) {
                Some(value) => value.clone(),
                None => TValue::undefined_access("dict", index.to_string()),
            },
            TValue::List(items) => {
                let looked_up = index.as_i64().and_then(|i| {
                    let i = if i < 0 { i + items.len() as i64 } else { i };
                    usize::try_from(i).ok().and_then(|i| items.get(i))
                });
                match looked_up {
                    Some(value) => value.clone(),
                    None => TValue::undefined_access("list", index.to_string()),
                }
            }
            TValue::String(s) => {
                let looked_up = index.as_i64().and_then(|i| {
                    let i = if i < 0 {
                        i + s.chars().count() as i64
                    } else {
                        i
                    };
                    usize::try_from(i).ok().and_then(|i| s.chars().nth(i))
                });
                match looked_up {
                    Some(ch) => TValue::string(ch.to_string()),
                    None => TValue::undefined_access("string", index.to_string()),
                }
            }
            other => TValue::undefined_access(other.type_name(), index.to_string()),
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        lhs: TValue,
        rhs: TValue,
    ) -> Result<TValue, RenderError> {
        match op {
            BinaryOp::And => Ok(if lhs.is_truthy() { rhs } else { lhs }),
            BinaryOp::Or => Ok(if lhs.is_truthy() { lhs } else { rhs }),
            BinaryOp::Equal => Ok(TValue::Bool(lhs == rhs)),
            BinaryOp::NotEqual => Ok(TValue::Bool(lhs != rhs)),
            BinaryOp::LessThan
            | BinaryOp::LessThanOrEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanOrEqual => self.compare(op, &lhs, &rhs),
            BinaryOp::In => Ok(TValue::Bool(contains(&rhs, &lhs))),
            BinaryOp::NotIn => Ok(TValue::Bool(!contains(&rhs, &lhs))),
            BinaryOp::Concat => Ok(TValue::string(format!("{}{}", lhs, rhs))),
            BinaryOp::Add
            | BinaryOp::Subtract
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::FloorDivide
            | BinaryOp::Modulo
            | BinaryOp::Power => self.arithmetic(op, lhs, rhs),
        }
    }

    /// Ordering comparison. When either side is the sentinel, `<`-family
    /// comparisons yield true and `>`-family false. The asymmetry is the
    /// contract: date and number comparisons over missing data degrade to
    /// a fixed answer instead of failing.
    fn compare(&self, op: BinaryOp, lhs: &TValue, rhs: &TValue) -> Result<TValue, RenderError> {
        if lhs.is_undefined() || rhs.is_undefined() {
            return Ok(TValue::Bool(matches!(
                op,
                BinaryOp::LessThan | BinaryOp::LessThanOrEqual
            )));
        }

        let ordering = match (lhs, rhs) {
            (TValue::Number(a), TValue::Number(b)) => a.partial_cmp(b),
            (TValue::String(a), TValue::String(b)) => Some(a.cmp(b)),
            (TValue::Bool(a), TValue::Bool(b)) => Some(a.cmp(b)),
            _ => {
                return Err(RenderError::UnsupportedOperands {
                    op: op_symbol(op),
                    lhs: lhs.type_name(),
                    rhs: rhs.type_name(),
                })
            }
        };

        let outcome = match ordering {
            Some(ordering) => match op {
                BinaryOp::LessThan => ordering.is_lt(),
                BinaryOp::LessThanOrEqual => ordering.is_le(),
                BinaryOp::GreaterThan => ordering.is_gt(),
                BinaryOp::GreaterThanOrEqual => ordering.is_ge(),
                _ => unreachable!("compare called with non-ordering operator"),
            },
            // NaN compares false against everything
            None => false,
        };
        Ok(TValue::Bool(outcome))
    }

    /// Arithmetic. Sentinels propagate through every operator; faults on
    /// concrete operands (mixed types, zero divisors) are fatal because
    /// the renderer would raise them no matter what data is supplied.
    fn arithmetic(&self, op: BinaryOp, lhs: TValue, rhs: TValue) -> Result<TValue, RenderError> {
        if lhs.is_undefined() {
            return Ok(lhs);
        }
        if rhs.is_undefined() {
            return Ok(rhs);
        }

        let unsupported = || RenderError::UnsupportedOperands {
            op: op_symbol(op),
            lhs: lhs.type_name(),
            rhs: rhs.type_name(),
        };

        match op {
            BinaryOp::Add => match (&lhs, &rhs) {
                (TValue::Number(a), TValue::Number(b)) => Ok(TValue::Number(a + b)),
                (TValue::String(a), TValue::String(b)) => {
                    Ok(TValue::string(format!("{}{}", a, b)))
                }
                (TValue::List(a), TValue::List(b)) => {
                    let mut items = a.as_ref().clone();
                    items.extend(b.iter().cloned());
                    Ok(TValue::list(items))
                }
                _ => Err(unsupported()),
            },
            BinaryOp::Subtract => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => Ok(TValue::Number(a - b)),
                _ => Err(unsupported()),
            },
            BinaryOp::Multiply => match (&lhs, &rhs) {
                (TValue::Number(a), TValue::Number(b)) => Ok(TValue::Number(a * b)),
                (TValue::String(s), TValue::Number(_)) => match rhs.as_i64() {
                    Some(n) => Ok(TValue::string(s.repeat(n.max(0) as usize))),
                    None => Err(unsupported()),
                },
                (TValue::List(items), TValue::Number(_)) => match rhs.as_i64() {
                    Some(n) => {
                        let mut repeated = Vec::new();
                        for _ in 0..n.max(0) {
                            repeated.extend(items.iter().cloned());
                        }
                        Ok(TValue::list(repeated))
                    }
                    None => Err(unsupported()),
                },
                _ => Err(unsupported()),
            },
            BinaryOp::Divide => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(_), Some(b)) if b == 0.0 => Err(RenderError::DivisionByZero),
                (Some(a), Some(b)) => Ok(TValue::Number(a / b)),
                _ => Err(unsupported()),
            },
            BinaryOp::FloorDivide => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(_), Some(b)) if b == 0.0 => Err(RenderError::DivisionByZero),
                (Some(a), Some(b)) => Ok(TValue::Number((a / b).floor())),
                _ => Err(unsupported()),
            },
            BinaryOp::Modulo => match (&lhs, &rhs) {
                // Printf-style string formatting validates as a no-op
                (TValue::String(_), _) => Ok(lhs.clone()),
                _ => match (lhs.as_f64(), rhs.as_f64()) {
                    (Some(_), Some(b)) if b == 0.0 => Err(RenderError::DivisionByZero),
                    (Some(a), Some(b)) => Ok(TValue::Number(a - b * (a / b).floor())),
                    _ => Err(unsupported()),
                },
            },
            BinaryOp::Power => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => Ok(TValue::Number(a.powf(b))),
                _ => Err(unsupported()),
            },
            _ => unreachable!("arithmetic called with non-arithmetic operator"),
        }
    }

    /// Apply a recognized test. Outcomes only steer conditional-expression
    /// selection during the walk, so best-effort answers are fine; the
    /// fatal case (an unrecognized name) is handled by the caller.
    fn apply_test(&self, name: &str, value: &TValue, args: &[TValue]) -> bool {
        match name {
            "defined" => !value.is_undefined(),
            "undefined" => value.is_undefined(),
            "none" => value.is_none(),
            "boolean" => value.is_bool(),
            "true" => value.as_bool() == Some(true),
            "false" => value.as_bool() == Some(false),
            "number" | "float" => value.is_number(),
            "integer" => value.as_i64().is_some(),
            "string" | "lower" | "upper" => value.is_string(),
            "mapping" => value.is_dict(),
            "sequence" | "iterable" => {
                value.is_list() || value.is_string() || value.is_dict()
            }
            "odd" => value.as_i64().map_or(false, |n| n % 2 != 0),
            "even" => value.as_i64().map_or(false, |n| n % 2 == 0),
            "divisibleby" => match (value.as_i64(), args.first().and_then(TValue::as_i64)) {
                (Some(n), Some(d)) if d != 0 => n % d == 0,
                _ => false,
            },
            "sameas" | "eq" => args.first().map_or(false, |arg| value == arg),
            "ne" => args.first().map_or(false, |arg| value != arg),
            "lt" | "le" | "gt" | "ge" => {
                let ordering = match (value.as_f64(), args.first().and_then(TValue::as_f64)) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => Option::None,
                };
                ordering.map_or(false, |ordering| match name {
                    "lt" => ordering.is_lt(),
                    "le" => ordering.is_le(),
                    "gt" => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
            "in" => args.first().map_or(false, |container| contains(container, value)),
            "filter" => value
                .as_str()
                .map_or(false, |name| self.filters.contains(name)),
            "callable" | "escaped" | "test" => false,
            _ => false,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// Membership under template semantics. Sentinels on either side make the
/// answer false rather than an error.
fn contains(container: &TValue, item: &TValue) -> bool {
    match container {
        TValue::List(items) => items.iter().any(|candidate| candidate == item),
        TValue::String(s) => item.as_str().map_or(false, |sub| s.contains(sub)),
        TValue::Dict(map) => item.as_str().map_or(false, |key| map.contains_key(key)),
        _ => false,
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::FloorDivide => "//",
        BinaryOp::Modulo => "%",
        BinaryOp::Power => "**",
        BinaryOp::LessThan => "<",
        BinaryOp::LessThanOrEqual => "<=",
        BinaryOp::GreaterThan => ">",
        BinaryOp::GreaterThanOrEqual => ">=",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::In => "in",
        BinaryOp::NotIn => "not in",
        BinaryOp::Concat => "~",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn env() -> Environment {
        Environment::new()
    }

    #[test]
    fn test_missing_data_is_tolerated() {
        assert!(env().validate_source("{{ person.name.full }}").is_ok());
        assert!(env().validate_source("{{ a.b[0].c('x', k=1) }}").is_ok());
        assert!(env()
            .validate_source("{% if client.age > 18 %}adult{% endif %}")
            .is_ok());
    }

    #[test]
    fn test_unknown_filter_is_reported() {
        assert_matches!(
            env().validate_source("{{ x | zazzle }}"),
            Err(RenderError::UnknownFilter(name)) if name == "zazzle"
        );
    }

    #[test]
    fn test_unknown_filter_in_untaken_branch() {
        // All branches are walked; the false condition does not hide the
        // filter reference
        assert_matches!(
            env().validate_source("{% if false %}{{ x | zazzle }}{% endif %}"),
            Err(RenderError::UnknownFilter(name)) if name == "zazzle"
        );
    }

    #[test]
    fn test_unknown_filter_in_for_body() {
        assert_matches!(
            env().validate_source("{% for item in items %}{{ item | zazzle }}{% endfor %}"),
            Err(RenderError::UnknownFilter(name)) if name == "zazzle"
        );
    }

    #[test]
    fn test_unknown_filter_in_filter_block() {
        assert_matches!(
            env().validate_source("{% filter zazzle %}text{% endfilter %}"),
            Err(RenderError::UnknownFilter(name)) if name == "zazzle"
        );
    }

    #[test]
    fn test_unknown_test_is_fatal() {
        assert_matches!(
            env().validate_source("{% if x is zezzle %}a{% endif %}"),
            Err(RenderError::UnknownTest(name)) if name == "zezzle"
        );
    }

    #[test]
    fn test_grammar_error_is_fatal() {
        assert_matches!(
            env().validate_source("{{ if this is broken }}"),
            Err(RenderError::Parse(_))
        );
    }

    #[test]
    fn test_curly_quotes_normalized_before_parse() {
        let source = "{{ person.name.full(\u{201c}x\u{201d}) | title_case }}";
        assert!(env().validate_source(source).is_ok());
    }

    #[test]
    fn test_set_binds_names() {
        assert!(env()
            .validate_source("{% set greeting = 'hi' %}{{ greeting | upper }}")
            .is_ok());
    }

    #[test]
    fn test_for_targets_bound_and_restored() {
        let mut environment = env();
        assert!(environment
            .validate_source("{% for a, b in rows %}{{ a }}{{ b }}{{ loop.index }}{% endfor %}")
            .is_ok());
        // Loop bindings do not leak past the loop
        assert!(environment.scope.is_empty());
    }

    #[test]
    fn test_literal_type_clash_is_fatal() {
        assert_matches!(
            env().validate_source("{{ (1 + 'a') | int }}"),
            Err(RenderError::UnsupportedOperands { op: "+", .. })
        );
        assert_matches!(
            env().validate_source("{% if 1 < 'a' %}x{% endif %}"),
            Err(RenderError::UnsupportedOperands { op: "<", .. })
        );
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        assert_matches!(
            env().validate_source("{{ (1 / 0) | int }}"),
            Err(RenderError::DivisionByZero)
        );
        assert_matches!(
            env().validate_source("{{ (1 % 0) | int }}"),
            Err(RenderError::DivisionByZero)
        );
    }

    #[test]
    fn test_calling_literal_is_fatal() {
        assert_matches!(
            env().validate_source("{{ 'a'() | int }}"),
            Err(RenderError::NotCallable("string"))
        );
    }

    #[test]
    fn test_sentinel_comparison_asymmetry() {
        let environment = env();
        let missing = TValue::undefined_name("missing");
        let three = TValue::Number(3.0);

        let lt = environment
            .eval_binary(BinaryOp::LessThan, missing.clone(), three.clone())
            .unwrap();
        assert_eq!(lt, TValue::Bool(true));

        let gt = environment
            .eval_binary(BinaryOp::GreaterThan, missing.clone(), three.clone())
            .unwrap();
        assert_eq!(gt, TValue::Bool(false));

        // Same answers with the sentinel on the right
        let lt = environment
            .eval_binary(BinaryOp::LessThan, three.clone(), missing.clone())
            .unwrap();
        assert_eq!(lt, TValue::Bool(true));

        let le = environment
            .eval_binary(BinaryOp::LessThanOrEqual, missing.clone(), three.clone())
            .unwrap();
        assert_eq!(le, TValue::Bool(true));

        let ge = environment
            .eval_binary(BinaryOp::GreaterThanOrEqual, missing, three)
            .unwrap();
        assert_eq!(ge, TValue::Bool(false));
    }

    #[test]
    fn test_sentinel_absorbs_arithmetic() {
        let environment = env();
        let missing = TValue::undefined_name("missing");

        for op in [
            BinaryOp::Add,
            BinaryOp::Subtract,
            BinaryOp::Multiply,
            BinaryOp::Divide,
            BinaryOp::Power,
        ] {
            let result = environment
                .eval_binary(op, missing.clone(), TValue::Number(1.0))
                .unwrap();
            assert!(result.is_undefined(), "{:?} should absorb", op);
        }
    }

    #[test]
    fn test_sentinel_membership_is_false() {
        let environment = env();
        let missing = TValue::undefined_name("missing");
        let result = environment
            .eval_binary(BinaryOp::In, TValue::Number(1.0), missing)
            .unwrap();
        assert_eq!(result, TValue::Bool(false));
    }

    #[test]
    fn test_concat_renders_sentinel_placeholder() {
        let environment = env();
        let missing = TValue::undefined_name("missing");
        let result = environment
            .eval_binary(BinaryOp::Concat, TValue::string("x"), missing)
            .unwrap();
        assert_eq!(result.as_str(), Some("x{{ missing }}"));
    }

    #[test]
    fn test_concrete_arithmetic() {
        let environment = env();
        let sum = environment
            .eval_binary(BinaryOp::Add, TValue::Number(2.0), TValue::Number(3.0))
            .unwrap();
        assert_eq!(sum, TValue::Number(5.0));

        let joined = environment
            .eval_binary(BinaryOp::Add, TValue::string("a"), TValue::string("b"))
            .unwrap();
        assert_eq!(joined.as_str(), Some("ab"));

        let floored = environment
            .eval_binary(BinaryOp::FloorDivide, TValue::Number(7.0), TValue::Number(2.0))
            .unwrap();
        assert_eq!(floored, TValue::Number(3.0));
    }

    #[test]
    fn test_attr_access_on_concrete_value_yields_sentinel() {
        let mut environment = env();
        let value = environment
            .eval(
                &crate::ast::Expr::Attr {
                    base: Box::new(crate::ast::Expr::Number(1.0)),
                    attr: "x".to_string(),
                },
                0,
            )
            .unwrap();
        assert!(value.is_undefined());
        assert_eq!(value.to_string(), "{{ no such element: number['x'] }}");
    }

    #[test]
    fn test_negative_list_index() {
        let environment = env();
        let list = TValue::list(vec![TValue::from(1i64), TValue::from(2i64)]);
        let value = environment.get_item(&list, &TValue::from(-1i64));
        assert_eq!(value, TValue::from(2i64));
    }

    #[test]
    fn test_tests_evaluate() {
        assert!(env()
            .validate_source("{% if x is defined and x is not none %}a{% endif %}")
            .is_ok());
        assert!(env()
            .validate_source("{% if n is divisibleby 3 %}a{% endif %}")
            .is_ok());
    }

    #[test]
    fn test_eval_depth_bounded() {
        // Hand-built tree deeper than any the parser will produce
        let mut expr = Expr::Number(1.0);
        for _ in 0..400 {
            expr = Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(expr),
            };
        }
        let mut environment = env();
        assert_matches!(
            environment.eval(&expr, 0),
            Err(RenderError::RecursionLimit)
        );
    }
}
