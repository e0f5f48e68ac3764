//! Async tree-walking evaluator.
//!
//! The evaluator owns a fresh variable namespace per run and a mutable borrow
//! of the [`TacticalController`], reachable only through the `step` builtin.
//! Every executed statement and loop iteration counts against the operation
//! budget; cancellation is checked at the same points.

use std::collections::HashMap;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use handeye_types::{ErrorKind, GoalError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::controller::TacticalController;
use crate::sandbox::SandboxConfig;
use crate::sandbox::parser::{Expr, FPart, Stmt, StmtKind, UnaryOp};
use crate::sandbox::value::{self, OpError, Value};

/// Most bytes `print`/`log` may write in one run.
const MAX_OUTPUT_BYTES: usize = 1 << 22;

/// How a block finished.
enum Control {
    Normal,
    Break,
    Continue,
}

type Eval<'s, T> = BoxFuture<'s, Result<T, ErrorKind>>;

pub(crate) struct Interpreter<'a> {
    controller: &'a mut TacticalController,
    cancel: &'a CancellationToken,
    config: &'a SandboxConfig,
    vars: HashMap<String, Value>,
    steps: u32,
    operations: u64,
    log: Vec<String>,
    output: Vec<String>,
    output_bytes: usize,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(
        controller: &'a mut TacticalController,
        cancel: &'a CancellationToken,
        config: &'a SandboxConfig,
    ) -> Self {
        Self {
            controller,
            cancel,
            config,
            vars: HashMap::new(),
            steps: 0,
            operations: 0,
            log: Vec::new(),
            output: Vec::new(),
            output_bytes: 0,
        }
    }

    pub(crate) async fn run(&mut self, body: &[Stmt]) -> Result<(), ErrorKind> {
        self.block(body).await.map(|_| ())
    }

    /// The step log and the `print`/`log` output, in that order.
    pub(crate) fn into_transcript(self) -> (Vec<String>, Vec<String>) {
        (self.log, self.output)
    }

    // ── bookkeeping ──────────────────────────────────────────────────────────

    fn tick(&mut self) -> Result<(), ErrorKind> {
        if self.cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled);
        }
        self.operations += 1;
        if self.operations > self.config.max_operations {
            return Err(ErrorKind::ResourceLimit {
                resource: "operations".to_string(),
                limit: self.config.max_operations,
            });
        }
        Ok(())
    }

    // ── statements ───────────────────────────────────────────────────────────

    fn block<'s>(&'s mut self, body: &'s [Stmt]) -> Eval<'s, Control> {
        async move {
            for stmt in body {
                match self.stmt(stmt).await? {
                    Control::Normal => {}
                    flow => return Ok(flow),
                }
            }
            Ok(Control::Normal)
        }
        .boxed()
    }

    fn stmt<'s>(&'s mut self, stmt: &'s Stmt) -> Eval<'s, Control> {
        async move {
            self.tick()?;
            let line = stmt.line;
            match &stmt.kind {
                StmtKind::Expr(e) => {
                    self.expr(e, line).await?;
                }
                StmtKind::Assign { target, value } => {
                    let Expr::Name(name) = target else {
                        return Err(fault(line, "unsupported assignment target"));
                    };
                    let v = self.expr(value, line).await?;
                    self.vars.insert(name.clone(), v);
                }
                StmtKind::AugAssign { target, op, value } => {
                    let current = self.lookup(target, line)?;
                    let rhs = self.expr(value, line).await?;
                    let v = value::binary(*op, &current, &rhs).map_err(|e| op_fault(line, e))?;
                    self.vars.insert(target.clone(), v);
                }
                StmtKind::If { branches, orelse } => {
                    for (cond, body) in branches {
                        if self.expr(cond, line).await?.truthy() {
                            return self.block(body).await;
                        }
                    }
                    return self.block(orelse).await;
                }
                StmtKind::While { cond, body } => {
                    while self.expr(cond, line).await?.truthy() {
                        self.tick()?;
                        match self.block(body).await? {
                            Control::Break => break,
                            Control::Continue | Control::Normal => {}
                        }
                    }
                }
                StmtKind::For {
                    targets,
                    iter,
                    body,
                } => {
                    let items = match self.expr(iter, line).await? {
                        Value::List(items) => items,
                        Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                        other => {
                            return Err(fault(
                                line,
                                format!("'{}' object is not iterable", other.type_name()),
                            ));
                        }
                    };
                    for item in items {
                        self.tick()?;
                        self.bind_targets(targets, item, line)?;
                        match self.block(body).await? {
                            Control::Break => break,
                            Control::Continue | Control::Normal => {}
                        }
                    }
                }
                StmtKind::Break => return Ok(Control::Break),
                StmtKind::Continue => return Ok(Control::Continue),
                StmtKind::Pass => {}
                StmtKind::Import { module } => {
                    return Err(ErrorKind::SandboxViolation {
                        line,
                        message: format!("import of '{module}' is not permitted"),
                    });
                }
            }
            Ok(Control::Normal)
        }
        .boxed()
    }

    fn bind_targets(&mut self, targets: &[String], item: Value, line: usize) -> Result<(), ErrorKind> {
        if let [single] = targets {
            self.vars.insert(single.clone(), item);
            return Ok(());
        }
        let parts = match item {
            Value::List(parts) => parts,
            other => return Err(fault(line, format!("cannot unpack '{}'", other.type_name()))),
        };
        if parts.len() != targets.len() {
            return Err(fault(
                line,
                format!("expected {} values to unpack, got {}", targets.len(), parts.len()),
            ));
        }
        for (name, v) in targets.iter().zip(parts) {
            self.vars.insert(name.clone(), v);
        }
        Ok(())
    }

    fn lookup(&self, name: &str, line: usize) -> Result<Value, ErrorKind> {
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| fault(line, format!("name '{name}' is not defined")))
    }

    // ── expressions ──────────────────────────────────────────────────────────

    fn expr<'s>(&'s mut self, expr: &'s Expr, line: usize) -> Eval<'s, Value> {
        async move {
            let v = match expr {
                Expr::Int(i) => Value::Int(*i),
                Expr::Float(f) => Value::Float(*f),
                Expr::Str(s) => Value::Str(s.clone()),
                Expr::Bool(b) => Value::Bool(*b),
                Expr::None => Value::None,
                Expr::Name(n) => self.lookup(n, line)?,
                Expr::FString(parts) => {
                    let mut out = String::new();
                    for part in parts {
                        match part {
                            FPart::Lit(s) => out.push_str(s),
                            FPart::Expr(e) => out.push_str(&self.expr(e, line).await?.to_string()),
                        }
                    }
                    value::string(out).map_err(|e| op_fault(line, e))?
                }
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.expr(item, line).await?);
                    }
                    value::list(values).map_err(|e| op_fault(line, e))?
                }
                Expr::Unary { op, operand } => {
                    let v = self.expr(operand, line).await?;
                    match (op, v) {
                        (UnaryOp::Not, v) => Value::Bool(!v.truthy()),
                        (UnaryOp::Pos, v @ (Value::Int(_) | Value::Float(_))) => v,
                        (UnaryOp::Neg, Value::Int(i)) => Value::Int(
                            i.checked_neg().ok_or_else(|| fault(line, "integer overflow"))?,
                        ),
                        (UnaryOp::Neg, Value::Float(f)) => Value::Float(-f),
                        (_, v) => {
                            return Err(fault(
                                line,
                                format!("bad operand type for unary operator: '{}'", v.type_name()),
                            ));
                        }
                    }
                }
                Expr::Binary { op, left, right } => {
                    let l = self.expr(left, line).await?;
                    let r = self.expr(right, line).await?;
                    value::binary(*op, &l, &r).map_err(|e| op_fault(line, e))?
                }
                Expr::Compare { left, rest } => {
                    let mut l = self.expr(left, line).await?;
                    for (op, right) in rest {
                        let r = self.expr(right, line).await?;
                        if !value::compare(*op, &l, &r).map_err(|m| fault(line, m))? {
                            return Ok(Value::Bool(false));
                        }
                        l = r;
                    }
                    Value::Bool(true)
                }
                Expr::And(left, right) => {
                    let l = self.expr(left, line).await?;
                    if !l.truthy() {
                        return Ok(l);
                    }
                    self.expr(right, line).await?
                }
                Expr::Or(left, right) => {
                    let l = self.expr(left, line).await?;
                    if l.truthy() {
                        return Ok(l);
                    }
                    self.expr(right, line).await?
                }
                Expr::Range { start, end } => {
                    let s = self.expr(start, line).await?;
                    let e = self.expr(end, line).await?;
                    self.range(&[s, e], line)?
                }
                Expr::Index { value, index } => {
                    let container = self.expr(value, line).await?;
                    let idx = self.expr(index, line).await?;
                    index_into(container, &idx, line)?
                }
                Expr::Call { func, args } => {
                    let Expr::Name(name) = func.as_ref() else {
                        return Err(fault(line, "only builtin functions may be called"));
                    };
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.expr(arg, line).await?);
                    }
                    self.call(name, values, line).await?
                }
                Expr::Attribute { attr, .. } => {
                    return Err(ErrorKind::SandboxViolation {
                        line,
                        message: format!("attribute access '.{attr}' is not permitted"),
                    });
                }
            };
            Ok(v)
        }
        .boxed()
    }

    // ── builtins ─────────────────────────────────────────────────────────────

    async fn call(&mut self, name: &str, args: Vec<Value>, line: usize) -> Result<Value, ErrorKind> {
        match name {
            "step" => {
                let [Value::Str(goal)] = args.as_slice() else {
                    return Err(fault(line, "step() takes exactly one goal string"));
                };
                self.step(goal.clone(), line).await
            }
            "print" | "log" => {
                let text = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.output_bytes = self.output_bytes.saturating_add(text.len());
                if self.output_bytes > MAX_OUTPUT_BYTES {
                    return Err(ErrorKind::ResourceLimit {
                        resource: "output bytes".to_string(),
                        limit: MAX_OUTPUT_BYTES as u64,
                    });
                }
                if name == "log" {
                    info!(target: "handeye::script", line, "{text}");
                }
                self.output.push(text);
                Ok(Value::None)
            }
            "range" => self.range(&args, line),
            "len" => match args.as_slice() {
                [Value::Str(s)] => Ok(Value::Int(s.chars().count() as i64)),
                [Value::List(l)] => Ok(Value::Int(l.len() as i64)),
                [other] => Err(fault(
                    line,
                    format!("object of type '{}' has no len()", other.type_name()),
                )),
                _ => Err(fault(line, "len() takes exactly one argument")),
            },
            "str" => match args.as_slice() {
                [] => Ok(Value::Str(String::new())),
                [v] => value::string(v.to_string()).map_err(|e| op_fault(line, e)),
                _ => Err(fault(line, "str() takes at most one argument")),
            },
            "int" => match args.as_slice() {
                [Value::Int(i)] => Ok(Value::Int(*i)),
                [Value::Bool(b)] => Ok(Value::Int(i64::from(*b))),
                [Value::Float(f)] if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
                [Value::Str(s)] => s
                    .trim()
                    .parse()
                    .map(Value::Int)
                    .map_err(|_| fault(line, format!("invalid literal for int(): '{s}'"))),
                _ => Err(fault(line, "int() expects one number or numeric string")),
            },
            "abs" => match args.as_slice() {
                [Value::Int(i)] => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| fault(line, "integer overflow")),
                [Value::Float(f)] => Ok(Value::Float(f.abs())),
                _ => Err(fault(line, "abs() expects one number")),
            },
            "enumerate" => match args.as_slice() {
                [Value::List(items)] => value::list(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, v)| Value::List(vec![Value::Int(i as i64), v.clone()]))
                        .collect(),
                )
                .map_err(|e| op_fault(line, e)),
                _ => Err(fault(line, "enumerate() expects one list")),
            },
            "min" | "max" => {
                let items = match args.as_slice() {
                    [Value::List(items)] => items.clone(),
                    [_, _, ..] => args.clone(),
                    _ => return Err(fault(line, format!("{name}() expects a list or two or more values"))),
                };
                let mut best: Option<Value> = None;
                for item in items {
                    best = Some(match best {
                        None => item,
                        Some(current) => {
                            let ord = value::order(&item, &current).ok_or_else(|| {
                                fault(line, format!("{name}() arguments are not comparable"))
                            })?;
                            let better = if name == "min" { ord.is_lt() } else { ord.is_gt() };
                            if better { item } else { current }
                        }
                    });
                }
                best.ok_or_else(|| fault(line, format!("{name}() arg is an empty sequence")))
            }
            other => Err(ErrorKind::SandboxViolation {
                line,
                message: format!("call to '{other}' is not permitted"),
            }),
        }
    }

    /// The sole bridge from script code to the controller.
    ///
    /// Every call leaves exactly one log line, including calls that abort
    /// the script.
    async fn step(&mut self, goal: String, line: usize) -> Result<Value, ErrorKind> {
        if self.steps >= self.config.max_steps {
            self.log.push(format!("{goal}: false"));
            return Err(ErrorKind::ResourceLimit {
                resource: "steps".to_string(),
                limit: u64::from(self.config.max_steps),
            });
        }
        self.steps += 1;
        debug!(line, step = self.steps, goal = %goal, "step");

        let result = self
            .controller
            .execute_goal_with_cancel(&goal, self.cancel)
            .await;
        let succeeded = result.is_ok();
        self.log.push(format!("{goal}: {succeeded}"));
        match result {
            Ok(_) => Ok(Value::Bool(true)),
            Err(GoalError::MaxRetry(e))
                if e.is_verification_failure() && !self.config.abort_on_exhausted_retries =>
            {
                Ok(Value::Bool(false))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn range(&self, args: &[Value], line: usize) -> Result<Value, ErrorKind> {
        let ints = args
            .iter()
            .map(|a| a.as_index().ok_or_else(|| fault(line, "range bounds must be integers")))
            .collect::<Result<Vec<_>, _>>()?;
        let (start, stop, stride) = match ints.as_slice() {
            [stop] => (0, *stop, 1),
            [start, stop] => (*start, *stop, 1),
            [start, stop, stride] => (*start, *stop, *stride),
            _ => return Err(fault(line, "range expects 1 to 3 integers")),
        };
        if stride == 0 {
            return Err(fault(line, "range() step must not be zero"));
        }
        let span = if stride > 0 {
            stop.saturating_sub(start)
        } else {
            start.saturating_sub(stop)
        };
        let len = if span <= 0 {
            0
        } else {
            (span - 1) / stride.saturating_abs() + 1
        };
        let limit = self.config.max_operations;
        if u64::try_from(len).unwrap_or(u64::MAX) > limit {
            return Err(ErrorKind::ResourceLimit {
                resource: "operations".to_string(),
                limit,
            });
        }
        if !usize::try_from(len).is_ok_and(|n| n <= value::MAX_VALUE_SIZE) {
            return Err(op_fault(
                line,
                OpError::TooLarge {
                    limit: value::MAX_VALUE_SIZE,
                },
            ));
        }
        let mut values = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
        let mut current = start;
        for _ in 0..len {
            values.push(Value::Int(current));
            current = current.saturating_add(stride);
        }
        Ok(Value::List(values))
    }
}

fn index_into(container: Value, index: &Value, line: usize) -> Result<Value, ErrorKind> {
    let Some(raw) = index.as_index() else {
        return Err(fault(
            line,
            format!("indices must be integers, not '{}'", index.type_name()),
        ));
    };
    let resolve = |len: usize| -> Result<usize, ErrorKind> {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        let i = if raw < 0 { raw + len } else { raw };
        if (0..len).contains(&i) {
            usize::try_from(i).map_err(|_| fault(line, "index out of range"))
        } else {
            Err(fault(line, "index out of range"))
        }
    };
    match container {
        Value::List(mut items) => {
            let i = resolve(items.len())?;
            Ok(items.swap_remove(i))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = resolve(chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        other => Err(fault(
            line,
            format!("'{}' object is not subscriptable", other.type_name()),
        )),
    }
}

fn fault(line: usize, message: impl std::fmt::Display) -> ErrorKind {
    ErrorKind::Internal(format!("line {line}: {message}"))
}

fn op_fault(line: usize, err: OpError) -> ErrorKind {
    match err {
        OpError::Invalid(message) => fault(line, message),
        OpError::TooLarge { limit } => ErrorKind::ResourceLimit {
            resource: "value items".to_string(),
            limit: limit as u64,
        },
        OpError::TooDeep { limit } => ErrorKind::ResourceLimit {
            resource: "list nesting levels".to_string(),
            limit: limit as u64,
        },
    }
}
