//! Static capability scan.
//!
//! Runs over the whole AST before the first statement executes and rejects
//! anything that could reach beyond the builtin whitelist: imports, attribute
//! access, dunder names, calls to non-builtins, builtins used as values, and
//! names that are neither builtin nor assigned somewhere in the script.

use std::collections::HashSet;

use thiserror::Error;

use crate::sandbox::parser::{Expr, FPart, Program, Stmt, StmtKind};

/// Functions a script may call.  `step` is the only one with an effect
/// outside the interpreter.
pub const BUILTINS: &[&str] = &[
    "step",
    "range",
    "len",
    "print",
    "log",
    "str",
    "int",
    "enumerate",
    "min",
    "max",
    "abs",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct Violation {
    pub line: usize,
    pub message: String,
}

/// Return the first violation in source order, if any.
pub fn scan(program: &Program) -> Result<(), Violation> {
    let mut assigned = HashSet::new();
    collect_assigned(&program.body, &mut assigned);
    let scanner = Scanner { assigned };
    scanner.block(&program.body)
}

fn collect_assigned(body: &[Stmt], out: &mut HashSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign {
                target: Expr::Name(n),
                ..
            } => {
                out.insert(n.clone());
            }
            StmtKind::AugAssign { target, .. } => {
                out.insert(target.clone());
            }
            StmtKind::For { targets, body, .. } => {
                out.extend(targets.iter().cloned());
                collect_assigned(body, out);
            }
            StmtKind::While { body, .. } => collect_assigned(body, out),
            StmtKind::If { branches, orelse } => {
                for (_, b) in branches {
                    collect_assigned(b, out);
                }
                collect_assigned(orelse, out);
            }
            _ => {}
        }
    }
}

struct Scanner {
    assigned: HashSet<String>,
}

impl Scanner {
    fn block(&self, body: &[Stmt]) -> Result<(), Violation> {
        body.iter().try_for_each(|s| self.stmt(s))
    }

    fn stmt(&self, stmt: &Stmt) -> Result<(), Violation> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Import { module } => Err(violation(
                line,
                format!("import of '{module}' is not permitted"),
            )),
            StmtKind::Expr(e) => self.expr(e, line),
            StmtKind::Assign { target, value } => {
                match target {
                    Expr::Name(n) => self.binding(n, line)?,
                    other => self.expr(other, line)?,
                }
                self.expr(value, line)
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.binding(target, line)?;
                self.expr(value, line)
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    self.expr(cond, line)?;
                    self.block(body)?;
                }
                self.block(orelse)
            }
            StmtKind::While { cond, body } => {
                self.expr(cond, line)?;
                self.block(body)
            }
            StmtKind::For {
                targets,
                iter,
                body,
            } => {
                for t in targets {
                    self.binding(t, line)?;
                }
                self.expr(iter, line)?;
                self.block(body)
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Pass => Ok(()),
        }
    }

    /// A name being assigned to.
    fn binding(&self, name: &str, line: usize) -> Result<(), Violation> {
        check_dunder(name, line)?;
        if is_builtin(name) {
            return Err(violation(
                line,
                format!("builtin '{name}' cannot be reassigned"),
            ));
        }
        Ok(())
    }

    fn expr(&self, expr: &Expr, line: usize) -> Result<(), Violation> {
        match expr {
            Expr::Int(_) | Expr::Float(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => Ok(()),
            Expr::Name(n) => {
                check_dunder(n, line)?;
                if is_builtin(n) {
                    Err(violation(
                        line,
                        format!("builtin '{n}' may only be called directly"),
                    ))
                } else if !self.assigned.contains(n) {
                    Err(violation(line, format!("name '{n}' is not available")))
                } else {
                    Ok(())
                }
            }
            Expr::Attribute { attr, .. } => Err(violation(
                line,
                format!("attribute access '.{attr}' is not permitted"),
            )),
            Expr::Call { func, args } => {
                match func.as_ref() {
                    Expr::Name(n) => {
                        check_dunder(n, line)?;
                        if !is_builtin(n) {
                            return Err(violation(
                                line,
                                format!("call to '{n}' is not permitted"),
                            ));
                        }
                    }
                    other => {
                        self.expr(other, line)?;
                        return Err(violation(line, "only builtin functions may be called"));
                    }
                }
                args.iter().try_for_each(|a| self.expr(a, line))
            }
            Expr::FString(parts) => parts.iter().try_for_each(|p| match p {
                FPart::Lit(_) => Ok(()),
                FPart::Expr(e) => self.expr(e, line),
            }),
            Expr::List(items) => items.iter().try_for_each(|i| self.expr(i, line)),
            Expr::Unary { operand, .. } => self.expr(operand, line),
            Expr::Binary { left, right, .. }
            | Expr::And(left, right)
            | Expr::Or(left, right)
            | Expr::Range {
                start: left,
                end: right,
            }
            | Expr::Index {
                value: left,
                index: right,
            } => {
                self.expr(left, line)?;
                self.expr(right, line)
            }
            Expr::Compare { left, rest } => {
                self.expr(left, line)?;
                rest.iter().try_for_each(|(_, e)| self.expr(e, line))
            }
        }
    }
}

fn check_dunder(name: &str, line: usize) -> Result<(), Violation> {
    if name.starts_with("__") {
        return Err(violation(
            line,
            format!("dunder name '{name}' is not permitted"),
        ));
    }
    Ok(())
}

fn violation(line: usize, message: impl Into<String>) -> Violation {
    Violation {
        line,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::parser::parse;

    fn check(src: &str) -> Result<(), Violation> {
        scan(&parse(src).unwrap())
    }

    #[test]
    fn ordinary_orchestration_passes() {
        let src = "\
count = 0
for i in range(3):
    if step(f'like post {i}'):
        count += 1
log(str(count))
for n, goal in enumerate(['a', 'b']):
    print(n, goal)
";
        assert!(check(src).is_ok());
    }

    #[test]
    fn import_is_rejected_with_line() {
        let err = check("step('a')\nimport os\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("os"));
    }

    #[test]
    fn file_access_call_is_rejected() {
        let err = check("data = open('/etc/passwd')").unwrap_err();
        assert!(err.message.contains("'open'"));
    }

    #[test]
    fn attribute_access_is_rejected() {
        let err = check("x = 'a'\nx.upper()\n").unwrap_err();
        assert!(err.message.contains(".upper"));
    }

    #[test]
    fn dunder_names_are_rejected() {
        assert!(check("__import__('os')").is_err());
        assert!(check("__builtins__ = 1").is_err());
    }

    #[test]
    fn unknown_free_name_is_rejected() {
        let err = check("step(secret)").unwrap_err();
        assert!(err.message.contains("'secret'"));
    }

    #[test]
    fn builtins_cannot_be_aliased_or_rebound() {
        assert!(check("f = step").is_err());
        assert!(check("step = 1").is_err());
        assert!(check("for print in range(2):\n    pass\n").is_err());
    }

    #[test]
    fn violation_inside_nested_block_is_found() {
        let src = "for i in range(2):\n    if i:\n        eval('1')\n";
        let err = check(src).unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn first_violation_wins() {
        let err = check("open('a')\nimport os\n").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
