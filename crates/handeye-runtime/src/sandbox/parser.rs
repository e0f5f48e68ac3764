//! Recursive-descent parser producing the script AST.
//!
//! Statement forms: expression, `NAME = expr`, `NAME += expr`,
//! `NAME -= expr`, `if/elif/else`, `while`, `for NAME[, NAME] in expr`,
//! `break`, `continue`, `pass`, and `import`/`from … import` (parsed only so
//! the capability scan can reject them with a precise line).

use crate::sandbox::lexer::{SyntaxError, Tok, Token, tokenize};

// ─────────────────────────────────────────────────────────────────────────────
// AST
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    /// `target` is a `Name`, or an `Attribute` kept for the scan to reject.
    Assign { target: Expr, value: Expr },
    AugAssign { target: String, op: BinOp, value: Expr },
    If { branches: Vec<(Expr, Vec<Stmt>)>, orelse: Vec<Stmt> },
    While { cond: Expr, body: Vec<Stmt> },
    For { targets: Vec<String>, iter: Expr, body: Vec<Stmt> },
    Break,
    Continue,
    Pass,
    Import { module: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    FString(Vec<FPart>),
    List(Vec<Expr>),
    Name(String),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    /// `a < b < c` keeps every operator, as chained comparisons do.
    Compare { left: Box<Expr>, rest: Vec<(CmpOp, Expr)> },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    /// `start..end`, end exclusive.
    Range { start: Box<Expr>, end: Box<Expr> },
    Call { func: Box<Expr>, args: Vec<Expr> },
    Attribute { value: Box<Expr>, attr: String },
    Index { value: Box<Expr>, index: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FPart {
    Lit(String),
    Expr(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Keywords the language reserves but does not implement.
const UNSUPPORTED: &[&str] = &[
    "def", "class", "return", "lambda", "with", "try", "except", "finally", "raise", "global",
    "nonlocal", "del", "yield", "async", "await", "assert", "is",
];

/// Names that cannot be used as identifiers.
const KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "for", "in", "break", "continue", "pass", "import", "from",
    "and", "or", "not", "True", "False", "None", "as",
];

/// Deepest nesting of blocks and sub-expressions a script may use.  Operator
/// chains count one level per operator.
pub const MAX_NESTING: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Entry points
// ─────────────────────────────────────────────────────────────────────────────

pub fn parse(src: &str) -> Result<Program, SyntaxError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        loop_depth: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Tok::Eof) {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

/// Parse the body of an f-string placeholder.
fn parse_embedded(src: &str, line: usize, depth: usize) -> Result<Expr, SyntaxError> {
    let relocate = |e: SyntaxError| SyntaxError::new(line, e.message);
    let mut tokens = tokenize(src).map_err(relocate)?;
    for t in &mut tokens {
        t.line = line;
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        loop_depth: 0,
        depth,
    };
    let expr = parser.expr()?;
    parser.eat(&Tok::Newline);
    if !parser.at(&Tok::Eof) {
        return Err(SyntaxError::new(line, "invalid expression in f-string"));
    }
    Ok(expr)
}

// ─────────────────────────────────────────────────────────────────────────────
// Parser
// ─────────────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    loop_depth: usize,
    depth: usize,
}

impl Parser {
    // ── token helpers ────────────────────────────────────────────────────────

    fn peek(&self) -> &Tok {
        self.tokens
            .get(self.pos)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Name(n) if n == kw)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), SyntaxError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), SyntaxError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{kw}'")))
        }
    }

    fn expect_end_of_statement(&mut self) -> Result<(), SyntaxError> {
        if self.eat(&Tok::Newline) || self.at(&Tok::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("end of line"))
        }
    }

    fn identifier(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Tok::Name(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn enter(&mut self) -> Result<(), SyntaxError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(SyntaxError::new(
                self.line(),
                format!("nesting deeper than {MAX_NESTING} levels"),
            ));
        }
        Ok(())
    }

    fn leave(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let found = match self.peek() {
            Tok::Newline => "end of line".to_string(),
            Tok::Eof => "end of script".to_string(),
            Tok::Indent => "unexpected indent".to_string(),
            Tok::Dedent => "dedent".to_string(),
            other => format!("{other:?}"),
        };
        SyntaxError::new(self.line(), format!("expected {expected}, found {found}"))
    }

    // ── statements ───────────────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        let kind = if self.eat_keyword("if") {
            self.if_statement()?
        } else if self.eat_keyword("while") {
            let cond = self.expr()?;
            let body = self.loop_body()?;
            StmtKind::While { cond, body }
        } else if self.eat_keyword("for") {
            let mut targets = vec![self.identifier()?];
            while self.eat(&Tok::Comma) {
                targets.push(self.identifier()?);
            }
            self.expect_keyword("in")?;
            let iter = self.expr()?;
            let body = self.loop_body()?;
            StmtKind::For {
                targets,
                iter,
                body,
            }
        } else {
            return self.simple_statement();
        };
        Ok(Stmt { line, kind })
    }

    fn simple_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        if let Tok::Name(kw) = self.peek()
            && UNSUPPORTED.contains(&kw.as_str())
        {
            return Err(SyntaxError::new(line, format!("'{kw}' is not supported")));
        }

        let kind = if self.eat_keyword("pass") {
            StmtKind::Pass
        } else if self.at_keyword("break") || self.at_keyword("continue") {
            let is_break = self.at_keyword("break");
            if self.loop_depth == 0 {
                let kw = if is_break { "break" } else { "continue" };
                return Err(SyntaxError::new(line, format!("'{kw}' outside loop")));
            }
            self.advance();
            if is_break {
                StmtKind::Break
            } else {
                StmtKind::Continue
            }
        } else if self.eat_keyword("import") {
            let module = self.dotted_name()?;
            while !self.at(&Tok::Newline) && !self.at(&Tok::Eof) {
                self.advance();
            }
            StmtKind::Import { module }
        } else if self.eat_keyword("from") {
            let module = self.dotted_name()?;
            self.expect_keyword("import")?;
            while !self.at(&Tok::Newline) && !self.at(&Tok::Eof) {
                self.advance();
            }
            StmtKind::Import { module }
        } else {
            let expr = self.expr()?;
            match self.peek().clone() {
                Tok::Assign => {
                    self.advance();
                    if !matches!(expr, Expr::Name(_) | Expr::Attribute { .. }) {
                        return Err(SyntaxError::new(line, "cannot assign to expression"));
                    }
                    let value = self.expr()?;
                    StmtKind::Assign {
                        target: expr,
                        value,
                    }
                }
                Tok::PlusAssign | Tok::MinusAssign => {
                    let op = if self.advance() == Tok::PlusAssign {
                        BinOp::Add
                    } else {
                        BinOp::Sub
                    };
                    let Expr::Name(target) = expr else {
                        return Err(SyntaxError::new(line, "augmented assignment needs a name"));
                    };
                    let value = self.expr()?;
                    StmtKind::AugAssign { target, op, value }
                }
                _ => StmtKind::Expr(expr),
            }
        };
        self.expect_end_of_statement()?;
        Ok(Stmt { line, kind })
    }

    fn dotted_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.identifier()?;
        while self.eat(&Tok::Dot) {
            name.push('.');
            name.push_str(&self.identifier()?);
        }
        Ok(name)
    }

    fn if_statement(&mut self) -> Result<StmtKind, SyntaxError> {
        let mut branches = Vec::new();
        let cond = self.expr()?;
        branches.push((cond, self.block()?));
        let mut orelse = Vec::new();
        loop {
            if self.eat_keyword("elif") {
                let cond = self.expr()?;
                branches.push((cond, self.block()?));
            } else if self.eat_keyword("else") {
                orelse = self.block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn loop_body(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    /// `: NEWLINE INDENT stmt+ DEDENT`, or `: simple_stmt` on the same line.
    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.expect(Tok::Colon, "':'")?;
        self.enter()?;
        if !self.eat(&Tok::Newline) {
            let stmt = self.simple_statement()?;
            self.leave(1);
            return Ok(vec![stmt]);
        }
        self.expect(Tok::Indent, "an indented block")?;
        let mut body = Vec::new();
        while !self.eat(&Tok::Dedent) {
            if self.at(&Tok::Eof) {
                break;
            }
            body.push(self.statement()?);
        }
        self.leave(1);
        Ok(body)
    }

    // ── expressions ──────────────────────────────────────────────────────────

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let mut levels = 1;
        let mut left = self.and_expr()?;
        while self.eat_keyword("or") {
            self.enter()?;
            levels += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.leave(levels);
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut levels = 0;
        let mut left = self.not_expr()?;
        while self.eat_keyword("and") {
            self.enter()?;
            levels += 1;
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.leave(levels);
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword("not") {
            self.enter()?;
            let operand = self.not_expr()?;
            self.leave(1);
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.range_expr()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek().clone() {
                Tok::Eq => CmpOp::Eq,
                Tok::NotEq => CmpOp::NotEq,
                Tok::Lt => CmpOp::Lt,
                Tok::Le => CmpOp::Le,
                Tok::Gt => CmpOp::Gt,
                Tok::Ge => CmpOp::Ge,
                Tok::Name(n) if n == "in" => CmpOp::In,
                Tok::Name(n) if n == "not" => {
                    let next_is_in = matches!(
                        self.tokens.get(self.pos + 1).map(|t| &t.tok),
                        Some(Tok::Name(n)) if n == "in"
                    );
                    if !next_is_in {
                        break;
                    }
                    self.advance();
                    CmpOp::NotIn
                }
                _ => break,
            };
            self.advance();
            rest.push((op, self.range_expr()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn range_expr(&mut self) -> Result<Expr, SyntaxError> {
        let start = self.arith()?;
        if self.eat(&Tok::DotDot) {
            let end = self.arith()?;
            return Ok(Expr::Range {
                start: Box::new(start),
                end: Box::new(end),
            });
        }
        Ok(start)
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        let mut levels = 0;
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => {
                    self.leave(levels);
                    return Ok(left);
                }
            };
            self.advance();
            self.enter()?;
            levels += 1;
            let right = self.term()?;
            left = binary(op, left, right);
        }
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        let mut levels = 0;
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::SlashSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => {
                    self.leave(levels);
                    return Ok(left);
                }
            };
            self.advance();
            self.enter()?;
            levels += 1;
            let right = self.factor()?;
            left = binary(op, left, right);
        }
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        self.enter()?;
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Pos,
            _ => {
                let expr = self.power()?;
                self.leave(1);
                return Ok(expr);
            }
        };
        self.advance();
        let operand = self.factor()?;
        self.leave(1);
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.postfix()?;
        if self.eat(&Tok::StarStar) {
            let exponent = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut levels = 0;
        let mut expr = self.atom()?;
        loop {
            if matches!(self.peek(), Tok::LParen | Tok::LBracket | Tok::Dot) {
                self.enter()?;
                levels += 1;
            }
            if self.eat(&Tok::LParen) {
                let mut args = Vec::new();
                while !self.at(&Tok::RParen) {
                    args.push(self.expr()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RParen, "')'")?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat(&Tok::LBracket) {
                let index = self.expr()?;
                self.expect(Tok::RBracket, "']'")?;
                expr = Expr::Index {
                    value: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(&Tok::Dot) {
                let attr = match self.advance() {
                    Tok::Name(n) => n,
                    _ => return Err(SyntaxError::new(self.line(), "expected attribute name")),
                };
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else {
                self.leave(levels);
                return Ok(expr);
            }
        }
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let line = self.line();
        match self.peek().clone() {
            Tok::Int(v) => {
                self.advance();
                Ok(Expr::Int(v))
            }
            Tok::Float(v) => {
                self.advance();
                Ok(Expr::Float(v))
            }
            Tok::Str(s) => {
                self.advance();
                // Adjacent literals concatenate.
                let mut s = s;
                while let Tok::Str(next) = self.peek().clone() {
                    self.advance();
                    s.push_str(&next);
                }
                Ok(Expr::Str(s))
            }
            Tok::FStr(raw) => {
                self.advance();
                Ok(Expr::FString(fstring_parts(&raw, line, self.depth)?))
            }
            Tok::Name(n) => match n.as_str() {
                "True" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "False" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "None" => {
                    self.advance();
                    Ok(Expr::None)
                }
                _ => self.identifier().map(Expr::Name),
            },
            Tok::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at(&Tok::RBracket) {
                    items.push(self.expr()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBracket, "']'")?;
                Ok(Expr::List(items))
            }
            _ => Err(self.unexpected("an expression")),
        }
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn fstring_parts(raw: &str, line: usize, depth: usize) -> Result<Vec<FPart>, SyntaxError> {
    let mut parts = Vec::new();
    let mut lit = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                lit.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                lit.push('}');
            }
            '{' => {
                let mut inner = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => inner.push(c),
                        None => return Err(SyntaxError::new(line, "unclosed '{' in f-string")),
                    }
                }
                if !lit.is_empty() {
                    parts.push(FPart::Lit(std::mem::take(&mut lit)));
                }
                parts.push(FPart::Expr(parse_embedded(&inner, line, depth)?));
            }
            '}' => return Err(SyntaxError::new(line, "single '}' in f-string")),
            c => lit.push(c),
        }
    }
    if !lit.is_empty() {
        parts.push(FPart::Lit(lit));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first(src: &str) -> StmtKind {
        parse(src).unwrap().body.remove(0).kind
    }

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            func: Box::new(Expr::Name(name.into())),
            args,
        }
    }

    #[test]
    fn single_step_call() {
        assert_eq!(
            first("step('open app')"),
            StmtKind::Expr(call("step", vec![Expr::Str("open app".into())]))
        );
    }

    #[test]
    fn for_over_range_operator_with_inline_body() {
        let StmtKind::For {
            targets,
            iter,
            body,
        } = first("for i in 0..3: step('like post')")
        else {
            panic!("expected for");
        };
        assert_eq!(targets, vec!["i".to_string()]);
        assert!(matches!(iter, Expr::Range { .. }));
        assert_eq!(body.len(), 1);
    }

    #[test]
    fn if_elif_else_chain() {
        let src = "if step('a'):\n    pass\nelif x > 1:\n    pass\nelse:\n    log('none')\n";
        let StmtKind::If { branches, orelse } = first(src) else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn nested_blocks_keep_line_numbers() {
        let src = "n = 0\nwhile n < 3:\n    n += 1\n    if n == 2:\n        break\n";
        let program = parse(src).unwrap();
        let StmtKind::While { body, .. } = &program.body[1].kind else {
            panic!("expected while");
        };
        assert_eq!(program.body[1].line, 2);
        assert_eq!(body[1].line, 4);
    }

    #[test]
    fn precedence_of_arithmetic_and_power() {
        // 1 + 2 * 3 ** 2  ==  1 + (2 * (3 ** 2))
        let StmtKind::Expr(Expr::Binary { op, right, .. }) = first("1 + 2 * 3 ** 2") else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn not_in_is_one_operator() {
        let StmtKind::Expr(Expr::Compare { rest, .. }) = first("'a' not in items") else {
            panic!("expected compare");
        };
        assert_eq!(rest[0].0, CmpOp::NotIn);
    }

    #[test]
    fn fstring_placeholders_are_parsed() {
        let StmtKind::Expr(Expr::FString(parts)) = first("f'post {i + 1} of {{n}}'") else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], FPart::Lit("post ".into()));
        assert!(matches!(parts[1], FPart::Expr(Expr::Binary { .. })));
        assert_eq!(parts[2], FPart::Lit(" of {n}".into()));
    }

    #[test]
    fn imports_and_attributes_are_parsed_for_the_scan() {
        assert_eq!(
            first("import os.path"),
            StmtKind::Import {
                module: "os.path".into()
            }
        );
        assert!(matches!(
            first("from subprocess import run"),
            StmtKind::Import { .. }
        ));
        assert!(matches!(
            first("os.system('ls')"),
            StmtKind::Expr(Expr::Call { .. })
        ));
    }

    #[test]
    fn unsupported_keywords_are_syntax_errors() {
        let err = parse("def f():\n    pass\n").unwrap_err();
        assert!(err.message.contains("'def' is not supported"));
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        let err = parse("step('a')\nbreak\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn missing_colon_is_reported_with_line() {
        let err = parse("x = 1\nfor i in range(3)\n    step('a')\n").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn cannot_assign_to_call() {
        assert!(parse("f() = 1").is_err());
    }

    #[test]
    fn moderate_nesting_is_accepted() {
        let src = format!("x = {}1{}", "(".repeat(40), ")".repeat(40));
        assert!(parse(&src).is_ok());
        let chain = vec!["1"; 50].join(" + ");
        assert!(parse(&format!("x = {chain}")).is_ok());
    }

    #[test]
    fn deep_nesting_is_a_syntax_error() {
        let parens = format!("x = {}1{}", "(".repeat(5_000), ")".repeat(5_000));
        let lists = format!("x = {}1{}", "[".repeat(5_000), "]".repeat(5_000));
        let unary = format!("x = {}1", "-".repeat(5_000));
        let nots = format!("x = {}True", "not ".repeat(5_000));
        let chain = format!("x = {}", vec!["1"; 5_000].join(" + "));
        let calls = format!("x = len{}", "()".repeat(5_000));
        let power = format!("x = {}", vec!["2"; 5_000].join(" ** "));
        for src in [parens, lists, unary, nots, chain, calls, power] {
            let err = parse(&src).unwrap_err();
            assert!(err.message.contains("nesting"), "{}", err.message);
        }
    }

    #[test]
    fn deeply_nested_blocks_are_a_syntax_error() {
        let mut src = String::new();
        for level in 0..(MAX_NESTING + 5) {
            src.push_str(&" ".repeat(level));
            src.push_str("if True:\n");
        }
        src.push_str(&" ".repeat(MAX_NESTING + 5));
        src.push_str("pass\n");
        let err = parse(&src).unwrap_err();
        assert!(err.message.contains("nesting"), "{}", err.message);
    }
}
