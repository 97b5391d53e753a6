//! Recursive-descent parser producing the selector AST.
//!
//! Precedence, loosest first: `OR`, `AND`, `NOT`, comparison and the
//! `BETWEEN` / `LIKE` / `IN` / `IS NULL` predicates, `+ -`, `* /`, unary sign.

use super::lexer::Token;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Bool(bool),
    Long(i64),
    Double(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn is_ordering(self) -> bool {
        !matches!(self, CmpOp::Eq | CmpOp::Ne)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LikeToken {
    Char(char),
    AnyOne,
    AnyMany,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Literal),
    Ident(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    In {
        ident: String,
        list: Vec<String>,
        negated: bool,
    },
    Like {
        ident: String,
        pattern: Vec<LikeToken>,
        negated: bool,
    },
    IsNull {
        ident: String,
        negated: bool,
    },
}

pub(crate) fn parse(tokens: Vec<Token>) -> Result<Expr, String> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {} after expression", token.describe()));
    }
    validate(&expr)?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!(
                "expected {} but found {}",
                expected.describe(),
                token.describe()
            )),
            None => Err(format!(
                "expected {} but the expression ended",
                expected.describe()
            )),
        }
    }

    fn expect_string(&mut self, context: &str) -> Result<String, String> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(s),
            Some(token) => Err(format!(
                "{context} requires a string literal, found {}",
                token.describe()
            )),
            None => Err(format!("{context} requires a string literal")),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::Or) {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.not_expr()?;
        while self.eat(&Token::And) {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.not_expr()?)));
        }
        self.predicate()
    }

    fn predicate(&mut self) -> Result<Expr, String> {
        let left = self.additive()?;

        let op = match self.peek() {
            Some(Token::Eq) => Some(CmpOp::Eq),
            Some(Token::Ne) => Some(CmpOp::Ne),
            Some(Token::Lt) => Some(CmpOp::Lt),
            Some(Token::Le) => Some(CmpOp::Le),
            Some(Token::Gt) => Some(CmpOp::Gt),
            Some(Token::Ge) => Some(CmpOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.additive()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }

        if self.eat(&Token::Is) {
            let negated = self.eat(&Token::Not);
            self.expect(Token::Null)?;
            let ident = into_ident(left, "IS NULL")?;
            return Ok(Expr::IsNull { ident, negated });
        }

        let negated = self.eat(&Token::Not);
        match self.peek() {
            Some(Token::Between) => {
                self.pos += 1;
                let low = self.additive()?;
                self.expect(Token::And)?;
                let high = self.additive()?;
                Ok(Expr::Between {
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                })
            }
            Some(Token::In) => {
                self.pos += 1;
                let ident = into_ident(left, "IN")?;
                self.expect(Token::LParen)?;
                let mut list = vec![self.expect_string("IN")?];
                while self.eat(&Token::Comma) {
                    list.push(self.expect_string("IN")?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::In {
                    ident,
                    list,
                    negated,
                })
            }
            Some(Token::Like) => {
                self.pos += 1;
                let ident = into_ident(left, "LIKE")?;
                let pattern = self.expect_string("LIKE")?;
                let escape = if self.eat(&Token::Escape) {
                    let escape = self.expect_string("ESCAPE")?;
                    let mut chars = escape.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(c),
                        _ => {
                            return Err(format!(
                                "ESCAPE must be a single character, found '{escape}'"
                            ));
                        }
                    }
                } else {
                    None
                };
                Ok(Expr::Like {
                    ident,
                    pattern: compile_like(&pattern, escape)?,
                    negated,
                })
            }
            _ if negated => Err("NOT must be followed by BETWEEN, IN or LIKE here".to_string()),
            _ => Ok(left),
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        if self.eat(&Token::Minus) {
            return Ok(match self.unary()? {
                Expr::Literal(Literal::Long(v)) => Expr::Literal(Literal::Long(v.wrapping_neg())),
                Expr::Literal(Literal::Double(v)) => Expr::Literal(Literal::Double(-v)),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => Ok(Expr::Ident(name)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Literal::Str(s))),
            Some(Token::Long(v)) => Ok(Expr::Literal(Literal::Long(v))),
            Some(Token::Double(v)) => Ok(Expr::Literal(Literal::Double(v))),
            Some(Token::True) => Ok(Expr::Literal(Literal::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Literal::Bool(false))),
            Some(Token::Null) => Err("NULL is only allowed in IS [NOT] NULL".to_string()),
            Some(token) => Err(format!("unexpected {}", token.describe())),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn into_ident(expr: Expr, context: &str) -> Result<String, String> {
    match expr {
        Expr::Ident(name) => Ok(name),
        _ => Err(format!("{context} must be applied to an identifier")),
    }
}

fn compile_like(pattern: &str, escape: Option<char>) -> Result<Vec<LikeToken>, String> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if Some(c) == escape {
            match chars.next() {
                Some(next) if next == '_' || next == '%' || Some(next) == escape => {
                    tokens.push(LikeToken::Char(next));
                }
                _ => return Err(format!("invalid escape sequence in LIKE pattern '{pattern}'")),
            }
            continue;
        }
        tokens.push(match c {
            '_' => LikeToken::AnyOne,
            '%' => LikeToken::AnyMany,
            c => LikeToken::Char(c),
        });
    }
    Ok(tokens)
}

/// Static type of a subexpression, where it can be known without a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Boolean,
    Numeric,
    String,
    Unknown,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Boolean => "boolean",
            Kind::Numeric => "numeric",
            Kind::String => "string",
            Kind::Unknown => "unknown",
        }
    }
}

fn kind_of(expr: &Expr) -> Kind {
    match expr {
        Expr::Literal(Literal::Bool(_)) => Kind::Boolean,
        Expr::Literal(Literal::Long(_) | Literal::Double(_)) => Kind::Numeric,
        Expr::Literal(Literal::Str(_)) => Kind::String,
        Expr::Ident(name) => header_kind(name),
        Expr::Arith(..) | Expr::Neg(_) => Kind::Numeric,
        Expr::Not(_)
        | Expr::And(..)
        | Expr::Or(..)
        | Expr::Compare(..)
        | Expr::Between { .. }
        | Expr::In { .. }
        | Expr::Like { .. }
        | Expr::IsNull { .. } => Kind::Boolean,
    }
}

fn header_kind(name: &str) -> Kind {
    match name {
        "JMSPriority" | "JMSTimestamp" => Kind::Numeric,
        "JMSDeliveryMode" | "JMSMessageID" | "JMSCorrelationID" | "JMSType" => Kind::String,
        _ => Kind::Unknown,
    }
}

fn require(expr: &Expr, allowed: Kind, context: &str) -> Result<(), String> {
    let kind = kind_of(expr);
    if kind == allowed || kind == Kind::Unknown {
        Ok(())
    } else {
        Err(format!(
            "{context} expects a {} operand, found {}",
            allowed.name(),
            kind.name()
        ))
    }
}

fn validate(expr: &Expr) -> Result<(), String> {
    require(expr, Kind::Boolean, "selector")?;
    check(expr)
}

fn check(expr: &Expr) -> Result<(), String> {
    match expr {
        Expr::Literal(_) | Expr::Ident(_) => Ok(()),
        Expr::Not(inner) => {
            require(inner, Kind::Boolean, "NOT")?;
            check(inner)
        }
        Expr::And(l, r) | Expr::Or(l, r) => {
            let op = if matches!(expr, Expr::And(..)) { "AND" } else { "OR" };
            require(l, Kind::Boolean, op)?;
            require(r, Kind::Boolean, op)?;
            check(l)?;
            check(r)
        }
        Expr::Compare(op, l, r) => {
            let (lk, rk) = (kind_of(l), kind_of(r));
            if op.is_ordering() {
                require(l, Kind::Numeric, "comparison")?;
                require(r, Kind::Numeric, "comparison")?;
            } else if lk != Kind::Unknown && rk != Kind::Unknown && lk != rk {
                return Err(format!(
                    "cannot compare {} with {}",
                    lk.name(),
                    rk.name()
                ));
            }
            check(l)?;
            check(r)
        }
        Expr::Arith(_, l, r) => {
            require(l, Kind::Numeric, "arithmetic")?;
            require(r, Kind::Numeric, "arithmetic")?;
            check(l)?;
            check(r)
        }
        Expr::Neg(inner) => {
            require(inner, Kind::Numeric, "negation")?;
            check(inner)
        }
        Expr::Between {
            expr, low, high, ..
        } => {
            for operand in [expr, low, high] {
                require(operand, Kind::Numeric, "BETWEEN")?;
                check(operand)?;
            }
            Ok(())
        }
        Expr::In { ident, .. } | Expr::Like { ident, .. } => {
            if header_kind(ident) == Kind::Numeric {
                return Err(format!("{ident} is numeric and cannot be matched as a string"));
            }
            Ok(())
        }
        Expr::IsNull { .. } => Ok(()),
    }
}
