//! Boolean match expressions.
//!
//! ```text
//! labels["node"] == FullName || labels.instance =~ "web-.*"
//! !has(labels["maintenance"]) && (labels.job == "node" || labels.job == "kubelet")
//! ```
//!
//! Operands are string literals, `FullName`, `ShortName`, or a label reference
//! (`labels["name"]` or `labels.name`). A missing label evaluates to `""`.
//! Operators: `==`, `!=`, `=~`, `!~` (regexes are fully anchored), `&&`, `||`,
//! `!`, parentheses, `has(label)`, `true` and `false`.

use regex::Regex;

use crate::domain::alert::alert_record::Labels;
use crate::domain::alert::matcher::{LabelPredicate, NodeIdentity, NodeMatcher};
use crate::errors::MatchError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    And,
    Or,
    Not,
    Eq,
    Ne,
    ReMatch,
    ReNotMatch,
    Str(String),
    Ident(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    ReMatch,
    ReNotMatch,
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Literal(String),
    FullName,
    ShortName,
    Label(String),
}

#[derive(Debug)]
enum Expr {
    Bool(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Has(String),
    Compare {
        lhs: Operand,
        op: CompareOp,
        rhs: Operand,
        /// Pre-compiled when the pattern is a literal.
        regex: Option<Regex>,
    },
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, MatchError> {
    let err = |offset: usize, reason: &str| MatchError::Parse {
        offset,
        reason: reason.to_string(),
    };

    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let two = input.get(pos..pos + 2);
        let fixed = match two {
            Some("&&") => Some((Token::And, 2)),
            Some("||") => Some((Token::Or, 2)),
            Some("==") => Some((Token::Eq, 2)),
            Some("!=") => Some((Token::Ne, 2)),
            Some("=~") => Some((Token::ReMatch, 2)),
            Some("!~") => Some((Token::ReNotMatch, 2)),
            _ => match ch {
                '(' => Some((Token::LParen, 1)),
                ')' => Some((Token::RParen, 1)),
                '[' => Some((Token::LBracket, 1)),
                ']' => Some((Token::RBracket, 1)),
                '.' => Some((Token::Dot, 1)),
                '!' => Some((Token::Not, 1)),
                _ => None,
            },
        };

        if let Some((token, len)) = fixed {
            for _ in 0..len {
                chars.next();
            }
            tokens.push((pos, token));
            continue;
        }

        if ch == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, 'n')) => value.push('\n'),
                        Some((_, e @ ('"' | '\\'))) => value.push(e),
                        Some((_, other)) => {
                            value.push('\\');
                            value.push(other);
                        }
                        None => break,
                    },
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(err(pos, "unterminated string literal"));
            }
            tokens.push((pos, Token::Str(value)));
            continue;
        }

        if ch.is_ascii_alphabetic() || ch == '_' {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    ident.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((pos, Token::Ident(ident)));
            continue;
        }

        return Err(err(pos, &format!("unexpected character {ch:?}")));
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(o, _)| *o)
            .unwrap_or(self.end)
    }

    fn error(&self, reason: impl Into<String>) -> MatchError {
        MatchError::Parse {
            offset: self.offset(),
            reason: reason.into(),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), MatchError> {
        match self.peek() {
            Some(t) if *t == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(self.error(format!("expected {expected:?}"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, MatchError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, MatchError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, MatchError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, MatchError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "true" || name == "false" => {
                let value = name == "true";
                self.pos += 1;
                Ok(Expr::Bool(value))
            }
            Some(Token::Ident(name)) if name == "has" => {
                self.pos += 1;
                self.expect(Token::LParen)?;
                let operand = self.parse_operand()?;
                self.expect(Token::RParen)?;
                match operand {
                    Operand::Label(label) => Ok(Expr::Has(label)),
                    _ => Err(self.error("has() takes a label reference")),
                }
            }
            Some(_) => self.parse_comparison(),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, MatchError> {
        let lhs = self.parse_operand()?;
        let op = match self.next() {
            Some(Token::Eq) => CompareOp::Eq,
            Some(Token::Ne) => CompareOp::Ne,
            Some(Token::ReMatch) => CompareOp::ReMatch,
            Some(Token::ReNotMatch) => CompareOp::ReNotMatch,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.error("expected comparison operator"));
            }
        };
        let rhs = self.parse_operand()?;

        let regex = match (&op, &rhs) {
            (CompareOp::ReMatch | CompareOp::ReNotMatch, Operand::Literal(pattern)) => {
                Some(compile_anchored(pattern)?)
            }
            _ => None,
        };

        Ok(Expr::Compare {
            lhs,
            op,
            rhs,
            regex,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand, MatchError> {
        match self.next() {
            Some(Token::Str(value)) => Ok(Operand::Literal(value)),
            Some(Token::Ident(name)) => match name.as_str() {
                "FullName" => Ok(Operand::FullName),
                "ShortName" => Ok(Operand::ShortName),
                "labels" => match self.next() {
                    Some(Token::LBracket) => match self.next() {
                        Some(Token::Str(label)) => {
                            self.expect(Token::RBracket)?;
                            Ok(Operand::Label(label))
                        }
                        _ => Err(self.error("expected quoted label name")),
                    },
                    Some(Token::Dot) => match self.next() {
                        Some(Token::Ident(label)) => Ok(Operand::Label(label)),
                        _ => Err(self.error("expected label name")),
                    },
                    _ => Err(self.error("expected [ or . after labels")),
                },
                other => {
                    self.pos -= 1;
                    Err(self.error(format!("unknown identifier {other:?}")))
                }
            },
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected operand"))
            }
        }
    }
}

fn compile_anchored(pattern: &str) -> Result<Regex, MatchError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| MatchError::Regex {
        pattern: pattern.to_string(),
        source,
    })
}

struct EvalContext<'a> {
    labels: &'a Labels,
    node: &'a NodeIdentity,
}

impl EvalContext<'_> {
    fn resolve<'b>(&'b self, operand: &'b Operand) -> &'b str {
        match operand {
            Operand::Literal(value) => value,
            Operand::FullName => &self.node.full_name,
            Operand::ShortName => &self.node.short_name,
            Operand::Label(name) => self.labels.get(name).map(String::as_str).unwrap_or(""),
        }
    }
}

impl Expr {
    fn eval(&self, ctx: &EvalContext<'_>) -> Result<bool, MatchError> {
        match self {
            Expr::Bool(value) => Ok(*value),
            Expr::Not(inner) => Ok(!inner.eval(ctx)?),
            Expr::And(lhs, rhs) => Ok(lhs.eval(ctx)? && rhs.eval(ctx)?),
            Expr::Or(lhs, rhs) => Ok(lhs.eval(ctx)? || rhs.eval(ctx)?),
            Expr::Has(label) => Ok(ctx.labels.contains_key(label)),
            Expr::Compare {
                lhs,
                op,
                rhs,
                regex,
            } => {
                let left = ctx.resolve(lhs);
                let right = ctx.resolve(rhs);
                match op {
                    CompareOp::Eq => Ok(left == right),
                    CompareOp::Ne => Ok(left != right),
                    CompareOp::ReMatch | CompareOp::ReNotMatch => {
                        let matched = match regex {
                            Some(re) => re.is_match(left),
                            None => compile_anchored(right)?.is_match(left),
                        };
                        Ok(matched == (*op == CompareOp::ReMatch))
                    }
                }
            }
        }
    }
}

/// A compiled boolean expression evaluated per (alert, node).
#[derive(Debug)]
pub struct MatchExpression {
    root: Expr,
}

impl MatchExpression {
    pub fn compile(source: &str) -> Result<Self, MatchError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: source.len(),
        };
        let root = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(Self { root })
    }

    pub fn evaluate(&self, labels: &Labels, node: &NodeIdentity) -> Result<bool, MatchError> {
        self.root.eval(&EvalContext { labels, node })
    }
}

struct BoundExpression<'a> {
    expression: &'a MatchExpression,
    node: NodeIdentity,
}

impl LabelPredicate for BoundExpression<'_> {
    fn test(&self, labels: &Labels) -> Result<bool, MatchError> {
        self.expression.evaluate(labels, &self.node)
    }
}

impl NodeMatcher for MatchExpression {
    fn bind<'a>(&'a self, node: &NodeIdentity) -> Result<Box<dyn LabelPredicate + 'a>, MatchError> {
        Ok(Box::new(BoundExpression {
            expression: self,
            node: node.clone(),
        }))
    }
}
