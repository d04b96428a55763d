//! Reader for the textual set/map notation.
//!
//! Accepts the notation printed by this crate and the usual hand-written
//! variants:
//!
//! ```text
//! [N, M] -> { S[i, j] -> A[i + 1, j] : 0 <= i < N and 0 <= j < M }
//! { [i] : exists (e0 = floor((i)/4) : i = 4e0) or i mod 3 = 1 }
//! [N] -> { : N >= 1 }
//! ```
//!
//! Identifiers that are neither tuple dimensions nor bound by `exists`
//! become parameters.

use crate::polyhedral::basic::BasicSet;
use crate::polyhedral::constraint::{Constraint, ConstraintKind};
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::map::IntegerMap;
use crate::polyhedral::set::IntegerSet;
use crate::polyhedral::space::Space;
use crate::polyhedral::union::{UnionMap, UnionSet};
use crate::utils::errors::{ParseError, ParseErrorKind};
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::{CharIndices, FromStr};
use unicode_xid::UnicodeXID;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Int(i64),
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Comma,
    Colon,
    Semi,
    Arrow,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Le,
    Lt,
    Ge,
    Gt,
    Eq,
    Ne,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(s) => format!("identifier '{}'", s),
            Tok::Int(v) => format!("integer {}", v),
            Tok::Eof => "end of input".to_string(),
            other => format!("{:?}", other),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
}

/// Tokenizer over the notation.
struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, chars: source.char_indices().peekable() }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|&(_, c)| c)
    }

    fn offset(&mut self) -> usize {
        self.chars.peek().map_or(self.source.len(), |&(i, _)| i)
    }

    fn advance(&mut self) -> Option<char> {
        self.chars.next().map(|(_, c)| c)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            while matches!(self.peek(), Some(c) if c.is_whitespace()) {
                self.advance();
            }
            let offset = self.offset();
            let c = match self.advance() {
                Some(c) => c,
                None => {
                    tokens.push(Token { tok: Tok::Eof, offset });
                    return Ok(tokens);
                }
            };
            let tok = match c {
                '[' => Tok::LBracket,
                ']' => Tok::RBracket,
                '{' => Tok::LBrace,
                '}' => Tok::RBrace,
                '(' => Tok::LParen,
                ')' => Tok::RParen,
                ',' => Tok::Comma,
                ':' => Tok::Colon,
                ';' => Tok::Semi,
                '+' => Tok::Plus,
                '*' => Tok::Star,
                '/' => Tok::Slash,
                '%' => Tok::Percent,
                '-' => {
                    if self.match_char('>') {
                        Tok::Arrow
                    } else {
                        Tok::Minus
                    }
                }
                '<' => {
                    if self.match_char('=') {
                        Tok::Le
                    } else {
                        Tok::Lt
                    }
                }
                '>' => {
                    if self.match_char('=') {
                        Tok::Ge
                    } else {
                        Tok::Gt
                    }
                }
                '=' => {
                    self.match_char('=');
                    Tok::Eq
                }
                '!' if self.match_char('=') => Tok::Ne,
                '&' if self.match_char('&') => Tok::Ident("and".to_string()),
                '|' if self.match_char('|') => Tok::Ident("or".to_string()),
                c if c.is_ascii_digit() => {
                    let mut text = c.to_string();
                    while let Some(d) = self.peek() {
                        if d.is_ascii_digit() {
                            text.push(d);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    let value = text.parse::<i64>().map_err(|_| ParseError {
                        message: format!("integer literal '{}' out of range", text),
                        offset,
                        kind: ParseErrorKind::UnexpectedChar,
                        expected: Vec::new(),
                        found: Some(text.clone()),
                    })?;
                    Tok::Int(value)
                }
                c if c == '_' || UnicodeXID::is_xid_start(c) => {
                    let mut name = c.to_string();
                    while let Some(d) = self.peek() {
                        if UnicodeXID::is_xid_continue(d) || d == '\'' || d == '.' {
                            name.push(d);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                    Tok::Ident(name)
                }
                other => {
                    return Err(ParseError {
                        message: format!("unexpected character '{}'", other),
                        offset,
                        kind: ParseErrorKind::UnexpectedChar,
                        expected: Vec::new(),
                        found: Some(other.to_string()),
                    })
                }
            };
            tokens.push(Token { tok, offset });
        }
    }
}

const KEYWORDS: &[&str] = &["and", "or", "exists", "floor", "ceil", "mod", "true", "false"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Var {
    Param(String),
    Dim(usize),
    Local(usize),
}

/// Affine expression over symbolic variables, built while parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LinExpr {
    terms: BTreeMap<Var, i64>,
    constant: i64,
}

impl LinExpr {
    fn constant(value: i64) -> Self {
        Self { terms: BTreeMap::new(), constant: value }
    }

    fn var(v: Var) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(v, 1);
        Self { terms, constant: 0 }
    }

    fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    fn scale(&self, k: i64) -> Self {
        if k == 0 {
            return Self::constant(0);
        }
        Self {
            terms: self.terms.iter().map(|(v, c)| (v.clone(), c * k)).collect(),
            constant: self.constant * k,
        }
    }

    fn add(&self, other: &LinExpr) -> Self {
        let mut terms = self.terms.clone();
        for (v, c) in &other.terms {
            let entry = terms.entry(v.clone()).or_insert(0);
            *entry += c;
            if *entry == 0 {
                terms.remove(v);
            }
        }
        Self { terms, constant: self.constant + other.constant }
    }

    fn sub(&self, other: &LinExpr) -> Self {
        self.add(&other.scale(-1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LocalDef {
    Div { num: LinExpr, den: i64 },
    Exists,
}

type Conj = Vec<(LinExpr, ConstraintKind)>;
type Dnf = Vec<Conj>;

fn dnf_true() -> Dnf {
    vec![Vec::new()]
}

fn dnf_and(a: Dnf, b: Dnf) -> Dnf {
    let mut out = Vec::with_capacity(a.len() * b.len());
    for x in &a {
        for y in &b {
            let mut c = x.clone();
            c.extend(y.iter().cloned());
            out.push(c);
        }
    }
    out
}

/// One `tuple [-> tuple] [: formula]` element of an object.
#[derive(Debug, Clone)]
struct Piece {
    is_params: bool,
    n_in: Option<usize>,
    in_name: Option<String>,
    out_name: Option<String>,
    dim_names: Vec<Option<String>>,
    locals: Vec<LocalDef>,
    tuple_eqs: Vec<LinExpr>,
    dnf: Dnf,
}

impl Piece {
    fn n_dims(&self) -> usize {
        self.dim_names.len()
    }

    fn key(&self) -> (bool, Option<usize>, Option<String>, Option<String>, usize) {
        (
            self.is_params,
            self.n_in,
            self.in_name.clone(),
            self.out_name.clone(),
            self.n_dims() - self.n_in.unwrap_or(0),
        )
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    explicit_params: Vec<String>,
    params: Vec<String>,
    // per piece
    dim_names: Vec<Option<String>>,
    locals: Vec<LocalDef>,
    scopes: Vec<(String, usize)>,
}

impl Parser {
    fn new(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: Lexer::new(source).tokenize()?,
            pos: 0,
            explicit_params: Vec::new(),
            params: Vec::new(),
            dim_names: Vec::new(),
            locals: Vec::new(),
            scopes: Vec::new(),
        })
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, k: usize) -> &Tok {
        &self.tokens[(self.pos + k).min(self.tokens.len() - 1)].tok
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == kw)
    }

    fn error(&self, kind: ParseErrorKind, message: impl Into<String>, expected: &[&str]) -> ParseError {
        let found = self.peek().describe();
        ParseError {
            message: message.into(),
            offset: self.offset(),
            kind: if *self.peek() == Tok::Eof { ParseErrorKind::UnexpectedEof } else { kind },
            expected: expected.iter().map(|s| s.to_string()).collect(),
            found: Some(found),
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ParseError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.error(ParseErrorKind::UnexpectedToken, format!("expected {}", what), &[what]))
        }
    }

    fn parse_object(&mut self) -> Result<Vec<Piece>, ParseError> {
        if *self.peek() == Tok::LBracket {
            self.advance();
            while *self.peek() != Tok::RBracket {
                match self.advance() {
                    Tok::Ident(name) => {
                        if !self.explicit_params.contains(&name) {
                            self.explicit_params.push(name.clone());
                            self.params.push(name);
                        }
                    }
                    _ => {
                        return Err(self.error(ParseErrorKind::UnexpectedToken, "expected parameter name", &["identifier"]))
                    }
                }
                if *self.peek() == Tok::Comma {
                    self.advance();
                }
            }
            self.advance();
            self.expect(Tok::Arrow, "'->'")?;
        }
        self.expect(Tok::LBrace, "'{'")?;
        let mut pieces = Vec::new();
        while *self.peek() != Tok::RBrace {
            pieces.push(self.parse_piece()?);
            if *self.peek() == Tok::Semi {
                self.advance();
            } else if *self.peek() != Tok::RBrace {
                return Err(self.error(ParseErrorKind::UnexpectedToken, "expected ';' or '}'", &[";", "}"]));
            }
        }
        self.advance();
        if *self.peek() != Tok::Eof {
            return Err(self.error(ParseErrorKind::UnexpectedToken, "trailing input", &["end of input"]));
        }
        Ok(pieces)
    }

    fn parse_piece(&mut self) -> Result<Piece, ParseError> {
        self.dim_names.clear();
        self.locals.clear();
        self.scopes.clear();
        let mut tuple_eqs = Vec::new();
        let mut piece = Piece {
            is_params: false,
            n_in: None,
            in_name: None,
            out_name: None,
            dim_names: Vec::new(),
            locals: Vec::new(),
            tuple_eqs: Vec::new(),
            dnf: dnf_true(),
        };
        if *self.peek() == Tok::Colon {
            piece.is_params = true;
        } else {
            let first_name = self.parse_tuple(&mut tuple_eqs)?;
            if *self.peek() == Tok::Arrow {
                self.advance();
                piece.n_in = Some(self.dim_names.len());
                piece.in_name = first_name;
                piece.out_name = self.parse_tuple(&mut tuple_eqs)?;
            } else {
                piece.out_name = first_name;
            }
        }
        if *self.peek() == Tok::Colon {
            self.advance();
            // `{ : }` is the universe of a parameter space
            if !matches!(self.peek(), Tok::RBrace | Tok::Semi) {
                piece.dnf = self.parse_formula()?;
            }
        }
        piece.dim_names = self.dim_names.clone();
        piece.locals = self.locals.clone();
        piece.tuple_eqs = tuple_eqs;
        Ok(piece)
    }

    /// Parse `Name[e, ...]`, returning the tuple name.
    fn parse_tuple(&mut self, eqs: &mut Vec<LinExpr>) -> Result<Option<String>, ParseError> {
        let name = match self.peek().clone() {
            Tok::Ident(n) if !KEYWORDS.contains(&n.as_str()) => {
                self.advance();
                Some(n)
            }
            _ => None,
        };
        self.expect(Tok::LBracket, "'['")?;
        while *self.peek() != Tok::RBracket {
            let fresh = match (self.peek().clone(), self.peek_at(1).clone()) {
                (Tok::Ident(n), Tok::Comma) | (Tok::Ident(n), Tok::RBracket)
                    if !KEYWORDS.contains(&n.as_str())
                        && !self.explicit_params.contains(&n)
                        && !self.dim_names.iter().any(|d| d.as_deref() == Some(n.as_str())) =>
                {
                    Some(n)
                }
                _ => None,
            };
            match fresh {
                Some(n) => {
                    self.advance();
                    self.dim_names.push(Some(n));
                }
                None => {
                    let e = self.parse_expr()?;
                    let idx = self.dim_names.len();
                    self.dim_names.push(None);
                    eqs.push(LinExpr::var(Var::Dim(idx)).sub(&e));
                }
            }
            if *self.peek() == Tok::Comma {
                self.advance();
            } else if *self.peek() != Tok::RBracket {
                return Err(self.error(ParseErrorKind::UnexpectedToken, "expected ',' or ']'", &[",", "]"]));
            }
        }
        self.advance();
        Ok(name)
    }

    fn parse_formula(&mut self) -> Result<Dnf, ParseError> {
        let mut result = self.parse_conj()?;
        while self.is_keyword("or") {
            self.advance();
            result.extend(self.parse_conj()?);
        }
        Ok(result)
    }

    fn parse_conj(&mut self) -> Result<Dnf, ParseError> {
        let mut result = self.parse_atom()?;
        while self.is_keyword("and") {
            self.advance();
            let rhs = self.parse_atom()?;
            result = dnf_and(result, rhs);
        }
        Ok(result)
    }

    fn parse_atom(&mut self) -> Result<Dnf, ParseError> {
        if self.is_keyword("true") {
            self.advance();
            return Ok(dnf_true());
        }
        if self.is_keyword("false") {
            self.advance();
            return Ok(Vec::new());
        }
        if self.is_keyword("exists") {
            return self.parse_exists();
        }
        if *self.peek() == Tok::LParen {
            // either a parenthesized formula or an expression starting with '('
            let saved = (self.pos, self.params.len(), self.locals.len());
            self.advance();
            if let Ok(inner) = self.parse_formula() {
                if *self.peek() == Tok::RParen {
                    self.advance();
                    if !self.at_expression_continuation() {
                        return Ok(inner);
                    }
                }
            }
            self.pos = saved.0;
            self.params.truncate(saved.1);
            self.locals.truncate(saved.2);
        }
        self.parse_comparison_chain()
    }

    fn at_expression_continuation(&self) -> bool {
        matches!(
            self.peek(),
            Tok::Le | Tok::Lt | Tok::Ge | Tok::Gt | Tok::Eq | Tok::Ne | Tok::Plus | Tok::Minus | Tok::Star | Tok::Percent
        ) || self.is_keyword("mod")
    }

    fn parse_exists(&mut self) -> Result<Dnf, ParseError> {
        self.advance();
        self.expect(Tok::LParen, "'('")?;
        let scope_len = self.scopes.len();
        loop {
            let name = match self.advance() {
                Tok::Ident(n) => n,
                _ => return Err(self.error(ParseErrorKind::UnexpectedToken, "expected variable name", &["identifier"])),
            };
            if *self.peek() == Tok::Eq {
                // named division: e = floor(...)
                self.advance();
                let e = self.parse_expr()?;
                let idx = match e.terms.iter().next() {
                    Some((Var::Local(k), 1)) if e.terms.len() == 1 && e.constant == 0 => *k,
                    _ => {
                        let idx = self.locals.len();
                        self.locals.push(LocalDef::Exists);
                        // opaque local tied to the expression
                        let eq = LinExpr::var(Var::Local(idx)).sub(&e);
                        self.scopes.push((name, idx));
                        return self.finish_exists(scope_len, vec![vec![(eq, ConstraintKind::Equality)]]);
                    }
                };
                self.scopes.push((name, idx));
            } else {
                let idx = self.locals.len();
                self.locals.push(LocalDef::Exists);
                self.scopes.push((name, idx));
            }
            match self.peek() {
                Tok::Comma => {
                    self.advance();
                }
                Tok::Colon => break,
                _ => return Err(self.error(ParseErrorKind::UnexpectedToken, "expected ',' or ':'", &[",", ":"])),
            }
        }
        self.finish_exists(scope_len, dnf_true())
    }

    fn finish_exists(&mut self, scope_len: usize, prefix: Dnf) -> Result<Dnf, ParseError> {
        // remaining names after a defining equality
        while *self.peek() == Tok::Comma {
            self.advance();
            let name = match self.advance() {
                Tok::Ident(n) => n,
                _ => return Err(self.error(ParseErrorKind::UnexpectedToken, "expected variable name", &["identifier"])),
            };
            let idx = self.locals.len();
            self.locals.push(LocalDef::Exists);
            self.scopes.push((name, idx));
        }
        self.expect(Tok::Colon, "':'")?;
        let body = self.parse_formula()?;
        self.expect(Tok::RParen, "')'")?;
        self.scopes.truncate(scope_len);
        Ok(dnf_and(prefix, body))
    }

    fn parse_comparison_chain(&mut self) -> Result<Dnf, ParseError> {
        let mut lhs = self.parse_expr()?;
        let mut result = dnf_true();
        let mut n_ops = 0;
        loop {
            let op = match self.peek() {
                Tok::Le | Tok::Lt | Tok::Ge | Tok::Gt | Tok::Eq | Tok::Ne => self.advance(),
                _ => break,
            };
            let rhs = self.parse_expr()?;
            let one = LinExpr::constant(1);
            let part: Dnf = match op {
                Tok::Le => vec![vec![(rhs.sub(&lhs), ConstraintKind::Inequality)]],
                Tok::Lt => vec![vec![(rhs.sub(&lhs).sub(&one), ConstraintKind::Inequality)]],
                Tok::Ge => vec![vec![(lhs.sub(&rhs), ConstraintKind::Inequality)]],
                Tok::Gt => vec![vec![(lhs.sub(&rhs).sub(&one), ConstraintKind::Inequality)]],
                Tok::Eq => vec![vec![(lhs.sub(&rhs), ConstraintKind::Equality)]],
                _ => vec![
                    vec![(rhs.sub(&lhs).sub(&one), ConstraintKind::Inequality)],
                    vec![(lhs.sub(&rhs).sub(&one), ConstraintKind::Inequality)],
                ],
            };
            result = dnf_and(result, part);
            lhs = rhs;
            n_ops += 1;
        }
        if n_ops == 0 {
            return Err(self.error(ParseErrorKind::UnexpectedToken, "expected a comparison", &["<=", "<", ">=", ">", "="]));
        }
        Ok(result)
    }

    fn parse_expr(&mut self) -> Result<LinExpr, ParseError> {
        let mut result = if *self.peek() == Tok::Minus {
            self.advance();
            self.parse_term()?.scale(-1)
        } else {
            self.parse_term()?
        };
        loop {
            match self.peek() {
                Tok::Plus => {
                    self.advance();
                    let t = self.parse_term()?;
                    result = result.add(&t);
                }
                Tok::Minus => {
                    self.advance();
                    let t = self.parse_term()?;
                    result = result.sub(&t);
                }
                _ => return Ok(result),
            }
        }
    }

    fn parse_term(&mut self) -> Result<LinExpr, ParseError> {
        let mut result = self.parse_factor()?;
        loop {
            if *self.peek() == Tok::Star {
                self.advance();
                let rhs = self.parse_factor()?;
                result = self.multiply(&result, &rhs)?;
            } else if self.is_keyword("mod") || *self.peek() == Tok::Percent {
                self.advance();
                let d = self.parse_positive_int()?;
                let q = self.new_div(result.clone(), d);
                result = result.sub(&q.scale(d));
            } else {
                return Ok(result);
            }
        }
    }

    fn multiply(&self, a: &LinExpr, b: &LinExpr) -> Result<LinExpr, ParseError> {
        if a.is_constant() {
            Ok(b.scale(a.constant))
        } else if b.is_constant() {
            Ok(a.scale(b.constant))
        } else {
            Err(self.error(ParseErrorKind::NonAffine, "product of two non-constant expressions", &[]))
        }
    }

    fn parse_positive_int(&mut self) -> Result<i64, ParseError> {
        match self.advance() {
            Tok::Int(v) if v > 0 => Ok(v),
            _ => Err(self.error(ParseErrorKind::UnexpectedToken, "expected a positive integer", &["integer"])),
        }
    }

    fn new_div(&mut self, num: LinExpr, den: i64) -> LinExpr {
        if den == 1 {
            return num;
        }
        let def = LocalDef::Div { num, den };
        let idx = match self.locals.iter().position(|l| *l == def) {
            Some(i) => i,
            None => {
                self.locals.push(def);
                self.locals.len() - 1
            }
        };
        LinExpr::var(Var::Local(idx))
    }

    fn parse_factor(&mut self) -> Result<LinExpr, ParseError> {
        match self.peek().clone() {
            Tok::Int(v) => {
                self.advance();
                // juxtaposition: 2i, 3(i + 1), 4floor(...)
                let juxtaposed = match self.peek() {
                    Tok::Ident(n) => !matches!(n.as_str(), "and" | "or" | "mod"),
                    Tok::LParen => true,
                    _ => false,
                };
                if juxtaposed {
                    let rhs = self.parse_factor()?;
                    Ok(rhs.scale(v))
                } else {
                    Ok(LinExpr::constant(v))
                }
            }
            Tok::Minus => {
                self.advance();
                Ok(self.parse_factor()?.scale(-1))
            }
            Tok::LParen => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(e)
            }
            Tok::Ident(name) if name == "floor" || name == "ceil" => {
                self.advance();
                self.expect(Tok::LParen, "'('")?;
                let num = self.parse_expr()?;
                let den = if *self.peek() == Tok::Slash {
                    self.advance();
                    self.parse_positive_int()?
                } else {
                    1
                };
                self.expect(Tok::RParen, "')'")?;
                if name == "floor" {
                    Ok(self.new_div(num, den))
                } else {
                    // ceil(e/d) = -floor(-e/d)
                    Ok(self.new_div(num.scale(-1), den).scale(-1))
                }
            }
            Tok::Ident(name) if !KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                Ok(LinExpr::var(self.resolve(&name)))
            }
            _ => Err(self.error(ParseErrorKind::ExpectedExpression, "expected an expression", &["expression"])),
        }
    }

    fn resolve(&mut self, name: &str) -> Var {
        if let Some((_, idx)) = self.scopes.iter().rev().find(|(n, _)| n == name) {
            return Var::Local(*idx);
        }
        if let Some(idx) = self.dim_names.iter().position(|d| d.as_deref() == Some(name)) {
            return Var::Dim(idx);
        }
        if !self.params.iter().any(|p| p == name) {
            self.params.push(name.to_string());
        }
        Var::Param(name.to_string())
    }
}

/// Convert a symbolic expression to columns `[params | dims | locals]`.
fn to_affine(e: &LinExpr, params: &[String], n_dims: usize, local_cols: &[usize], n_cols: usize) -> AffineExpr {
    let np = params.len();
    let mut out = AffineExpr::constant(e.constant, n_cols);
    for (v, &c) in &e.terms {
        let col = match v {
            Var::Param(name) => params.iter().position(|p| p == name).unwrap_or(0),
            Var::Dim(k) => np + k,
            Var::Local(k) => local_cols.get(*k).copied().unwrap_or(np + n_dims),
        };
        if col < n_cols {
            out.coeffs[col] += c;
        }
    }
    out
}

fn piece_space(piece: &Piece, params: &[String]) -> Space {
    let n = piece.n_dims();
    let base = if piece.is_params {
        Space::params(params.to_vec())
    } else if let Some(n_in) = piece.n_in {
        Space::map(n_in, n - n_in)
            .with_in_name(piece.in_name.clone())
            .with_out_name(piece.out_name.clone())
            .with_param_names(params.to_vec())
    } else {
        Space::set(n).with_out_name(piece.out_name.clone()).with_param_names(params.to_vec())
    };
    let names: Vec<String> = piece
        .dim_names
        .iter()
        .enumerate()
        .map(|(k, n)| n.clone().unwrap_or_else(|| base.dim_name(k)))
        .collect();
    if names.is_empty() {
        base
    } else {
        base.with_dim_names(names)
    }
}

fn piece_basics(piece: &Piece, space: &Space, params: &[String]) -> Vec<BasicSet> {
    let n_dims = piece.n_dims();
    let mut result = Vec::new();
    for conj in &piece.dnf {
        let mut b = BasicSet::universe(space.clone());
        let mut local_cols: Vec<usize> = Vec::new();
        for l in &piece.locals {
            match l {
                LocalDef::Div { num, den } => {
                    let num = to_affine(num, params, n_dims, &local_cols, b.n_total());
                    local_cols.push(b.add_div(num, *den));
                }
                LocalDef::Exists => local_cols.push(b.add_exists()),
            }
        }
        let n = b.n_total();
        for eq in &piece.tuple_eqs {
            b.add_eq(to_affine(eq, params, n_dims, &local_cols, n));
        }
        for (e, kind) in conj {
            b.add_constraint(Constraint::new(to_affine(e, params, n_dims, &local_cols, n), *kind));
        }
        b.eliminate_locals();
        if !b.is_obviously_empty() {
            result.push(b);
        }
    }
    result
}

/// Parsed pieces grouped by tuple, with the final parameter list.
fn parse_groups(source: &str) -> Result<(Vec<String>, Vec<(Space, Vec<BasicSet>)>), ParseError> {
    let mut parser = Parser::new(source)?;
    let pieces = parser.parse_object()?;
    let params = parser.params.clone();
    let mut groups: Vec<(Space, Vec<BasicSet>)> = Vec::new();
    let mut keys = Vec::new();
    for piece in &pieces {
        let space = piece_space(piece, &params);
        let basics = piece_basics(piece, &space, &params);
        let key = piece.key();
        match keys.iter().position(|k| *k == key) {
            Some(i) => groups[i].1.extend(basics),
            None => {
                keys.push(key);
                groups.push((space, basics));
            }
        }
    }
    Ok((params, groups))
}

fn inconsistent(message: &str) -> ParseError {
    ParseError {
        message: message.to_string(),
        offset: 0,
        kind: ParseErrorKind::InconsistentSpace,
        expected: Vec::new(),
        found: None,
    }
}

/// Parse a set (or parameter set) with a single tuple.
pub fn parse_set(source: &str) -> Result<IntegerSet, ParseError> {
    let (params, mut groups) = parse_groups(source)?;
    match groups.len() {
        0 => Ok(IntegerSet::empty(Space::set(0).with_param_names(params))),
        1 => {
            let (space, pieces) = groups.remove(0);
            if space.is_map() {
                return Err(inconsistent("expected a set, found a relation"));
            }
            Ok(IntegerSet { space, pieces })
        }
        _ => Err(inconsistent("set has pieces in different tuples")),
    }
}

/// Parse a relation with a single pair of tuples.
pub fn parse_map(source: &str) -> Result<IntegerMap, ParseError> {
    let (params, mut groups) = parse_groups(source)?;
    match groups.len() {
        0 => Ok(IntegerMap::empty(Space::map(0, 0).with_param_names(params))),
        1 => {
            let (space, pieces) = groups.remove(0);
            if !space.is_map() {
                return Err(inconsistent("expected a relation, found a set"));
            }
            Ok(IntegerMap::from_set_repr(IntegerSet { space, pieces }))
        }
        _ => Err(inconsistent("relation has pieces in different tuples")),
    }
}

/// Parse a union of sets.
pub fn parse_union_set(source: &str) -> Result<UnionSet, ParseError> {
    let (params, groups) = parse_groups(source)?;
    let mut result = UnionSet::empty();
    for (space, pieces) in groups {
        if space.is_map() {
            return Err(inconsistent("expected sets, found a relation"));
        }
        result.add(IntegerSet { space, pieces }.align_params(&params));
    }
    Ok(result)
}

/// Parse a union of relations.
pub fn parse_union_map(source: &str) -> Result<UnionMap, ParseError> {
    let (params, groups) = parse_groups(source)?;
    let mut result = UnionMap::empty();
    for (space, pieces) in groups {
        if !space.is_map() {
            return Err(inconsistent("expected relations, found a set"));
        }
        result.add(IntegerMap::from_set_repr(IntegerSet { space, pieces }).align_params(&params));
    }
    Ok(result)
}

impl FromStr for IntegerSet {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_set(s)
    }
}

impl FromStr for IntegerMap {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_map(s)
    }
}

impl FromStr for UnionSet {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_union_set(s)
    }
}

impl FromStr for UnionMap {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_union_map(s)
    }
}
