//! Tokenizer and recursive-descent parser for the builtin kernel language.
//!
//! ```text
//! program    := stmt ((NEWLINE | ';') stmt)*
//! stmt       := 'del' IDENT | IDENT '=' expr | expr
//! expr       := additive (CMP additive)?
//! additive   := term (('+' | '-') term)*
//! term       := unary (('*' | '/' | '%') unary)*
//! unary      := ('-' | 'not') unary | postfix
//! postfix    := primary ('(' (expr (',' expr)*)? ')')?
//! primary    := INT | FLOAT | STRING | BOOL | NONE | IDENT | '(' expr ')'
//! ```

use super::value::Value;

/// Deepest parenthesis, call and unary nesting the parser accepts.
pub const MAX_NESTING: usize = 100;

/// Deepest expression tree a statement may produce.
pub const MAX_EXPR_DEPTH: usize = 1000;

const TOO_DEEP: &str = "SyntaxError: expression nested too deeply";

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `not`
    Not,
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal value.
    Literal(Value),
    /// Variable reference.
    Name(String),
    /// Unary operation.
    Unary(UnaryOp, Box<Expr>),
    /// Binary operation.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Builtin function call.
    Call(String, Vec<Expr>),
}

/// Statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `name = expr`
    Assign(String, Expr),
    /// `del name`
    Delete(String),
    /// Bare expression; its value is echoed unless `none`.
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Separator,
}

/// Parse source text into statements.
///
/// # Errors
///
/// Returns a `SyntaxError: ...` message on malformed input.
pub fn parse(source: &str) -> Result<Vec<Stmt>, String> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.program()
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' | ';' => {
                tokens.push(Token::Separator);
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '"' | '\'' => {
                let (text, next) = read_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = next;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || (chars[i] == '.' && !is_float) || chars[i] == '_')
                {
                    if chars[i] == '.' {
                        is_float = true;
                    }
                    i += 1;
                }
                let literal: String = chars[start..i].iter().filter(|c| **c != '_').collect();
                if is_float {
                    let value = literal
                        .parse::<f64>()
                        .map_err(|_| format!("SyntaxError: invalid number '{literal}'"))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value = literal
                        .parse::<i64>()
                        .map_err(|_| format!("SyntaxError: integer literal too large '{literal}'"))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => ("==", 2),
                    ('!', Some('=')) => ("!=", 2),
                    ('<', Some('=')) => ("<=", 2),
                    ('>', Some('=')) => (">=", 2),
                    ('=', _) => ("=", 1),
                    ('<', _) => ("<", 1),
                    ('>', _) => (">", 1),
                    ('+', _) => ("+", 1),
                    ('-', _) => ("-", 1),
                    ('*', _) => ("*", 1),
                    ('/', _) => ("/", 1),
                    ('%', _) => ("%", 1),
                    _ => return Err(format!("SyntaxError: unexpected character '{c}'")),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((text, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| "SyntaxError: unterminated string".to_owned())?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            '\n' => return Err("SyntaxError: unterminated string".into()),
            c => {
                text.push(c);
                i += 1;
            }
        }
    }

    Err("SyntaxError: unterminated string".into())
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    /// Run `f` one nesting level deeper, refusing past [`MAX_NESTING`].
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_NESTING {
            return Err(TOO_DEEP.into());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn program(&mut self) -> Result<Vec<Stmt>, String> {
        let mut stmts = Vec::new();
        loop {
            while matches!(self.peek(), Some(Token::Separator)) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                break;
            }
            stmts.push(self.statement()?);
            match self.peek() {
                None | Some(Token::Separator) => {}
                Some(other) => return Err(format!("SyntaxError: unexpected token {other:?}")),
            }
        }
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, String> {
        if let Some(Token::Ident(word)) = self.peek() {
            if word == "del" {
                self.pos += 1;
                return match self.advance() {
                    Some(Token::Ident(name)) => Ok(Stmt::Delete(name)),
                    _ => Err("SyntaxError: expected a name after 'del'".into()),
                };
            }
            if matches!(self.peek_at(1), Some(Token::Op("="))) {
                let name = word.clone();
                if is_keyword(&name) {
                    return Err(format!("SyntaxError: cannot assign to '{name}'"));
                }
                self.pos += 2;
                let value = bounded(self.expr()?)?;
                return Ok(Stmt::Assign(name, value));
            }
        }
        Ok(Stmt::Expr(bounded(self.expr()?)?))
    }

    fn expr(&mut self) -> Result<Expr, String> {
        self.nested(Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinOp::Eq,
            Some(Token::Op("!=")) => BinOp::Ne,
            Some(Token::Op("<")) => BinOp::Lt,
            Some(Token::Op("<=")) => BinOp::Le,
            Some(Token::Op(">")) => BinOp::Gt,
            Some(Token::Op(">=")) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.additive()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinOp::Add
            } else if self.eat_op("-") {
                BinOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinOp::Mul
            } else if self.eat_op("/") {
                BinOp::Div
            } else if self.eat_op("%") {
                BinOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat_op("-") {
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if matches!(self.peek(), Some(Token::Ident(word)) if word == "not") {
            self.pos += 1;
            let inner = self.nested(Self::unary)?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let primary = self.primary()?;
        if !matches!(self.peek(), Some(Token::LParen)) {
            return Ok(primary);
        }
        let Expr::Name(function) = primary else {
            return Err("SyntaxError: only named functions can be called".into());
        };
        self.pos += 1;

        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token::RParen)) {
            self.pos += 1;
            return Ok(Expr::Call(function, args));
        }
        loop {
            args.push(self.expr()?);
            match self.advance() {
                Some(Token::Comma) => {}
                Some(Token::RParen) => return Ok(Expr::Call(function, args)),
                _ => return Err("SyntaxError: expected ',' or ')' in call".into()),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Int(value)) => Ok(Expr::Literal(Value::Int(value))),
            Some(Token::Float(value)) => Ok(Expr::Literal(Value::Float(value))),
            Some(Token::Str(value)) => Ok(Expr::Literal(Value::Str(value))),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" | "True" => Expr::Literal(Value::Bool(true)),
                "false" | "False" => Expr::Literal(Value::Bool(false)),
                "none" | "None" => Expr::Literal(Value::None),
                _ => Expr::Name(word),
            }),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("SyntaxError: expected ')'".into()),
                }
            }
            Some(other) => Err(format!("SyntaxError: unexpected token {other:?}")),
            None => Err("SyntaxError: unexpected end of input".into()),
        }
    }
}

/// Reject trees deeper than [`MAX_EXPR_DEPTH`]; long operator chains
/// build left-deep trees without nesting.
fn bounded(expr: Expr) -> Result<Expr, String> {
    if within_depth(&expr, MAX_EXPR_DEPTH) {
        Ok(expr)
    } else {
        Err(TOO_DEEP.into())
    }
}

fn within_depth(expr: &Expr, budget: usize) -> bool {
    let Some(budget) = budget.checked_sub(1) else {
        return false;
    };
    match expr {
        Expr::Literal(_) | Expr::Name(_) => true,
        Expr::Unary(_, inner) => within_depth(inner, budget),
        Expr::Binary(_, left, right) => within_depth(left, budget) && within_depth(right, budget),
        Expr::Call(_, args) => args.iter().all(|arg| within_depth(arg, budget)),
    }
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "del" | "not" | "true" | "false" | "none" | "True" | "False" | "None"
    )
}
