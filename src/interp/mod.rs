//! Builtin kernel interpreter.
//!
//! A deliberately small expression language with global variables,
//! arithmetic, strings and a handful of builtins (`print`, `str`, `int`,
//! `float`, `len`, `type`, `abs`, `sleep`, `exit`). It gives every
//! installation a kernel that needs no external runtime, and it is what the
//! test suite drives.
//!
//! Snapshots capture every global binding:
//! `{"format": "replhost-builtin", "vars": {"x": {"type": "int", "value": 1}}}`.

use std::collections::BTreeMap;
use std::time::Duration;

use self::parser::{parse, BinOp, Expr, Stmt, UnaryOp};
use self::value::Value;

pub mod parser;
pub mod serve;
pub mod value;

/// Snapshot `format` tag written and accepted by the builtin kernel.
pub const SNAPSHOT_FORMAT: &str = "replhost-builtin";

/// Longest `sleep()` honoured, in seconds.
const MAX_SLEEP_SECONDS: f64 = 3600.0;

/// Largest string a payload may build, in bytes.
pub const MAX_STRING_BYTES: usize = 64 * 1024 * 1024;

/// Outcome of executing one payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutcome {
    /// Whether every statement ran without error.
    pub ok: bool,
    /// Captured output of `print` and echoed expressions.
    pub stdout: String,
    /// Error message, if any.
    pub stderr: String,
    /// Exit code requested through `exit()`.
    pub exit: Option<i32>,
}

enum Flow {
    Error(String),
    Exit(i32),
}

impl From<String> for Flow {
    fn from(message: String) -> Self {
        Self::Error(message)
    }
}

/// Interpreter state: the global scope of one session.
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    globals: BTreeMap<String, Value>,
}

impl Interpreter {
    /// Create an interpreter with an empty global scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a global binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Execute a payload. Statements run in order until the first error.
    pub fn execute(&mut self, code: &str) -> ExecOutcome {
        let stmts = match parse(code) {
            Ok(stmts) => stmts,
            Err(message) => {
                return ExecOutcome {
                    ok: false,
                    stderr: format!("{message}\n"),
                    ..ExecOutcome::default()
                }
            }
        };

        let mut out = String::new();
        for stmt in &stmts {
            match self.run(stmt, &mut out) {
                Ok(()) => {}
                Err(Flow::Error(message)) => {
                    return ExecOutcome {
                        ok: false,
                        stdout: out,
                        stderr: format!("{message}\n"),
                        exit: None,
                    }
                }
                Err(Flow::Exit(code)) => {
                    return ExecOutcome {
                        ok: true,
                        stdout: out,
                        stderr: String::new(),
                        exit: Some(code),
                    }
                }
            }
        }

        ExecOutcome {
            ok: true,
            stdout: out,
            stderr: String::new(),
            exit: None,
        }
    }

    /// Serialize every global binding.
    ///
    /// # Errors
    ///
    /// Returns a message if a value cannot be encoded.
    pub fn snapshot(&self) -> Result<serde_json::Value, String> {
        let vars = serde_json::to_value(&self.globals).map_err(|err| err.to_string())?;
        let mut state = serde_json::Map::new();
        state.insert("format".into(), SNAPSHOT_FORMAT.into());
        state.insert("vars".into(), vars);
        Ok(serde_json::Value::Object(state))
    }

    /// Replace the global scope with a snapshot. Nothing changes on error.
    ///
    /// # Errors
    ///
    /// Returns a message if the snapshot has the wrong format or cannot be
    /// decoded.
    pub fn restore(&mut self, state: &serde_json::Value) -> Result<(), String> {
        let format = state.get("format").and_then(serde_json::Value::as_str);
        if format != Some(SNAPSHOT_FORMAT) {
            return Err(format!(
                "unsupported snapshot format {format:?}, expected {SNAPSHOT_FORMAT}"
            ));
        }
        let vars = state
            .get("vars")
            .cloned()
            .ok_or_else(|| "snapshot has no vars".to_owned())?;
        let globals: BTreeMap<String, Value> =
            serde_json::from_value(vars).map_err(|err| format!("invalid snapshot: {err}"))?;
        self.globals = globals;
        Ok(())
    }

    fn run(&mut self, stmt: &Stmt, out: &mut String) -> Result<(), Flow> {
        match stmt {
            Stmt::Assign(name, expr) => {
                let value = self.eval(expr, out)?;
                self.globals.insert(name.clone(), value);
            }
            Stmt::Delete(name) => {
                if self.globals.remove(name).is_none() {
                    return Err(name_error(name).into());
                }
            }
            Stmt::Expr(expr) => {
                let value = self.eval(expr, out)?;
                if value != Value::None {
                    out.push_str(&value.repr());
                    out.push('\n');
                }
            }
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr, out: &mut String) -> Result<Value, Flow> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| name_error(name).into()),
            Expr::Unary(op, inner) => {
                let value = self.eval(inner, out)?;
                Ok(unary(*op, &value)?)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, out)?;
                let right = self.eval(right, out)?;
                Ok(binary(*op, &left, &right)?)
            }
            Expr::Call(function, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, out)?);
                }
                call(function, &values, out)
            }
        }
    }
}

fn name_error(name: &str) -> String {
    format!("NameError: name '{name}' is not defined")
}

fn type_error(op: &str, left: &Value, right: &Value) -> String {
    format!(
        "TypeError: unsupported operand type(s) for {op}: '{}' and '{}'",
        left.type_name(),
        right.type_name()
    )
}

fn unary(op: UnaryOp, value: &Value) -> Result<Value, String> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Int(i)) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| "OverflowError: integer overflow".to_owned()),
        (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Neg, v) => Err(format!(
            "TypeError: bad operand type for unary -: '{}'",
            v.type_name()
        )),
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, String> {
    use Value::{Float, Int, Str};

    let overflow = || "OverflowError: integer overflow".to_owned();

    match op {
        BinOp::Add => match (left, right) {
            (Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or_else(overflow),
            (Str(a), Str(b)) => {
                check_string_size(a.len().checked_add(b.len()))?;
                Ok(Str(format!("{a}{b}")))
            }
            _ => float_op(left, right, "+", |a, b| a + b),
        },
        BinOp::Sub => match (left, right) {
            (Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or_else(overflow),
            _ => float_op(left, right, "-", |a, b| a - b),
        },
        BinOp::Mul => match (left, right) {
            (Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or_else(overflow),
            (Str(s), Int(n)) | (Int(n), Str(s)) => {
                let count = usize::try_from(*n).unwrap_or(0);
                check_string_size(s.len().checked_mul(count))?;
                Ok(Str(s.repeat(count)))
            }
            _ => float_op(left, right, "*", |a, b| a * b),
        },
        BinOp::Div => {
            if right.as_f64() == Some(0.0) && left.as_f64().is_some() {
                return Err("ZeroDivisionError: division by zero".into());
            }
            float_op(left, right, "/", |a, b| a / b)
        }
        BinOp::Rem => match (left, right) {
            (Int(_), Int(0)) => Err("ZeroDivisionError: integer modulo by zero".into()),
            (Int(a), Int(b)) => {
                let r = a.checked_rem(*b).ok_or_else(overflow)?;
                Ok(Int(if r != 0 && (r < 0) != (*b < 0) { r + b } else { r }))
            }
            _ => {
                if right.as_f64() == Some(0.0) && left.as_f64().is_some() {
                    return Err("ZeroDivisionError: float modulo".into());
                }
                float_op(left, right, "%", |a, b| {
                    let r = a % b;
                    if r != 0.0 && (r < 0.0) != (b < 0.0) {
                        r + b
                    } else {
                        r
                    }
                })
            }
        },
        BinOp::Eq => Ok(Value::Bool(left.loose_eq(right))),
        BinOp::Ne => Ok(Value::Bool(!left.loose_eq(right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let symbol = match op {
                BinOp::Lt => "<",
                BinOp::Le => "<=",
                BinOp::Gt => ">",
                _ => ">=",
            };
            let ordering = left.compare(right).ok_or_else(|| {
                format!(
                    "TypeError: '{symbol}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                )
            })?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
    }
}

fn check_string_size(bytes: Option<usize>) -> Result<(), String> {
    match bytes {
        None => Err("OverflowError: repeated string is too long".into()),
        Some(bytes) if bytes > MAX_STRING_BYTES => Err(format!(
            "MemoryError: string of {bytes} bytes exceeds the {MAX_STRING_BYTES} byte limit"
        )),
        Some(_) => Ok(()),
    }
}

fn float_op(
    left: &Value,
    right: &Value,
    symbol: &str,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, String> {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(type_error(symbol, left, right)),
    }
}

fn arity(function: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        Err(format!(
            "TypeError: {function}() takes {min}..={max} arguments ({} given)",
            args.len()
        ))
    } else {
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn call(function: &str, args: &[Value], out: &mut String) -> Result<Value, Flow> {
    match function {
        "print" => {
            let line = args
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" ");
            out.push_str(&line);
            out.push('\n');
            Ok(Value::None)
        }
        "str" => {
            arity(function, args, 1, 1)?;
            Ok(Value::Str(args[0].to_string()))
        }
        "type" => {
            arity(function, args, 1, 1)?;
            Ok(Value::Str(args[0].type_name().to_owned()))
        }
        "len" => {
            arity(function, args, 1, 1)?;
            match &args[0] {
                Value::Str(s) => Ok(Value::Int(i64::try_from(s.chars().count()).unwrap_or(i64::MAX))),
                other => Err(format!(
                    "TypeError: object of type '{}' has no len()",
                    other.type_name()
                )
                .into()),
            }
        }
        "abs" => {
            arity(function, args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| Flow::Error("OverflowError: integer overflow".into())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(format!(
                    "TypeError: bad operand type for abs(): '{}'",
                    other.type_name()
                )
                .into()),
            }
        }
        "int" => {
            arity(function, args, 1, 1)?;
            match &args[0] {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(f) if f.is_finite() && f.abs() < 9.2e18 => {
                    Ok(Value::Int(f.trunc() as i64))
                }
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    Flow::Error(format!("ValueError: invalid literal for int(): '{s}'"))
                }),
                other => Err(format!(
                    "TypeError: int() argument must be a number or string, not '{}'",
                    other.type_name()
                )
                .into()),
            }
        }
        "float" => {
            arity(function, args, 1, 1)?;
            match &args[0] {
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    Flow::Error(format!("ValueError: could not convert string to float: '{s}'"))
                }),
                other => other.as_f64().map(Value::Float).ok_or_else(|| {
                    Flow::Error(format!(
                        "TypeError: float() argument must be a number or string, not '{}'",
                        other.type_name()
                    ))
                }),
            }
        }
        "sleep" => {
            arity(function, args, 1, 1)?;
            let seconds = args[0].as_f64().ok_or_else(|| {
                Flow::Error("TypeError: sleep() argument must be a number".into())
            })?;
            if seconds > 0.0 {
                std::thread::sleep(Duration::from_secs_f64(seconds.min(MAX_SLEEP_SECONDS)));
            }
            Ok(Value::None)
        }
        "exit" => {
            arity(function, args, 0, 1)?;
            let code = match args.first() {
                None => 0,
                Some(Value::Int(code)) => i32::try_from(*code).unwrap_or(1),
                Some(_) => 1,
            };
            Err(Flow::Exit(code))
        }
        other => Err(name_error(other).into()),
    }
}
