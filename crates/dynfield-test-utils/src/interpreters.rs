//! Interpreters for tests

use dynfield_eval::{EvaluationRequest, EvaluationResponse, Interpreter, InterpreterError};
use dynfield_value::ValueType;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Prefix-notation arithmetic: `(+ 1 2)`, `(max 3 (* 2 4))`, `(list 1 2)`, `(str "a" 1)`
///
/// Errors: `syntax error: ...`, `unknown symbol ...`, `division by zero`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArithmeticInterpreter;

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Atom(String),
    Text(String),
    Call(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Datum {
    Int(i64),
    Dec(f64),
    Text(String),
    List(Vec<Datum>),
}

impl Datum {
    fn as_f64(&self) -> Result<f64, String> {
        match self {
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Ok(*n as f64),
            Self::Dec(d) => Ok(*d),
            other => Err(format!("expected a number, got {}", other.render())),
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Dec(d) => d.to_string(),
            Self::Text(s) => s.clone(),
            Self::List(items) => format!("({})", items.iter().map(Self::render).collect::<Vec<_>>().join(" ")),
        }
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Self::Int(n) => json!(n),
            Self::Dec(d) => json!(d),
            Self::Text(s) => json!(s),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Integer,
            Self::Dec(_) => ValueType::Decimal,
            Self::Text(_) => ValueType::String,
            Self::List(_) => ValueType::List,
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' | ')' => tokens.push(c.to_string()),
            '"' => {
                let mut text = String::from('"');
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(ch) => text.push(ch),
                        None => return Err("syntax error: unterminated string".into()),
                    }
                }
                tokens.push(text);
            }
            c if c.is_whitespace() => {}
            c => {
                let mut atom = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' || next == '"' {
                        break;
                    }
                    atom.push(next);
                    chars.next();
                }
                tokens.push(atom);
            }
        }
    }
    Ok(tokens)
}

fn parse(tokens: &[String], pos: &mut usize) -> Result<Expr, String> {
    let token = tokens.get(*pos).ok_or("syntax error: unexpected end of input")?;
    *pos += 1;
    match token.as_str() {
        "(" => {
            let mut items = Vec::new();
            loop {
                match tokens.get(*pos).map(String::as_str) {
                    Some(")") => {
                        *pos += 1;
                        return Ok(Expr::Call(items));
                    }
                    Some(_) => items.push(parse(tokens, pos)?),
                    None => return Err("syntax error: missing ')'".into()),
                }
            }
        }
        ")" => Err("syntax error: unexpected ')'".into()),
        t => Ok(match t.strip_prefix('"') {
            Some(text) => Expr::Text(text.to_string()),
            None => Expr::Atom(t.to_string()),
        }),
    }
}

fn arithmetic(
    op: &str,
    args: &[Datum],
    int: fn(i64, i64) -> Option<i64>,
    dec: fn(f64, f64) -> f64,
) -> Result<Datum, String> {
    let (first, rest) = args
        .split_first()
        .ok_or_else(|| format!("{op} needs at least one argument"))?;
    let mut acc = first.clone();
    for arg in rest {
        acc = match (&acc, arg) {
            (Datum::Int(a), Datum::Int(b)) => Datum::Int(int(*a, *b).ok_or("integer overflow")?),
            _ => Datum::Dec(dec(acc.as_f64()?, arg.as_f64()?)),
        };
    }
    acc.as_f64()?;
    Ok(acc)
}

fn eval(expr: &Expr) -> Result<Datum, String> {
    match expr {
        Expr::Text(s) => Ok(Datum::Text(s.clone())),
        Expr::Atom(atom) => atom
            .parse::<i64>()
            .map(Datum::Int)
            .or_else(|_| atom.parse::<f64>().map(Datum::Dec))
            .map_err(|_| format!("unknown symbol {atom}")),
        Expr::Call(items) => {
            let (head, rest) = items.split_first().ok_or("syntax error: empty call")?;
            let Expr::Atom(op) = head else {
                return Err("syntax error: operator must be a symbol".into());
            };
            let args = rest.iter().map(eval).collect::<Result<Vec<_>, _>>()?;
            match op.as_str() {
                "+" => arithmetic(op, &args, i64::checked_add, |a, b| a + b),
                "*" => arithmetic(op, &args, i64::checked_mul, |a, b| a * b),
                "-" if args.len() == 1 => match &args[0] {
                    Datum::Int(n) => Ok(Datum::Int(-n)),
                    other => Ok(Datum::Dec(-other.as_f64()?)),
                },
                "-" => arithmetic(op, &args, i64::checked_sub, |a, b| a - b),
                "/" => {
                    if args.iter().skip(1).any(|a| a.as_f64().is_ok_and(|v| v == 0.0)) {
                        return Err("division by zero".into());
                    }
                    arithmetic(
                        op,
                        &args,
                        |a, b| if a.checked_rem(b) == Some(0) { a.checked_div(b) } else { None },
                        |a, b| a / b,
                    )
                    .or_else(|_| -> Result<Datum, String> {
                        let values = args.iter().map(Datum::as_f64).collect::<Result<Vec<_>, _>>()?;
                        let (first, rest) = values.split_first().ok_or("/ needs at least one argument")?;
                        Ok(Datum::Dec(rest.iter().fold(*first, |acc, v| acc / v)))
                    })
                }
                "min" => arithmetic(op, &args, |a, b| Some(a.min(b)), f64::min),
                "max" => arithmetic(op, &args, |a, b| Some(a.max(b)), f64::max),
                "list" => Ok(Datum::List(args)),
                "str" => Ok(Datum::Text(args.iter().map(Datum::render).collect())),
                other => Err(format!("unknown symbol {other}")),
            }
        }
    }
}

impl ArithmeticInterpreter {
    /// Evaluate `source` directly
    ///
    /// # Errors
    /// The interpreter's error message
    pub fn run(source: &str) -> Result<(ValueType, JsonValue), String> {
        let tokens = tokenize(source)?;
        let mut pos = 0;
        let expr = parse(&tokens, &mut pos)?;
        if pos != tokens.len() {
            return Err("syntax error: trailing input".into());
        }
        let datum = eval(&expr)?;
        Ok((datum.value_type(), datum.to_json()))
    }
}

#[async_trait::async_trait]
impl Interpreter for ArithmeticInterpreter {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, InterpreterError> {
        Self::run(&request.expression)
            .map(|(kind, value)| EvaluationResponse::new(kind, value))
            .map_err(InterpreterError::Rejected)
    }
}

/// Holds every evaluation until released
///
/// Lets a test interleave edits with an evaluation that is still in flight.
#[derive(Debug)]
pub struct GatedInterpreter {
    inner: Arc<dyn Interpreter>,
    gate: Semaphore,
    calls: AtomicUsize,
}

impl GatedInterpreter {
    /// Gate in front of `inner`, initially closed
    pub fn new(inner: Arc<dyn Interpreter>) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Gate in front of [`ArithmeticInterpreter`]
    pub fn arithmetic() -> Self {
        Self::new(Arc::new(ArithmeticInterpreter))
    }

    /// Let `count` waiting or future evaluations through
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }

    /// Number of evaluations started so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Yield until at least `count` evaluations have started
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl Interpreter for GatedInterpreter {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, InterpreterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| InterpreterError::Transport(e.to_string()))?;
        permit.forget();
        self.inner.evaluate(request).await
    }
}
