use std::fmt;
use std::rc::Rc;

use crate::frame::Frame;

/// Step address inside one transformed function.
pub type StepId = u32;

/// Values flowing through a guest program.
///
/// `ResumeAddr` only ever appears in the temp slots that chain finally
/// blocks; guest expressions never produce it.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    ResumeAddr(Option<StepId>),
    Continuation(Rc<Continuation>),
}

impl Value {
    pub fn as_num(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(true) => 1.0,
            _ => 0.0,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::ResumeAddr(_) | Value::Continuation(_) => true,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::ResumeAddr(a), Value::ResumeAddr(b)) => a == b,
            // continuations compare by identity
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Num(n) => {
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Str(s) => write!(f, "{}", s),
            Value::ResumeAddr(Some(step)) => write!(f, "<resume @{}>", step),
            Value::ResumeAddr(None) => write!(f, "<resume end>"),
            Value::Continuation(_) => write!(f, "<continuation>"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Num(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

/// A captured rest-of-computation: a deep snapshot of the frame chain that
/// was live at the capture point, plus where the chain resumes when the
/// continuation is applied and which temp slot receives the argument.
#[derive(Debug)]
pub struct Continuation {
    pub frames: Vec<Frame>,
    pub resume_next: Option<StepId>,
    pub arg_slot: String,
}
