use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::debug_info::DebugInfo;
use crate::machine::Machine;
use crate::signal::StepOutcome;
use crate::value::{StepId, Value};

/// Out-of-band step address used by the evaluate protocol. A function
/// resumed here runs the controller's pending expression against its locals
/// instead of executing a compiled step.
pub const STEP_EVAL: StepId = StepId::MAX;

/// One function of a transformed program: a state machine over explicit
/// step addresses.
///
/// The contract with the controller:
/// - a fresh call builds the function's own frame and runs its step loop;
/// - on suspension the function returns a [`crate::signal::Signal`] carrying
///   its frame, and every caller that receives a signal from a callee pushes
///   its own frame before forwarding it;
/// - when the controller restores with `Machine::restoring()` set, each
///   function pops its own frame with `Machine::pop_frame` (the root
///   function is called first and its frame sits at the bottom), and a
///   call-site step re-enters its suspended callee through
///   `Machine::restore_next_frame`.
pub trait TransformedFn {
    /// Index of this function's tables in the debug info.
    fn machine_id(&self) -> usize;

    fn name(&self) -> &str;

    fn call(&self, machine: &mut Machine, this_value: Value, args: Vec<Value>) -> StepOutcome;
}

/// A debugger expression compiled against a frame's scope. The real system
/// produces these from source text; embedders hand us the closure directly.
///
/// The closure may read and write locals. A guest-level failure is reported
/// as `Err` with the thrown value.
#[derive(Clone)]
pub struct CompiledExpr(Rc<dyn Fn(&mut HashMap<String, Value>) -> Result<Value, Value>>);

impl CompiledExpr {
    pub fn new(f: impl Fn(&mut HashMap<String, Value>) -> Result<Value, Value> + 'static) -> CompiledExpr {
        CompiledExpr(Rc::new(f))
    }

    /// Expression reading one local.
    pub fn get(name: &str) -> CompiledExpr {
        let name = name.to_string();
        CompiledExpr::new(move |locals| Ok(locals.get(&name).cloned().unwrap_or_default()))
    }

    /// Expression assigning one local, evaluating to the assigned value.
    pub fn set(name: &str, value: Value) -> CompiledExpr {
        let name = name.to_string();
        CompiledExpr::new(move |locals| {
            locals.insert(name.clone(), value.clone());
            Ok(value.clone())
        })
    }

    pub fn apply(&self, locals: &mut HashMap<String, Value>) -> Result<Value, Value> {
        (self.0)(locals)
    }
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompiledExpr")
    }
}

/// A loaded, steppable program: the function table (indexed by machine id,
/// innermost first, entry last by convention), its debug tables, and the
/// guest source for display.
#[derive(Clone)]
pub struct Program {
    pub name: String,
    pub fns: Vec<Rc<dyn TransformedFn>>,
    pub entry: usize,
    pub debug_info: DebugInfo,
    pub source: String,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.name)
            .field("fns", &self.fns.len())
            .field("entry", &self.entry)
            .finish()
    }
}
