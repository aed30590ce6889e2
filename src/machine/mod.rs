mod breakpoints;
mod events;
mod status;

use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

pub use breakpoints::{Breakpoints, WatchId};
pub use events::{Event, EventPayload, HandlerId};
pub use status::{State, VmError};

use crate::debug_info::{DebugInfo, SourceLoc};
use crate::frame::Frame;
use crate::program::{CompiledExpr, Program, TransformedFn, STEP_EVAL};
use crate::signal::{Signal, StepOutcome};
use crate::value::{Continuation, StepId, Value};
use events::EventBus;

/// The controller. Owns the suspended frame stack and drives every
/// transition between running guest code and the host.
///
/// Invariant at every public API boundary: the stack is non-empty exactly
/// when the state is [`State::Suspended`].
pub struct Machine {
    pub(crate) program: Option<Program>,
    pub(crate) debug_info: DebugInfo,
    /// Suspended frames, innermost first. `None` when nothing is suspended.
    pub(crate) stack: Option<Vec<Frame>>,
    pub(crate) error: Option<Value>,
    pub(crate) state: State,
    pub(crate) running: bool,
    pub(crate) stepping: bool,
    pub(crate) do_restore: bool,
    pub(crate) capturing: bool,
    pub(crate) invoking: Option<Vec<Frame>>,
    pub(crate) has_breakpoints: bool,
    pub(crate) breakpoints: Breakpoints,
    pub(crate) watches: HashMap<(usize, StepId), WatchId>,
    pub(crate) next_watch_id: WatchId,
    pub(crate) prev_states: Vec<(bool, bool)>,
    pub(crate) events: EventBus,
    pub(crate) output: String,
    pub(crate) eval_arg: Option<CompiledExpr>,
    pub(crate) eval_result: Option<Value>,
}

impl Default for Machine {
    fn default() -> Machine {
        Machine::new()
    }
}

impl Machine {
    pub fn new() -> Machine {
        Machine {
            program: None,
            debug_info: DebugInfo::default(),
            stack: None,
            error: None,
            state: State::Idle,
            running: false,
            stepping: false,
            do_restore: false,
            capturing: false,
            invoking: None,
            has_breakpoints: false,
            breakpoints: Breakpoints::default(),
            watches: HashMap::new(),
            next_watch_id: 0,
            prev_states: Vec::new(),
            events: EventBus::default(),
            output: String::new(),
            eval_arg: None,
            eval_result: None,
        }
    }

    /// Install a program, resetting any prior session state. Event handlers
    /// survive a reload.
    pub fn load(&mut self, program: Program) {
        debug!(
            program = %program.name,
            machines = program.debug_info.machine_count(),
            "program loaded"
        );
        self.breakpoints.resize(program.debug_info.machine_count());
        self.watches.clear();
        self.debug_info = program.debug_info.clone();
        self.stack = None;
        self.error = None;
        self.state = State::Idle;
        self.running = false;
        self.stepping = false;
        self.do_restore = false;
        self.capturing = false;
        self.invoking = None;
        self.prev_states.clear();
        self.output.clear();
        self.eval_result = None;
        self.program = Some(program);
    }

    /// Run the loaded program's entry function from the top.
    pub fn run(&mut self) -> Result<Value, VmError> {
        let entry = {
            let program = self.program.as_ref().ok_or(VmError::NotLoaded)?;
            debug!(program = %program.name, "run");
            program
                .fns
                .get(program.entry)
                .cloned()
                .ok_or(VmError::UnknownFunction(program.entry))?
        };
        self.output.clear();
        self.execute(entry, Value::Null, Vec::new())
    }

    /// Call a guest function from the host. When the machine is suspended
    /// the paused computation is left untouched; a guest error is surfaced
    /// as an `error` event instead of unwinding the session.
    pub fn execute(
        &mut self,
        func: Rc<dyn TransformedFn>,
        this_value: Value,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        let prev_state = self.state;
        let prev_stepping = self.stepping;
        let saved_stack = if prev_state == State::Suspended {
            self.stack.take()
        } else {
            None
        };

        self.state = State::Executing;
        self.running = true;
        self.stepping = false;

        let outcome = func.call(self, this_value, args);
        self.stepping = prev_stepping;

        let ret = match outcome {
            StepOutcome::Return(value) => {
                self.error = None;
                value
            }
            StepOutcome::Signal(sig) => {
                self.install_signal(sig);
                Value::Null
            }
        };

        if prev_state == State::Suspended {
            // Whatever the side computation did, the suspended session wins.
            if let Some(error) = self.error.take() {
                self.fire(Event::Error, EventPayload::Value(error));
            }
            self.stack = saved_stack;
            self.capturing = false;
            self.invoking = None;
            self.state = State::Suspended;
            self.running = false;
            Ok(ret)
        } else {
            self.check_status(false)?;
            Ok(ret)
        }
    }

    /// Resume a suspended machine until the next breakpoint or completion.
    pub fn continue_execution(&mut self) -> Result<(), VmError> {
        if self.state != State::Suspended {
            return Ok(());
        }
        self.fire(Event::Resumed, EventPayload::None);

        let parked_on_breakpoint = match self.stack.as_ref().and_then(|s| s.first()) {
            Some(top) => match top.next {
                Some(step) => self.break_at(top.machine_id, step),
                None => false,
            },
            None => false,
        };

        self.running = true;
        self.state = State::Executing;

        if parked_on_breakpoint {
            // Step silently past the instruction we are parked on, otherwise
            // resuming would trip the same breakpoint again.
            self.stepping = true;
            self.has_breakpoints = false;
            let res = self.restore(true);
            self.has_breakpoints = true;
            self.stepping = false;
            res?;

            if self.stack.is_none() {
                // the breakpoint sat on the final instruction
                self.fire(Event::Finish, EventPayload::None);
                self.state = State::Idle;
                self.running = false;
                return Ok(());
            }
        }

        self.running = true;
        self.state = State::Executing;
        self.restore(false)
    }

    /// Execute a single mapped step. Unmapped (synthetic) step addresses are
    /// stepped through silently so the user only ever lands on real source.
    pub fn step(&mut self) -> Result<(), VmError> {
        if self.stack.is_none() {
            return Ok(());
        }
        self.fire(Event::Resumed, EventPayload::None);

        self.single_step()?;
        while self.state == State::Suspended && self.location().is_none() {
            self.single_step()?;
        }

        if self.state == State::Suspended {
            self.running = false;
            self.fire(Event::Paused, EventPayload::None);
        }
        Ok(())
    }

    fn single_step(&mut self) -> Result<(), VmError> {
        self.running = true;
        self.stepping = true;
        self.has_breakpoints = false;
        let res = self.restore(true);
        self.has_breakpoints = true;
        self.stepping = false;
        res
    }

    /// Step without descending into calls: run until execution leaves the
    /// smallest enclosing statement of the current location.
    pub fn step_over(&mut self) -> Result<(), VmError> {
        if self.stack.is_none() {
            return Ok(());
        }
        let cur = match self.location() {
            Some(loc) => loc,
            None => return self.step(),
        };
        let machine_id = match self.stack.as_ref().and_then(|s| s.first()) {
            Some(top) => top.machine_id,
            None => return Ok(()),
        };
        let enclosing = match self.debug_info.enclosing_region(machine_id, &cur) {
            Some(loc) => loc,
            None => return self.step(),
        };

        loop {
            self.step()?;
            if self.state != State::Suspended {
                return Ok(());
            }
            if self.location() == Some(enclosing) {
                return self.step();
            }
        }
    }

    /// Drive the suspended stack from its root frame. Each transformed
    /// function pops its own frame on the way down; popping the last one
    /// clears the restore flag.
    pub(crate) fn restore(&mut self, suppress_events: bool) -> Result<(), VmError> {
        let (machine_id, this_value) = match self.stack.as_ref().and_then(|s| s.last()) {
            Some(root) => (root.machine_id, root.this_value.clone()),
            None => return Err(VmError::Protocol("restore without a suspended stack")),
        };
        let func = self.resolve_fn(machine_id)?;

        self.do_restore = true;
        match func.call(self, this_value, Vec::new()) {
            StepOutcome::Return(_) => {
                self.error = None;
            }
            StepOutcome::Signal(sig) => self.install_signal(sig),
        }
        self.check_status(suppress_events)
    }

    /// Evaluate a debugger expression, either in the top suspended frame or,
    /// when idle, against the entry function's scope.
    pub fn evaluate(&mut self, expr: CompiledExpr) -> Result<Value, VmError> {
        if self.stack.is_some() {
            let prev_stepping = self.stepping;
            self.running = true;
            self.do_restore = true;
            self.stepping = false;
            let res = self.frame_evaluate(expr);
            self.stepping = prev_stepping;
            self.do_restore = false;
            self.running = false;
            res
        } else if self.program.is_some() {
            self.idle_evaluate(expr)
        } else {
            Err(VmError::InvalidEvalState)
        }
    }

    /// Run the top frame alone at the eval address. The function hands back
    /// a replacement frame whose resume address is patched to the original,
    /// so the session continues as if nothing happened.
    fn frame_evaluate(&mut self, expr: CompiledExpr) -> Result<Value, VmError> {
        self.eval_arg = Some(expr);
        self.error = None;

        let mut rest = self
            .stack
            .take()
            .ok_or(VmError::Protocol("evaluate without a suspended stack"))?;
        if rest.is_empty() {
            return Err(VmError::Protocol("evaluate with an empty stack"));
        }
        let mut top = rest.remove(0);
        let prev_next = top.next;
        let machine_id = top.machine_id;
        let this_value = top.this_value.clone();
        top.next = Some(STEP_EVAL);
        self.stack = Some(vec![top]);

        let func = match self.resolve_fn(machine_id) {
            Ok(func) => func,
            Err(err) => {
                // put the frame back untouched
                if let Some(mut frames) = self.stack.take() {
                    if let Some(mut top) = frames.pop() {
                        top.next = prev_next;
                        rest.insert(0, top);
                    }
                }
                self.stack = Some(rest);
                return Err(err);
            }
        };

        let outcome = func.call(self, this_value, Vec::new());
        let res = match outcome {
            StepOutcome::Signal(Signal::Pause(frames)) => match frames.into_iter().next() {
                Some(mut fresh) => {
                    fresh.next = prev_next;
                    rest.insert(0, fresh);
                    Ok(self.eval_result.clone().unwrap_or_default())
                }
                None => Err(VmError::Protocol("evaluation did not return a frame")),
            },
            StepOutcome::Signal(Signal::Error { error, frames }) => {
                if let Some(mut fresh) = frames.into_iter().next() {
                    fresh.next = prev_next;
                    rest.insert(0, fresh);
                }
                Err(VmError::UncaughtException(error))
            }
            _ => Err(VmError::Protocol("evaluation did not return a frame")),
        };
        self.stack = Some(rest);
        res
    }

    /// Nothing suspended: evaluate against a synthetic single-frame stack
    /// over the entry function.
    fn idle_evaluate(&mut self, expr: CompiledExpr) -> Result<Value, VmError> {
        let (entry_id, func) = {
            let program = self.program.as_ref().ok_or(VmError::NotLoaded)?;
            let func = program
                .fns
                .get(program.entry)
                .cloned()
                .ok_or(VmError::UnknownFunction(program.entry))?;
            (program.entry, func)
        };

        self.eval_arg = Some(expr);
        self.error = None;
        let prev_stepping = self.stepping;
        self.stepping = true;

        let frame = Frame::new(entry_id, func.name(), Some(STEP_EVAL), Value::Null);
        self.stack = Some(vec![frame]);
        self.do_restore = true;
        let outcome = func.call(self, Value::Null, Vec::new());
        self.do_restore = false;
        self.stack = None;
        self.stepping = prev_stepping;

        match outcome {
            StepOutcome::Signal(Signal::Error { error, .. }) => {
                Err(VmError::UncaughtException(error))
            }
            _ => Ok(self.eval_result.clone().unwrap_or_default()),
        }
    }

    /// Start of the capture protocol. The calling function pushes its own
    /// frame, pointed at the call/cc step, before forwarding the signal.
    pub fn call_cc(&self) -> Signal {
        debug!("continuation capture requested");
        Signal::Capture(Vec::new())
    }

    /// The signal a running transformed function forwards to apply a
    /// continuation. Current frames accumulate on it but are discarded when
    /// the target chain replaces them.
    pub fn continuation_signal(&self, cont: &Continuation, arg: Value) -> Signal {
        Signal::Invoke {
            target: continuation_target(cont, arg),
            frames: Vec::new(),
        }
    }

    /// Apply a continuation from the host, outside any guest execution.
    pub fn apply_continuation(&mut self, cont: &Continuation, arg: Value) -> Result<(), VmError> {
        if self.running {
            return Err(VmError::Protocol(
                "apply_continuation while executing; forward the signal instead",
            ));
        }
        let target = continuation_target(cont, arg);
        self.on_invoke(target)
    }

    /// True while transformed functions should rebuild themselves from
    /// suspended frames instead of starting fresh.
    pub fn restoring(&self) -> bool {
        self.do_restore
    }

    /// Pop the calling function's own frame during a restore descent.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        let stack = self.stack.as_mut()?;
        let frame = stack.pop();
        if stack.is_empty() {
            self.stack = None;
            self.do_restore = false;
        }
        frame
    }

    /// Re-enter the suspended callee sitting below the caller's frame.
    pub fn restore_next_frame(&mut self) -> StepOutcome {
        let (machine_id, this_value) = match self.stack.as_ref().and_then(|s| s.last()) {
            Some(frame) => (frame.machine_id, frame.this_value.clone()),
            None => {
                return StepOutcome::Signal(Signal::Error {
                    error: Value::Str("no callee frame to restore".into()),
                    frames: Vec::new(),
                })
            }
        };
        match self.resolve_fn(machine_id) {
            Ok(func) => func.call(self, this_value, Vec::new()),
            Err(err) => StepOutcome::Signal(Signal::Error {
                error: Value::Str(err.to_string()),
                frames: Vec::new(),
            }),
        }
    }

    /// Fresh call into another function of the loaded program.
    pub fn call_function(&mut self, machine_id: usize, this_value: Value, args: Vec<Value>) -> StepOutcome {
        match self.resolve_fn(machine_id) {
            Ok(func) => func.call(self, this_value, args),
            Err(err) => StepOutcome::Signal(Signal::Error {
                error: Value::Str(err.to_string()),
                frames: Vec::new(),
            }),
        }
    }

    pub(crate) fn resolve_fn(&self, machine_id: usize) -> Result<Rc<dyn TransformedFn>, VmError> {
        let program = self.program.as_ref().ok_or(VmError::NotLoaded)?;
        program
            .fns
            .get(machine_id)
            .cloned()
            .ok_or(VmError::UnknownFunction(machine_id))
    }

    /// Save stepping and breakpoint flags and silence both, for host work
    /// that must not disturb the session.
    pub fn push_state(&mut self) {
        self.prev_states.push((self.stepping, self.has_breakpoints));
        self.stepping = false;
        self.has_breakpoints = false;
    }

    pub fn pop_state(&mut self) {
        if let Some((stepping, has_breakpoints)) = self.prev_states.pop() {
            self.stepping = stepping;
            self.has_breakpoints = has_breakpoints;
        }
    }

    /// Drop the whole session, program included.
    pub fn abort(&mut self) {
        debug!("abort");
        self.program = None;
        self.stack = None;
        self.error = None;
        self.state = State::Idle;
        self.running = false;
        self.stepping = false;
        self.do_restore = false;
        self.capturing = false;
        self.invoking = None;
        self.output.clear();
        self.eval_arg = None;
    }

    /// Append a line of guest output.
    pub fn print(&mut self, line: impl AsRef<str>) {
        self.output.push_str(line.as_ref());
        self.output.push('\n');
    }

    // accessors

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_stepping(&self) -> bool {
        self.stepping
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    /// Result of the most recent `evaluate`.
    pub fn eval_result(&self) -> Value {
        self.eval_result.clone().unwrap_or_default()
    }

    pub fn set_eval_result(&mut self, value: Value) {
        self.eval_result = Some(value);
    }

    /// Taken by a transformed function resumed at the eval address.
    pub fn take_eval_arg(&mut self) -> Option<CompiledExpr> {
        self.eval_arg.take()
    }

    /// Suspended frames, innermost first; empty when nothing is suspended.
    pub fn stack_frames(&self) -> &[Frame] {
        self.stack.as_deref().unwrap_or(&[])
    }

    /// Source span of the top frame's resume address, if it maps anywhere.
    pub fn location(&self) -> Option<SourceLoc> {
        let top = self.stack.as_ref()?.first()?;
        self.debug_info.loc(top.machine_id, top.next?)
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn debug_info(&self) -> &DebugInfo {
        &self.debug_info
    }
}

fn continuation_target(cont: &Continuation, arg: Value) -> Vec<Frame> {
    let mut target: Vec<Frame> = cont.frames.clone();
    if let Some(top) = target.first_mut() {
        top.next = cont.resume_next;
        top.locals.insert(cont.arg_slot.clone(), arg);
    }
    target
}
