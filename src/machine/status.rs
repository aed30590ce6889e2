use std::fmt;

use thiserror::Error;
use tracing::{debug, warn};

use super::{Event, EventPayload, Machine};
use crate::frame::Frame;
use crate::signal::{Signal, StepOutcome};
use crate::value::Value;

/// Controller lifecycle. `Executing` only shows up while guest code is on
/// the host call stack; callers observe `Idle` or `Suspended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Suspended,
    Executing,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Idle => write!(f, "idle"),
            State::Suspended => write!(f, "suspended"),
            State::Executing => write!(f, "executing"),
        }
    }
}

#[derive(Debug, Error)]
pub enum VmError {
    /// A guest value was thrown and no frame had a handler for it. The
    /// machine stays suspended with the unwound frames inspectable.
    #[error("uncaught guest exception: {0}")]
    UncaughtException(Value),
    #[error("no program loaded")]
    NotLoaded,
    #[error("unknown function id {0}")]
    UnknownFunction(usize),
    #[error("nothing to evaluate against")]
    InvalidEvalState,
    #[error("runtime protocol violation: {0}")]
    Protocol(&'static str),
}

impl Machine {
    /// Record what a propagated signal left behind. `check_status` decides
    /// what to do with it.
    pub(crate) fn install_signal(&mut self, sig: Signal) {
        match sig {
            Signal::Pause(frames) => {
                self.error = None;
                self.stack = Some(frames);
            }
            Signal::Capture(frames) => {
                self.error = None;
                self.capturing = true;
                self.stack = Some(frames);
            }
            Signal::Invoke { target, frames } => {
                self.error = None;
                self.invoking = Some(target);
                self.stack = Some(frames);
            }
            Signal::Error { error, frames } => {
                self.error = Some(error);
                self.stack = Some(frames);
            }
        }
    }

    /// Settle the machine after guest code handed control back.
    ///
    /// Priority when frames are present: continuation capture, then
    /// continuation invocation, then error dispatch, then a plain pause.
    /// With no frames the program finished.
    pub(crate) fn check_status(&mut self, suppress_events: bool) -> Result<(), VmError> {
        let has_frames = self.stack.as_ref().is_some_and(|s| !s.is_empty());
        if !has_frames {
            self.stack = None;
        }

        if has_frames {
            if self.capturing {
                self.capturing = false;
                return self.on_capture();
            }

            if let Some(target) = self.invoking.take() {
                return self.on_invoke(target);
            }

            if self.error.is_some() {
                if self.dispatch_exception()? {
                    return Ok(());
                }
                if !suppress_events {
                    let error = self.error.clone().unwrap_or_default();
                    self.state = State::Suspended;
                    self.running = false;
                    return Err(VmError::UncaughtException(error));
                }
            } else if !suppress_events {
                self.fire(Event::Paused, EventPayload::None);
            }

            self.state = State::Suspended;
        } else {
            if !suppress_events {
                self.fire(Event::Finish, EventPayload::None);
            }
            self.state = State::Idle;
            if let Some(error) = self.error.take() {
                // unwound past every frame
                self.running = false;
                return Err(VmError::UncaughtException(error));
            }
        }

        self.running = false;
        Ok(())
    }

    /// Reify the suspended chain into a continuation value.
    ///
    /// The chain resumes one step past the call/cc site with the
    /// continuation bound to the call's temp slot; the captured snapshot
    /// resumes two steps past it with the applied argument in the next slot.
    pub(crate) fn on_capture(&mut self) -> Result<(), VmError> {
        let mut frames = self
            .stack
            .take()
            .ok_or(VmError::Protocol("capture without a stack"))?;

        let (resume_next, arg_slot, cont_slot) = {
            let top = frames
                .first_mut()
                .ok_or(VmError::Protocol("capture with an empty stack"))?;
            let cur = top
                .next
                .ok_or(VmError::Protocol("capture at an unknown step"))?;
            let resume_next = self.debug_info.step_id_after(top.machine_id, cur, 2);
            top.next = self.debug_info.step_id_after(top.machine_id, cur, 1);
            let arg_slot = format!("$__t{}", top.tmp_id);
            let cont_slot = format!("$__t{}", top.tmp_id.saturating_sub(1));
            (resume_next, arg_slot, cont_slot)
        };

        let snapshot = frames.clone();
        debug!(frames = snapshot.len(), resume = ?resume_next, "continuation captured");
        let cont = Value::Continuation(std::rc::Rc::new(crate::value::Continuation {
            frames: snapshot,
            resume_next,
            arg_slot,
        }));
        if let Some(top) = frames.first_mut() {
            top.locals.insert(cont_slot, cont);
        }
        self.stack = Some(frames);
        self.restore(false)
    }

    /// Replace the current chain with a continuation's snapshot and resume,
    /// unless a stepping session wants to stay paused at the landing point.
    pub(crate) fn on_invoke(&mut self, target: Vec<Frame>) -> Result<(), VmError> {
        debug!(frames = target.len(), "continuation invoked");
        self.stack = Some(target);
        self.fire(Event::ContInvoked, EventPayload::None);

        if !self.stepping {
            self.running = true;
            self.state = State::Executing;
            self.restore(false)
        } else {
            self.state = State::Suspended;
            self.running = false;
            Ok(())
        }
    }

    /// Walk the suspended chain innermost first looking for a handler.
    /// Frames walked over are discarded; finally-only frames run their
    /// cleanup on the way. Returns whether a catch took the error.
    pub(crate) fn dispatch_exception(&mut self) -> Result<bool, VmError> {
        let exc = match self.error.clone() {
            Some(error) => error,
            None => return Ok(false),
        };
        debug!(error = %exc, "dispatching guest exception");

        let prev_stepping = self.stepping;
        self.stepping = false;

        let mut stack = match self.stack.take() {
            Some(stack) => stack,
            None => {
                self.stepping = prev_stepping;
                return Ok(false);
            }
        };

        let mut handler = None;
        for (i, frame) in stack.iter_mut().enumerate() {
            if frame.dispatch_exception(self, &exc) {
                handler = Some(i);
                break;
            }
        }
        if let Some(i) = handler {
            stack.drain(..i);
        }
        self.stack = Some(stack);
        self.stepping = prev_stepping;

        if handler.is_none() {
            return Ok(false);
        }

        self.error = None;
        if prev_stepping {
            // leave the user paused at the handler
            self.state = State::Suspended;
            self.running = false;
        } else {
            self.restore(false)?;
        }
        Ok(true)
    }

    /// Drive one frame to completion outside the suspended chain. Used for
    /// finally blocks in frames the unwind is about to discard.
    pub(crate) fn run_frame_alone(&mut self, frame: Frame) {
        self.push_state();
        let prev_stack = self.stack.take();
        let prev_do_restore = self.do_restore;

        let machine_id = frame.machine_id;
        let this_value = frame.this_value.clone();
        self.stack = Some(vec![frame]);
        self.do_restore = true;

        match self.resolve_fn(machine_id) {
            Ok(func) => {
                if let StepOutcome::Signal(Signal::Error { error, .. }) =
                    func.call(self, this_value, Vec::new())
                {
                    warn!(%error, "cleanup block failed during unwind");
                }
            }
            Err(err) => warn!(%err, "cleanup frame could not be resolved"),
        }

        self.stack = prev_stack;
        self.do_restore = prev_do_restore;
        self.pop_state();
    }
}
