//! The control-transfer value a transformed function hands back instead of
//! unwinding the native call stack.
//!
//! Every variant carries the chain of suspended frames, innermost first.
//! While a signal propagates out of nested guest calls, each caller pushes
//! its own frame before forwarding it, so by the time the controller sees
//! the signal the chain describes the whole suspended computation.

use crate::frame::Frame;
use crate::value::Value;

#[derive(Debug)]
pub enum Signal {
    /// Suspend at the top frame's resume address (breakpoint or step pause).
    Pause(Vec<Frame>),
    /// A call/cc site wants the current frame chain reified.
    Capture(Vec<Frame>),
    /// A continuation is being applied; `target` replaces the current chain.
    Invoke { target: Vec<Frame>, frames: Vec<Frame> },
    /// A guest value was thrown and no local handler consumed it.
    Error { error: Value, frames: Vec<Frame> },
}

impl Signal {
    /// Append the caller's frame while the signal unwinds outward.
    pub fn push_frame(mut self, frame: Frame) -> Signal {
        self.frames_mut().push(frame);
        self
    }

    fn frames_mut(&mut self) -> &mut Vec<Frame> {
        match self {
            Signal::Pause(frames)
            | Signal::Capture(frames)
            | Signal::Invoke { frames, .. }
            | Signal::Error { frames, .. } => frames,
        }
    }
}

/// What one invocation of a transformed function produced.
#[derive(Debug)]
pub enum StepOutcome {
    /// The function ran to its end and returned a guest value.
    Return(Value),
    /// The function suspended; the signal says how.
    Signal(Signal),
}

impl From<Signal> for StepOutcome {
    fn from(sig: Signal) -> StepOutcome {
        StepOutcome::Signal(sig)
    }
}
