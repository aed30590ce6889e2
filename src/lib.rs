//! Execution engine for programs transformed into explicit steppable form.
//!
//! Transformed functions never suspend through the native call stack; they
//! return a typed signal carrying their frame chain instead. The
//! [`Machine`] controller owns those suspended chains and drives
//! resumption, continuation capture and invocation, exception dispatch
//! across suspended frames, breakpoints, stepping, and an event surface
//! with deferred delivery.

pub mod debug_info;
pub mod frame;
pub mod machine;
pub mod program;
pub mod sample;
pub mod signal;
pub mod value;

pub use debug_info::{DebugInfo, Position, SourceLoc};
pub use frame::{Frame, TryRegion};
pub use machine::{Event, EventPayload, HandlerId, Machine, State, VmError, WatchId};
pub use program::{CompiledExpr, Program, TransformedFn, STEP_EVAL};
pub use signal::{Signal, StepOutcome};
pub use value::{Continuation, StepId, Value};
