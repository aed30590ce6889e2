use std::collections::HashMap;

use tracing::debug;

use crate::machine::Machine;
use crate::value::{StepId, Value};

/// Local slot that carries a dispatched exception into its catch handler.
pub const EXC_SLOT: &str = "$__exc";

/// One entry of a frame's try-region stack. Regions are pushed when the
/// guest enters a protected block, innermost last.
#[derive(Debug, Clone, PartialEq)]
pub enum TryRegion {
    Catch { catch_loc: StepId },
    Finally { finally_loc: StepId, temp_slot: u32 },
}

/// A suspended activation of one transformed function.
///
/// Frames are plain data; the function itself is resolved through the
/// loaded program by `machine_id`, which keeps frames cloneable for
/// continuation snapshots.
#[derive(Debug, Clone)]
pub struct Frame {
    pub machine_id: usize,
    pub name: String,
    /// Step to execute on resume. `None` means fall through to the
    /// function's exit.
    pub next: Option<StepId>,
    pub locals: HashMap<String, Value>,
    pub scope_id: usize,
    pub this_value: Value,
    pub try_stack: Vec<TryRegion>,
    /// High-water mark of the temp slots this function allocates. Capture
    /// addresses the continuation and argument slots relative to it.
    pub tmp_id: u32,
}

impl Frame {
    pub fn new(machine_id: usize, name: impl Into<String>, next: Option<StepId>, this_value: Value) -> Frame {
        Frame {
            machine_id,
            name: name.into(),
            next,
            locals: HashMap::new(),
            scope_id: 0,
            this_value,
            try_stack: Vec::new(),
            tmp_id: 0,
        }
    }

    /// Read a local, treating missing slots as null like the guest would.
    pub fn local(&self, name: &str) -> Value {
        self.locals.get(name).cloned().unwrap_or_default()
    }

    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        self.locals.insert(name.into(), value);
    }

    /// Enter a protected region. The finally entry goes below the catch
    /// entry so an unwind sees the catch first.
    pub fn push_try(&mut self, catch_loc: Option<StepId>, finally_loc: Option<StepId>, finally_temp: Option<u32>) {
        if let Some(finally_loc) = finally_loc {
            self.try_stack.push(TryRegion::Finally {
                finally_loc,
                temp_slot: finally_temp.unwrap_or(0),
            });
        }
        if let Some(catch_loc) = catch_loc {
            self.try_stack.push(TryRegion::Catch { catch_loc });
        }
    }

    /// Leave a catch region, whether by normal fall-through or on entering
    /// the handler.
    pub fn pop_catch(&mut self, catch_loc: StepId) {
        if self.try_stack.last() == Some(&TryRegion::Catch { catch_loc }) {
            self.try_stack.pop();
        }
    }

    /// Leave a finally region from its epilogue step. A catch entry that
    /// belongs to the same region and was never consumed is shed first.
    pub fn pop_finally(&mut self, finally_loc: StepId) {
        if matches!(self.try_stack.last(), Some(TryRegion::Catch { .. })) {
            self.try_stack.pop();
        }
        if matches!(
            self.try_stack.last(),
            Some(TryRegion::Finally { finally_loc: loc, .. }) if *loc == finally_loc
        ) {
            self.try_stack.pop();
        }
    }

    /// Point this frame at its innermost handler for `exc`.
    ///
    /// Scans the try stack innermost first. Finally regions inside the
    /// winning catch are chained in front of it through `ResumeAddr` temp
    /// slots, so the cleanup runs in order before the handler. When only
    /// finally regions exist the frame is driven to completion right here
    /// (it is about to be discarded by the unwind) and `false` is returned
    /// so the walk continues outward.
    pub fn dispatch_exception(&mut self, machine: &mut Machine, exc: &Value) -> bool {
        let mut next: Option<StepId> = None;
        let mut has_caught = false;
        let mut finally_entries: Vec<(StepId, u32)> = Vec::new();

        for entry in self.try_stack.iter().rev() {
            match entry {
                TryRegion::Catch { catch_loc } => {
                    next = Some(*catch_loc);
                    has_caught = true;
                    break;
                }
                TryRegion::Finally { finally_loc, temp_slot } => {
                    finally_entries.push((*finally_loc, *temp_slot));
                }
            }
        }

        if !has_caught && finally_entries.is_empty() {
            return false;
        }

        // Chain outermost finally toward the handler: each finally's temp
        // slot holds where its epilogue jumps afterwards.
        let mut chained = next;
        for (finally_loc, temp_slot) in finally_entries.iter().rev() {
            self.locals
                .insert(format!("$__t{}", temp_slot), Value::ResumeAddr(chained));
            chained = Some(*finally_loc);
        }
        self.next = chained;

        if has_caught {
            self.locals.insert(EXC_SLOT.to_string(), exc.clone());
        }

        debug!(
            frame = %self.name,
            caught = has_caught,
            resume = ?self.next,
            "exception dispatched into frame"
        );

        if !has_caught {
            machine.run_frame_alone(self.clone());
        }

        has_caught
    }
}
