use std::collections::HashSet;

use tracing::debug;

use super::{Event, EventPayload, Machine};
use crate::debug_info::Position;
use crate::value::{StepId, Value};

pub type WatchId = u32;

/// Breakpoint step sets, one per machine of the loaded program.
#[derive(Debug, Clone, Default)]
pub struct Breakpoints {
    per_machine: Vec<HashSet<StepId>>,
}

impl Breakpoints {
    pub fn resize(&mut self, machines: usize) {
        self.per_machine = vec![HashSet::new(); machines];
    }

    /// Returns whether the breakpoint is set after the toggle.
    pub fn toggle(&mut self, machine_id: usize, step: StepId) -> bool {
        match self.per_machine.get_mut(machine_id) {
            Some(set) => {
                if set.insert(step) {
                    true
                } else {
                    set.remove(&step);
                    false
                }
            }
            None => false,
        }
    }

    pub fn is_set(&self, machine_id: usize, step: StepId) -> bool {
        self.per_machine
            .get(machine_id)
            .is_some_and(|set| set.contains(&step))
    }

    pub fn any(&self) -> bool {
        self.per_machine.iter().any(|set| !set.is_empty())
    }

    pub fn clear(&mut self) {
        for set in &mut self.per_machine {
            set.clear();
        }
    }
}

impl Machine {
    /// Flip the breakpoint on a source line. The line binds to the
    /// outermost machine that has a step starting there.
    pub fn toggle_breakpoint(&mut self, line: u32) -> Option<(usize, StepId)> {
        let (machine_id, step) = self.debug_info.line_to_machine_pos(line)?;
        self.has_breakpoints = true;
        let on = self.breakpoints.toggle(machine_id, step);
        debug!(line, machine_id, step, on, "breakpoint toggled");
        Some((machine_id, step))
    }

    /// Checked by transformed code before executing a step.
    pub fn break_at(&self, machine_id: usize, step: StepId) -> bool {
        self.has_breakpoints && self.breakpoints.is_set(machine_id, step)
    }

    pub fn enable_breakpoints(&mut self) {
        self.has_breakpoints = true;
    }

    pub fn disable_breakpoints(&mut self) {
        self.has_breakpoints = false;
    }

    pub fn breakpoints_enabled(&self) -> bool {
        self.has_breakpoints
    }

    pub fn breakpoints(&self) -> &Breakpoints {
        &self.breakpoints
    }

    /// Anchor a watch to the step whose span covers the given source range.
    pub fn set_watch(&mut self, start: Position, end: Position) -> Option<WatchId> {
        let (machine_id, step) = self.debug_info.closest_machine_pos(start, end)?;
        let id = self.next_watch_id;
        self.next_watch_id += 1;
        self.watches.insert((machine_id, step), id);
        debug!(machine_id, step, id, "watch set");
        Some(id)
    }

    /// Called by transformed code when a watchable step produced a value.
    /// No-op unless a watch is anchored there.
    pub fn handle_watch(&mut self, machine_id: usize, step: StepId, value: Value) {
        if let Some(&id) = self.watches.get(&(machine_id, step)) {
            self.fire(Event::Watched, EventPayload::Watch { id, value });
        }
    }
}
