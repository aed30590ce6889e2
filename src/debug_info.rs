use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::StepId;

/// A point in guest source, 1-based line, 1-based column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Position {
        Position { line, column }
    }
}

/// Source span a step address was compiled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    pub start: Position,
    pub end: Position,
}

impl SourceLoc {
    /// Whether `self` covers all of `other`.
    fn contains(&self, other: &SourceLoc) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// How much wider `self` is than the contained span `inner`.
    fn distance_around(&self, inner: &SourceLoc) -> u64 {
        u64::from(inner.start.line.saturating_sub(self.start.line))
            + u64::from(self.end.line.saturating_sub(inner.end.line))
            + u64::from(inner.start.column.saturating_sub(self.start.column))
            + u64::from(self.end.column.saturating_sub(inner.end.column))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MachineDebug {
    /// Step address to source span. Synthetic steps have no entry.
    #[serde(default)]
    pub locs: BTreeMap<StepId, SourceLoc>,
}

/// Immutable mapping tables emitted alongside a transformed program.
///
/// Machines are ordered innermost to top-level, matching the order the
/// compiler emits nested functions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugInfo {
    #[serde(default)]
    pub machines: Vec<MachineDebug>,
    /// Per machine, every step address in execution order. Relative lookups
    /// (capture resume points) index into these lists.
    #[serde(rename = "stepIds", default)]
    pub step_ids: Vec<Vec<StepId>>,
}

impl DebugInfo {
    pub fn from_json(raw: &str) -> Result<DebugInfo, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn loc(&self, machine_id: usize, step: StepId) -> Option<SourceLoc> {
        self.machines.get(machine_id)?.locs.get(&step).copied()
    }

    /// The step address `offset` places after `step` in the machine's step
    /// order, if the function extends that far.
    pub fn step_id_after(&self, machine_id: usize, step: StepId, offset: usize) -> Option<StepId> {
        let steps = self.step_ids.get(machine_id)?;
        let idx = steps.iter().position(|s| *s == step)?;
        steps.get(idx + offset).copied()
    }

    /// Resolve a source line to a breakable position. Machines are scanned
    /// backwards so a line shared between a nested function and its
    /// enclosing one binds to the outermost machine.
    pub fn line_to_machine_pos(&self, line: u32) -> Option<(usize, StepId)> {
        for (machine_id, machine) in self.machines.iter().enumerate().rev() {
            for (step, loc) in &machine.locs {
                if loc.start.line == line {
                    return Some((machine_id, *step));
                }
            }
        }
        None
    }

    /// Smallest span in `machine_id` strictly containing `cur`. This is the
    /// statement a step-over should leave before pausing again.
    pub fn enclosing_region(&self, machine_id: usize, cur: &SourceLoc) -> Option<SourceLoc> {
        let machine = self.machines.get(machine_id)?;
        let mut best: Option<(u64, SourceLoc)> = None;
        for loc in machine.locs.values() {
            if loc.contains(cur) && loc != cur {
                let dist = loc.distance_around(cur);
                if best.map_or(true, |(b, _)| dist < b) {
                    best = Some((dist, *loc));
                }
            }
        }
        best.map(|(_, loc)| loc)
    }

    /// First position whose span covers `[start, end]`, scanning machines
    /// innermost first. Used to anchor watches.
    pub fn closest_machine_pos(&self, start: Position, end: Position) -> Option<(usize, StepId)> {
        let probe = SourceLoc { start, end };
        for (machine_id, machine) in self.machines.iter().enumerate() {
            for (step, loc) in &machine.locs {
                if loc.contains(&probe) {
                    return Some((machine_id, *step));
                }
            }
        }
        None
    }
}
