// tests/interactive_simulation.rs
// Simulates interactive debugging sessions end to end: pausing, stepping,
// inspecting, and resuming the way a front end would.

use stepvm::{sample, CompiledExpr, Machine, State, Value, VmError};

#[cfg(test)]
mod interactive_tests {
    use super::*;

    fn start_session(name: &str) -> Machine {
        let program = sample::by_name(name)
            .expect("unknown sample program")
            .expect("embedded debug info should parse");
        let mut machine = Machine::new();
        machine.load(program);
        machine
    }

    fn paused_line(machine: &Machine) -> u32 {
        machine
            .location()
            .expect("paused location should be mapped")
            .start
            .line
    }

    fn read_local(machine: &mut Machine, name: &str) -> Value {
        machine
            .evaluate(CompiledExpr::get(name))
            .expect("evaluation in a paused frame should succeed")
    }

    #[test]
    fn step_into_descends_into_helper() {
        let mut machine = start_session("sum");
        machine.toggle_breakpoint(6);
        machine.run().expect("run to the call site");
        assert_eq!(paused_line(&machine), 6);

        machine.step().expect("step into the call");
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 2, "stepping enters the helper body");

        let names: Vec<&str> = machine
            .stack_frames()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["add", "<top>"]);
        assert_eq!(
            read_local(&mut machine, "b"),
            Value::Num(10.0),
            "arguments are visible in the callee frame"
        );

        machine.continue_execution().expect("run out of the helper");
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn step_over_stays_in_caller() {
        let mut machine = start_session("sum");
        machine.toggle_breakpoint(6);
        machine.run().expect("run to the call site");
        assert_eq!(paused_line(&machine), 6);

        machine.step_over().expect("step over the call");
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 7, "the helper ran without pausing");
        assert_eq!(machine.stack_frames().len(), 1);
        assert_eq!(
            read_local(&mut machine, "total"),
            Value::Num(10.0),
            "the skipped statement still took effect"
        );

        machine.continue_execution().expect("run to completion");
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn step_over_walks_statement_sequence() {
        let mut machine = start_session("sum");
        machine.toggle_breakpoint(5);
        machine.run().expect("run to the first statement");
        assert_eq!(paused_line(&machine), 5);

        let mut lines = Vec::new();
        while machine.state() == State::Suspended {
            machine.step_over().expect("step over");
            if machine.state() == State::Suspended {
                lines.push(paused_line(&machine));
            }
        }

        assert_eq!(
            lines,
            vec![6, 7, 8],
            "step-over never lands inside the helper"
        );
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn step_over_prefers_nearest_enclosing_statement() {
        // the call at 7:11-24 sits inside the assignment at 7:3-25, which
        // itself sits inside the if statement spanning 6:1-8:1
        let mut machine = start_session("branch");
        machine.toggle_breakpoint(7);
        machine.run().expect("run to the nested call");
        let loc = machine.location().expect("paused location should be mapped");
        assert_eq!((loc.start.line, loc.start.column), (7, 11));

        machine.step_over().expect("step over the call");
        assert_eq!(
            machine.state(),
            State::Suspended,
            "leaving the whole if block would have run to completion"
        );
        assert_eq!(
            paused_line(&machine),
            9,
            "step-over exits the assignment, not the if statement"
        );
        assert_eq!(read_local(&mut machine, "total"), Value::Num(10.0));

        machine.continue_execution().expect("run to completion");
        assert_eq!(machine.output(), "total 10\n");
    }

    #[test]
    fn breakpoint_toggled_while_paused_takes_effect() {
        let mut machine = start_session("sum");
        machine.toggle_breakpoint(6);
        machine.run().expect("run to the first breakpoint");
        assert_eq!(paused_line(&machine), 6);

        machine.toggle_breakpoint(8);
        machine.continue_execution().expect("resume to the new breakpoint");
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 8);
        assert_eq!(read_local(&mut machine, "total"), Value::Num(42.0));

        machine.continue_execution().expect("resume to completion");
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn continue_without_breakpoints_runs_to_completion() {
        let mut machine = start_session("sum");
        machine.run().expect("run straight through");
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");

        // resuming an idle machine is a no-op
        machine.continue_execution().expect("idle continue");
        assert_eq!(machine.state(), State::Idle);
    }

    #[test]
    fn quit_and_reload_starts_clean() {
        let mut machine = start_session("sum");
        machine.toggle_breakpoint(6);
        machine.run().expect("run to the breakpoint");
        assert_eq!(machine.state(), State::Suspended);

        machine.abort();
        assert_eq!(machine.state(), State::Idle);
        assert!(matches!(machine.run(), Err(VmError::NotLoaded)));

        let next = sample::by_name("double")
            .expect("unknown sample program")
            .expect("embedded debug info should parse");
        machine.load(next);
        machine.run().expect("fresh program runs normally");
        assert_eq!(machine.output(), "result 12\n");
    }

    #[test]
    fn uncaught_error_leaves_post_mortem_stack() {
        let mut machine = start_session("tryfinally");

        let result = machine.run();
        assert!(
            matches!(result, Err(VmError::UncaughtException(_))),
            "unexpected outcome: {:?}",
            result
        );
        assert_eq!(machine.state(), State::Suspended);

        let names: Vec<&str> = machine
            .stack_frames()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["fail", "<top>"], "the throw site is on top");
        assert_eq!(paused_line(&machine), 2, "the top frame points at the throw");
    }
}
