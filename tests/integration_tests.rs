// tests/integration_tests.rs
// Engine-level behavior of the controller, frames, and signals, driven
// through the embedded sample programs.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use stepvm::{
    sample, CompiledExpr, DebugInfo, Event, EventPayload, Frame, Machine, Program, Signal, State,
    StepOutcome, TransformedFn, Value, VmError,
};

fn machine_with(name: &str) -> Machine {
    let program = sample::by_name(name)
        .expect("unknown sample program")
        .expect("embedded debug info should parse");
    let mut machine = Machine::new();
    machine.load(program);
    machine
}

fn count_events(machine: &mut Machine, event: Event) -> Rc<Cell<usize>> {
    let counter = Rc::new(Cell::new(0usize));
    let inner = Rc::clone(&counter);
    machine.on(event, move |_, _| inner.set(inner.get() + 1));
    counter
}

fn paused_line(machine: &Machine) -> u32 {
    machine
        .location()
        .expect("paused location should be mapped")
        .start
        .line
}

#[cfg(test)]
mod engine_tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn run_to_completion_fires_finish_once() {
        let mut machine = machine_with("double");
        let finishes = count_events(&mut machine, Event::Finish);

        let result = machine.run();
        machine.pump_events();

        assert!(result.is_ok(), "run should complete: {:?}", result);
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "result 12\n");
        assert_eq!(finishes.get(), 1, "finish should fire exactly once");
        assert!(machine.stack_frames().is_empty());
    }

    #[test]
    fn suspended_state_tracks_stack() {
        let mut machine = machine_with("sum");

        assert_eq!(machine.state(), State::Idle);
        assert!(machine.stack_frames().is_empty());

        machine.toggle_breakpoint(6);
        machine.run().expect("run to the breakpoint");
        assert_eq!(machine.state(), State::Suspended);
        assert!(
            !machine.stack_frames().is_empty(),
            "a suspended machine must expose its frames"
        );

        machine.continue_execution().expect("resume to completion");
        assert_eq!(machine.state(), State::Idle);
        assert!(machine.stack_frames().is_empty());
    }

    #[test]
    fn toggling_a_breakpoint_twice_is_identity() {
        let mut machine = machine_with("double");
        assert!(machine.toggle_breakpoint(6).is_some());
        assert!(machine.toggle_breakpoint(6).is_some());

        machine.run().expect("run should not pause");
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "result 12\n");
    }

    #[test]
    fn continue_stops_at_each_breakpoint_in_order() {
        let mut machine = machine_with("sum");
        machine.toggle_breakpoint(6);
        machine.toggle_breakpoint(7);

        machine.run().expect("run to the first breakpoint");
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 6);
        assert_eq!(
            machine.stack_frames()[0].locals,
            hashmap! { "total".to_string() => Value::Num(0.0) },
            "only the initialized variable exists at the first stop"
        );

        machine
            .continue_execution()
            .expect("resume to the second breakpoint");
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 7);

        machine.continue_execution().expect("resume to completion");
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn breakpoint_inside_helper_pauses_with_call_chain() {
        let mut machine = machine_with("sum");
        machine.toggle_breakpoint(2);

        machine.run().expect("run into the helper");
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 2);
        let names: Vec<&str> = machine
            .stack_frames()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["add", "<top>"], "innermost frame first");

        // the helper is called twice, so the same breakpoint hits again
        machine.continue_execution().expect("resume to the second call");
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 2);

        machine.continue_execution().expect("resume to completion");
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn stepping_only_lands_on_mapped_steps() {
        let mut machine = machine_with("sum");
        machine.toggle_breakpoint(5);
        machine.run().expect("run to the breakpoint");
        assert_eq!(paused_line(&machine), 5);

        let mut lines = Vec::new();
        while machine.state() == State::Suspended {
            machine.step().expect("single step");
            if machine.state() == State::Suspended {
                assert!(
                    machine.location().is_some(),
                    "a step pause must land on a mapped address"
                );
                lines.push(paused_line(&machine));
            }
        }

        assert_eq!(
            lines,
            vec![6, 2, 6, 7, 2, 7, 8],
            "stepping descends into the helper and back out"
        );
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn try_catch_handles_error_without_pausing() {
        let mut machine = machine_with("trycatch");
        let pauses = count_events(&mut machine, Event::Paused);

        let result = machine.run();
        machine.pump_events();

        assert!(result.is_ok(), "caught errors do not surface: {:?}", result);
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "caught boom: a\ndone\n");
        assert_eq!(pauses.get(), 0, "dispatch must not pause the machine");
    }

    #[test]
    fn finally_runs_before_error_propagates() {
        let mut machine = machine_with("tryfinally");

        let result = machine.run();
        match result {
            Err(VmError::UncaughtException(value)) => {
                assert_eq!(value, Value::Str("outer fail".into()));
            }
            other => panic!("expected an uncaught exception, got {:?}", other),
        }

        assert_eq!(machine.output(), "cleanup\n", "cleanup ran during the unwind");
        assert_eq!(
            machine.state(),
            State::Suspended,
            "the post-mortem stack stays inspectable"
        );
        assert_eq!(machine.error(), Some(&Value::Str("outer fail".into())));
        assert!(!machine.stack_frames().is_empty());
    }

    #[test]
    fn callcc_roundtrip_reenters_with_value() {
        let mut machine = machine_with("callcc");
        let invokes = count_events(&mut machine, Event::ContInvoked);
        let finishes = count_events(&mut machine, Event::Finish);

        machine.run().expect("capture and reentry should complete");
        machine.pump_events();

        assert_eq!(machine.state(), State::Idle);
        assert_eq!(
            machine.output(),
            "result hello\n",
            "the capture site evaluates to the applied value"
        );
        assert_eq!(invokes.get(), 1);
        assert_eq!(finishes.get(), 1);
    }

    #[test]
    fn evaluate_reads_and_writes_paused_frame() {
        let mut machine = machine_with("sum");
        machine.toggle_breakpoint(7);
        machine.run().expect("run to the breakpoint");
        assert_eq!(paused_line(&machine), 7);

        let total = machine
            .evaluate(CompiledExpr::get("total"))
            .expect("read a local");
        assert_eq!(total, Value::Num(10.0));
        assert_eq!(machine.eval_result(), Value::Num(10.0));

        machine
            .evaluate(CompiledExpr::set("total", Value::Num(100.0)))
            .expect("write a local");

        assert_eq!(
            machine.state(),
            State::Suspended,
            "evaluation leaves the pause in place"
        );
        machine
            .continue_execution()
            .expect("resume with the new value");
        assert_eq!(machine.output(), "total 132\n");
    }

    #[test]
    fn evaluate_while_idle_uses_entry_scope() {
        let mut machine = machine_with("double");

        let value = machine
            .evaluate(CompiledExpr::new(|_| Ok(Value::Num(21.0 * 2.0))))
            .expect("idle evaluation");
        assert_eq!(value, Value::Num(42.0));
        assert_eq!(machine.state(), State::Idle);
        assert!(machine.stack_frames().is_empty());

        // unknown locals read as null rather than failing
        let missing = machine
            .evaluate(CompiledExpr::get("result"))
            .expect("idle read");
        assert_eq!(missing, Value::Null);
    }

    #[test]
    fn evaluate_without_program_is_rejected() {
        let mut machine = Machine::new();
        let res = machine.evaluate(CompiledExpr::get("x"));
        assert!(matches!(res, Err(VmError::InvalidEvalState)));
    }

    struct Boom;

    impl TransformedFn for Boom {
        fn machine_id(&self) -> usize {
            99
        }

        fn name(&self) -> &str {
            "boom"
        }

        fn call(&self, _m: &mut Machine, _this: Value, _args: Vec<Value>) -> StepOutcome {
            Signal::Error {
                error: Value::Str("kaboom".into()),
                frames: Vec::new(),
            }
            .into()
        }
    }

    #[test]
    fn execute_while_suspended_preserves_session() {
        let mut machine = machine_with("sum");
        machine.toggle_breakpoint(6);
        machine.run().expect("run to the breakpoint");

        let errors: Rc<RefCell<Vec<EventPayload>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&errors);
        machine.on(Event::Error, move |_, payload| {
            sink.borrow_mut().push(payload.clone());
        });

        machine
            .execute(Rc::new(Boom), Value::Null, Vec::new())
            .expect("a failing side call does not poison the session");
        machine.pump_events();

        assert_eq!(
            errors.borrow().as_slice(),
            &[EventPayload::Value(Value::Str("kaboom".into()))],
            "the guest error surfaces as an event"
        );
        assert_eq!(machine.state(), State::Suspended);
        assert_eq!(paused_line(&machine), 6, "the paused session is untouched");

        machine.continue_execution().expect("the session still resumes");
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn watch_fires_with_observed_value() {
        use stepvm::Position;

        let mut machine = machine_with("sum");
        let id = machine
            .set_watch(Position::new(6, 1), Position::new(6, 24))
            .expect("the assignment span is watchable");

        let seen: Rc<RefCell<Vec<EventPayload>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        machine.on(Event::Watched, move |_, payload| {
            sink.borrow_mut().push(payload.clone());
        });

        machine.run().expect("run to completion");
        machine.pump_events();

        assert_eq!(
            seen.borrow().as_slice(),
            &[EventPayload::Watch {
                id,
                value: Value::Num(10.0)
            }]
        );
    }

    #[test]
    fn paused_handler_can_drive_the_machine() {
        let mut machine = machine_with("sum");
        machine.toggle_breakpoint(6);
        machine.toggle_breakpoint(7);

        let pauses = Rc::new(Cell::new(0usize));
        let counter = Rc::clone(&pauses);
        machine.on(Event::Paused, move |m, _| {
            counter.set(counter.get() + 1);
            let _ = m.continue_execution();
        });

        machine.run().expect("run to the first breakpoint");
        machine.pump_events();

        assert_eq!(pauses.get(), 2, "the handler resumed through both breakpoints");
        assert_eq!(machine.state(), State::Idle);
        assert_eq!(machine.output(), "total 42\n");
    }

    #[test]
    fn sample_function_tables_are_indexed_by_machine_id() {
        for name in sample::names() {
            let program = sample::by_name(name)
                .expect("listed sample should resolve")
                .expect("embedded debug info should parse");
            for (i, func) in program.fns.iter().enumerate() {
                assert_eq!(
                    func.machine_id(),
                    i,
                    "{}: function '{}' sits in the wrong slot",
                    name,
                    func.name()
                );
            }
            assert!(program.entry < program.fns.len());
        }
    }

    struct GhostFn;

    impl TransformedFn for GhostFn {
        fn machine_id(&self) -> usize {
            0
        }

        fn name(&self) -> &str {
            "ghost"
        }

        fn call(&self, _m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
            // pause with a frame pointing at a function slot the program
            // does not have
            Signal::Pause(vec![Frame::new(7, "ghost", Some(0), this_value)]).into()
        }
    }

    fn ghost_program() -> Program {
        const DEBUG: &str = r#"{
          "machines": [{}, {}, {}, {}, {}, {}, {},
            { "locs": { "0": { "start": { "line": 1, "column": 1 }, "end": { "line": 1, "column": 10 } } } }],
          "stepIds": [[], [], [], [], [], [], [], [0]]
        }"#;
        Program {
            name: "ghost".into(),
            fns: vec![Rc::new(GhostFn)],
            entry: 0,
            debug_info: DebugInfo::from_json(DEBUG).expect("debug info parses"),
            source: String::new(),
        }
    }

    #[test]
    fn failed_resume_restores_session_flags() {
        let mut machine = Machine::new();
        machine.load(ghost_program());
        machine.toggle_breakpoint(1).expect("line 1 is mapped");

        machine.run().expect("run pauses on the dangling frame");
        assert_eq!(machine.state(), State::Suspended);

        let res = machine.continue_execution();
        assert!(
            matches!(res, Err(VmError::UnknownFunction(7))),
            "unexpected outcome: {:?}",
            res
        );
        assert!(
            machine.breakpoints_enabled(),
            "breakpoints must come back on after a failed resume"
        );
        assert!(!machine.is_stepping(), "stepping must be cleared");
    }

    #[test]
    fn reload_discards_stashed_flags() {
        let mut machine = machine_with("double");
        machine.enable_breakpoints();
        machine.push_state();

        let next = sample::by_name("sum")
            .expect("unknown sample program")
            .expect("embedded debug info should parse");
        machine.load(next);
        machine.disable_breakpoints();

        machine.pop_state();
        assert!(
            !machine.breakpoints_enabled(),
            "a stash from the previous session must not leak into this one"
        );
    }

    #[test]
    fn push_and_pop_state_round_trip() {
        let mut machine = machine_with("double");
        machine.enable_breakpoints();
        assert!(machine.breakpoints_enabled());

        machine.push_state();
        assert!(!machine.breakpoints_enabled());
        assert!(!machine.is_stepping());

        machine.pop_state();
        assert!(machine.breakpoints_enabled());
    }

    #[test]
    fn abort_forgets_program() {
        let mut machine = machine_with("sum");
        machine.toggle_breakpoint(6);
        machine.run().expect("run to the breakpoint");
        assert_eq!(machine.state(), State::Suspended);

        machine.abort();
        assert_eq!(machine.state(), State::Idle);
        assert!(machine.stack_frames().is_empty());
        assert_eq!(machine.output(), "");
        assert!(matches!(machine.run(), Err(VmError::NotLoaded)));
    }
}
