//! Embedded sample programs, hand-transformed into the steppable form the
//! compiler front end would emit. Each one pairs its function table with
//! the debug-info JSON the wire format defines.

use std::rc::Rc;

use crate::debug_info::DebugInfo;
use crate::frame::Frame;
use crate::machine::Machine;
use crate::program::{Program, TransformedFn, STEP_EVAL};
use crate::signal::{Signal, StepOutcome};
use crate::value::Value;

pub fn names() -> &'static [&'static str] {
    &["double", "trycatch", "tryfinally", "callcc", "sum", "branch"]
}

pub fn by_name(name: &str) -> Option<Result<Program, serde_json::Error>> {
    match name {
        "double" => Some(double()),
        "trycatch" => Some(trycatch()),
        "tryfinally" => Some(tryfinally()),
        "callcc" => Some(callcc()),
        "sum" => Some(sum()),
        "branch" => Some(branch()),
        _ => None,
    }
}

fn suspend(frame: Frame) -> StepOutcome {
    Signal::Pause(vec![frame]).into()
}

fn throw(frame: Frame, error: Value) -> StepOutcome {
    Signal::Error {
        error,
        frames: vec![frame],
    }
    .into()
}

fn missing_frame() -> StepOutcome {
    Signal::Error {
        error: Value::Str("restore descent found no frame to pop".into()),
        frames: Vec::new(),
    }
    .into()
}

/// Shared handling of the out-of-band eval address: run the pending
/// expression against this frame's locals and hand the frame back.
fn run_eval(machine: &mut Machine, mut frame: Frame) -> StepOutcome {
    let expr = match machine.take_eval_arg() {
        Some(expr) => expr,
        None => return throw(frame, Value::Str("no expression pending".into())),
    };
    match expr.apply(&mut frame.locals) {
        Ok(value) => {
            machine.set_eval_result(value);
            suspend(frame)
        }
        Err(error) => throw(frame, error),
    }
}

// double: plain nested call.
//
//   1: function double(n) {
//   2:   var doubled = n * 2;
//   3:   return doubled;
//   4: }
//   5:
//   6: var result = double(6);
//   7: print("result " + result);

const DOUBLE_SOURCE: &str = "function double(n) {\n  var doubled = n * 2;\n  return doubled;\n}\n\nvar result = double(6);\nprint(\"result \" + result);\n";

const DOUBLE_DEBUG: &str = r#"{
  "machines": [
    { "locs": {
        "0": { "start": { "line": 2, "column": 3 }, "end": { "line": 2, "column": 23 } },
        "1": { "start": { "line": 3, "column": 3 }, "end": { "line": 3, "column": 17 } }
    } },
    { "locs": {
        "0": { "start": { "line": 6, "column": 14 }, "end": { "line": 6, "column": 23 } },
        "1": { "start": { "line": 6, "column": 1 }, "end": { "line": 6, "column": 24 } },
        "2": { "start": { "line": 7, "column": 1 }, "end": { "line": 7, "column": 26 } }
    } }
  ],
  "stepIds": [[0, 1], [0, 1, 2]]
}"#;

pub fn double() -> Result<Program, serde_json::Error> {
    Ok(Program {
        name: "double".into(),
        fns: vec![Rc::new(DoubleFn), Rc::new(DoubleGlobal)],
        entry: 1,
        debug_info: DebugInfo::from_json(DOUBLE_DEBUG)?,
        source: DOUBLE_SOURCE.into(),
    })
}

struct DoubleFn;

impl TransformedFn for DoubleFn {
    fn machine_id(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "double"
    }

    fn call(&self, m: &mut Machine, this_value: Value, args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let mut frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            frame.set_local("n", args.into_iter().next().unwrap_or_default());
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        let mut ret = Value::Null;
        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    let n = frame.local("n").as_num();
                    frame.set_local("doubled", Value::Num(n * 2.0));
                    frame.next = Some(1);
                }
                1 => {
                    ret = frame.local("doubled");
                    frame.next = None;
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(ret)
    }
}

struct DoubleGlobal;

impl TransformedFn for DoubleGlobal {
    fn machine_id(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "<top>"
    }

    fn call(&self, m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    // result = double(6), call part
                    let outcome = if m.restoring() {
                        m.restore_next_frame()
                    } else {
                        m.call_function(0, Value::Null, vec![Value::Num(6.0)])
                    };
                    match outcome {
                        StepOutcome::Return(value) => {
                            frame.set_local("$__t0", value);
                            frame.next = Some(1);
                        }
                        StepOutcome::Signal(sig) => {
                            frame.next = Some(0);
                            return StepOutcome::Signal(sig.push_frame(frame));
                        }
                    }
                }
                1 => {
                    let value = frame.local("$__t0");
                    frame.set_local("result", value);
                    frame.next = Some(2);
                }
                2 => {
                    let result = frame.local("result");
                    m.print(format!("result {}", result));
                    frame.next = None;
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(Value::Null)
    }
}

// trycatch: a throwing callee caught one frame up.
//
//   1: function risky(tag) {
//   2:   throw "boom: " + tag;
//   3: }
//   4:
//   5: try {
//   6:   risky("a");
//   7: } catch (err) {
//   8:   print("caught " + err);
//   9: }
//  10: print("done");

const TRYCATCH_SOURCE: &str = "function risky(tag) {\n  throw \"boom: \" + tag;\n}\n\ntry {\n  risky(\"a\");\n} catch (err) {\n  print(\"caught \" + err);\n}\nprint(\"done\");\n";

const TRYCATCH_DEBUG: &str = r#"{
  "machines": [
    { "locs": {
        "0": { "start": { "line": 2, "column": 3 }, "end": { "line": 2, "column": 24 } }
    } },
    { "locs": {
        "1": { "start": { "line": 6, "column": 3 }, "end": { "line": 6, "column": 13 } },
        "3": { "start": { "line": 7, "column": 3 }, "end": { "line": 7, "column": 14 } },
        "4": { "start": { "line": 8, "column": 3 }, "end": { "line": 8, "column": 25 } },
        "5": { "start": { "line": 10, "column": 1 }, "end": { "line": 10, "column": 15 } }
    } }
  ],
  "stepIds": [[0], [0, 1, 2, 3, 4, 5]]
}"#;

pub fn trycatch() -> Result<Program, serde_json::Error> {
    Ok(Program {
        name: "trycatch".into(),
        fns: vec![Rc::new(RiskyFn), Rc::new(TryCatchGlobal)],
        entry: 1,
        debug_info: DebugInfo::from_json(TRYCATCH_DEBUG)?,
        source: TRYCATCH_SOURCE.into(),
    })
}

struct RiskyFn;

impl TransformedFn for RiskyFn {
    fn machine_id(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "risky"
    }

    fn call(&self, m: &mut Machine, this_value: Value, args: Vec<Value>) -> StepOutcome {
        let frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let mut frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            frame.set_local("tag", args.into_iter().next().unwrap_or_default());
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    let tag = frame.local("tag");
                    return throw(frame, Value::Str(format!("boom: {}", tag)));
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
        }
        StepOutcome::Return(Value::Null)
    }
}

struct TryCatchGlobal;

impl TransformedFn for TryCatchGlobal {
    fn machine_id(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "<top>"
    }

    fn call(&self, m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    // enter try, handler at step 3
                    frame.push_try(Some(3), None, None);
                    frame.next = Some(1);
                }
                1 => {
                    let outcome = if m.restoring() {
                        m.restore_next_frame()
                    } else {
                        m.call_function(0, Value::Null, vec![Value::Str("a".into())])
                    };
                    match outcome {
                        StepOutcome::Return(_) => frame.next = Some(2),
                        StepOutcome::Signal(sig) => {
                            frame.next = Some(1);
                            return StepOutcome::Signal(sig.push_frame(frame));
                        }
                    }
                }
                2 => {
                    // try body completed, skip the handler
                    frame.pop_catch(3);
                    frame.next = Some(5);
                }
                3 => {
                    // catch entry
                    frame.pop_catch(3);
                    let err = frame.locals.remove(crate::frame::EXC_SLOT).unwrap_or_default();
                    frame.set_local("err", err);
                    frame.next = Some(4);
                }
                4 => {
                    let err = frame.local("err");
                    m.print(format!("caught {}", err));
                    frame.next = Some(5);
                }
                5 => {
                    m.print("done");
                    frame.next = None;
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(Value::Null)
    }
}

// tryfinally: cleanup runs while the error keeps unwinding.
//
//   1: function fail() {
//   2:   throw "outer fail";
//   3: }
//   4:
//   5: try {
//   6:   fail();
//   7: } finally {
//   8:   print("cleanup");
//   9: }

const TRYFINALLY_SOURCE: &str = "function fail() {\n  throw \"outer fail\";\n}\n\ntry {\n  fail();\n} finally {\n  print(\"cleanup\");\n}\n";

const TRYFINALLY_DEBUG: &str = r#"{
  "machines": [
    { "locs": {
        "0": { "start": { "line": 2, "column": 3 }, "end": { "line": 2, "column": 22 } }
    } },
    { "locs": {
        "1": { "start": { "line": 6, "column": 3 }, "end": { "line": 6, "column": 10 } },
        "3": { "start": { "line": 8, "column": 3 }, "end": { "line": 8, "column": 21 } }
    } }
  ],
  "stepIds": [[0], [0, 1, 2, 3, 4]]
}"#;

pub fn tryfinally() -> Result<Program, serde_json::Error> {
    Ok(Program {
        name: "tryfinally".into(),
        fns: vec![Rc::new(FailFn), Rc::new(TryFinallyGlobal)],
        entry: 1,
        debug_info: DebugInfo::from_json(TRYFINALLY_DEBUG)?,
        source: TRYFINALLY_SOURCE.into(),
    })
}

struct FailFn;

impl TransformedFn for FailFn {
    fn machine_id(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "fail"
    }

    fn call(&self, m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
        let frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => return throw(frame, Value::Str("outer fail".into())),
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
        }
        StepOutcome::Return(Value::Null)
    }
}

struct TryFinallyGlobal;

impl TransformedFn for TryFinallyGlobal {
    fn machine_id(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "<top>"
    }

    fn call(&self, m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    // enter try, finally body at step 3 chained through $__t0
                    frame.push_try(None, Some(3), Some(0));
                    frame.next = Some(1);
                }
                1 => {
                    let outcome = if m.restoring() {
                        m.restore_next_frame()
                    } else {
                        m.call_function(0, Value::Null, Vec::new())
                    };
                    match outcome {
                        StepOutcome::Return(_) => frame.next = Some(2),
                        StepOutcome::Signal(sig) => {
                            frame.next = Some(1);
                            return StepOutcome::Signal(sig.push_frame(frame));
                        }
                    }
                }
                2 => {
                    // try body completed normally, fall into the finally
                    frame.set_local("$__t0", Value::ResumeAddr(None));
                    frame.next = Some(3);
                }
                3 => {
                    m.print("cleanup");
                    frame.next = Some(4);
                }
                4 => {
                    // finally epilogue, jump wherever the sentinel points
                    frame.pop_finally(3);
                    match frame.local("$__t0") {
                        Value::ResumeAddr(next) => frame.next = next,
                        _ => frame.next = None,
                    }
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(Value::Null)
    }
}

// callcc: capture an escape continuation, then re-enter through it.
//
//   1: var saved = callcc();
//   2: if (iscont(saved)) {
//   3:   saved("hello");
//   4: } else {
//   5:   print("result " + saved);
//   6: }

const CALLCC_SOURCE: &str = "var saved = callcc();\nif (iscont(saved)) {\n  saved(\"hello\");\n} else {\n  print(\"result \" + saved);\n}\n";

const CALLCC_DEBUG: &str = r#"{
  "machines": [
    { "locs": {
        "0": { "start": { "line": 1, "column": 13 }, "end": { "line": 1, "column": 21 } },
        "3": { "start": { "line": 2, "column": 1 }, "end": { "line": 2, "column": 19 } },
        "4": { "start": { "line": 3, "column": 3 }, "end": { "line": 3, "column": 17 } },
        "5": { "start": { "line": 5, "column": 3 }, "end": { "line": 5, "column": 25 } }
    } }
  ],
  "stepIds": [[0, 1, 2, 3, 4, 5]]
}"#;

pub fn callcc() -> Result<Program, serde_json::Error> {
    Ok(Program {
        name: "callcc".into(),
        fns: vec![Rc::new(CallccGlobal)],
        entry: 0,
        debug_info: DebugInfo::from_json(CALLCC_DEBUG)?,
        source: CALLCC_SOURCE.into(),
    })
}

struct CallccGlobal;

impl TransformedFn for CallccGlobal {
    fn machine_id(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "<top>"
    }

    fn call(&self, m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let mut frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            // one temp allocated: $__t0 holds the continuation at the
            // capture site, $__t1 the applied argument
            frame.tmp_id = 1;
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    // saved = callcc(), capture at this step
                    frame.next = Some(0);
                    return StepOutcome::Signal(m.call_cc().push_frame(frame));
                }
                1 => {
                    // immediate resume: the capture itself evaluates to the
                    // continuation
                    let k = frame.local("$__t0");
                    frame.set_local("saved", k);
                    frame.next = Some(3);
                }
                2 => {
                    // applied resume: the capture evaluates to the argument
                    let value = frame.local("$__t1");
                    frame.set_local("saved", value);
                    frame.next = Some(3);
                }
                3 => {
                    frame.next = match frame.local("saved") {
                        Value::Continuation(_) => Some(4),
                        _ => Some(5),
                    };
                }
                4 => {
                    let saved = frame.local("saved");
                    match saved {
                        Value::Continuation(k) => {
                            let sig = m.continuation_signal(&k, Value::Str("hello".into()));
                            frame.next = Some(4);
                            return StepOutcome::Signal(sig.push_frame(frame));
                        }
                        other => return throw(frame, Value::Str(format!("{} is not callable", other))),
                    }
                }
                5 => {
                    let saved = frame.local("saved");
                    m.print(format!("result {}", saved));
                    frame.next = None;
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(Value::Null)
    }
}

// sum: two calls through the same helper, watch and step-over fodder.
//
//   1: function add(a, b) {
//   2:   return a + b;
//   3: }
//   4:
//   5: var total = 0;
//   6: total = add(total, 10);
//   7: total = add(total, 32);
//   8: print("total " + total);

const SUM_SOURCE: &str = "function add(a, b) {\n  return a + b;\n}\n\nvar total = 0;\ntotal = add(total, 10);\ntotal = add(total, 32);\nprint(\"total \" + total);\n";

const SUM_DEBUG: &str = r#"{
  "machines": [
    { "locs": {
        "0": { "start": { "line": 2, "column": 3 }, "end": { "line": 2, "column": 16 } }
    } },
    { "locs": {
        "0": { "start": { "line": 5, "column": 1 }, "end": { "line": 5, "column": 14 } },
        "1": { "start": { "line": 6, "column": 9 }, "end": { "line": 6, "column": 23 } },
        "2": { "start": { "line": 6, "column": 1 }, "end": { "line": 6, "column": 24 } },
        "3": { "start": { "line": 7, "column": 9 }, "end": { "line": 7, "column": 23 } },
        "4": { "start": { "line": 7, "column": 1 }, "end": { "line": 7, "column": 24 } },
        "5": { "start": { "line": 8, "column": 1 }, "end": { "line": 8, "column": 23 } }
    } }
  ],
  "stepIds": [[0], [0, 1, 2, 3, 4, 5]]
}"#;

pub fn sum() -> Result<Program, serde_json::Error> {
    Ok(Program {
        name: "sum".into(),
        fns: vec![Rc::new(AddFn), Rc::new(SumGlobal)],
        entry: 1,
        debug_info: DebugInfo::from_json(SUM_DEBUG)?,
        source: SUM_SOURCE.into(),
    })
}

struct AddFn;

impl TransformedFn for AddFn {
    fn machine_id(&self) -> usize {
        0
    }

    fn name(&self) -> &str {
        "add"
    }

    fn call(&self, m: &mut Machine, this_value: Value, args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let mut frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            let mut args = args.into_iter();
            frame.set_local("a", args.next().unwrap_or_default());
            frame.set_local("b", args.next().unwrap_or_default());
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        let mut ret = Value::Null;
        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    let a = frame.local("a").as_num();
                    let b = frame.local("b").as_num();
                    ret = Value::Num(a + b);
                    frame.next = None;
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(ret)
    }
}

struct SumGlobal;

impl TransformedFn for SumGlobal {
    fn machine_id(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "<top>"
    }

    fn call(&self, m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    frame.set_local("total", Value::Num(0.0));
                    frame.next = Some(1);
                }
                1 => {
                    let outcome = if m.restoring() {
                        m.restore_next_frame()
                    } else {
                        let total = frame.local("total");
                        m.call_function(0, Value::Null, vec![total, Value::Num(10.0)])
                    };
                    match outcome {
                        StepOutcome::Return(value) => {
                            frame.set_local("$__t0", value);
                            frame.next = Some(2);
                        }
                        StepOutcome::Signal(sig) => {
                            frame.next = Some(1);
                            return StepOutcome::Signal(sig.push_frame(frame));
                        }
                    }
                }
                2 => {
                    let value = frame.local("$__t0");
                    frame.set_local("total", value.clone());
                    m.handle_watch(1, 2, value);
                    frame.next = Some(3);
                }
                3 => {
                    let outcome = if m.restoring() {
                        m.restore_next_frame()
                    } else {
                        let total = frame.local("total");
                        m.call_function(0, Value::Null, vec![total, Value::Num(32.0)])
                    };
                    match outcome {
                        StepOutcome::Return(value) => {
                            frame.set_local("$__t0", value);
                            frame.next = Some(4);
                        }
                        StepOutcome::Signal(sig) => {
                            frame.next = Some(3);
                            return StepOutcome::Signal(sig.push_frame(frame));
                        }
                    }
                }
                4 => {
                    let value = frame.local("$__t0");
                    frame.set_local("total", value.clone());
                    m.handle_watch(1, 4, value);
                    frame.next = Some(5);
                }
                5 => {
                    let total = frame.local("total");
                    m.print(format!("total {}", total));
                    frame.next = None;
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(Value::Null)
    }
}

// branch: a call buried two statement spans deep, an assignment inside an
// if block.
//
//   1: function add(a, b) {
//   2:   return a + b;
//   3: }
//   4:
//   5: var total = 0;
//   6: if (total < 5) {
//   7:   total = add(total, 10);
//   8: }
//   9: print("total " + total);

const BRANCH_SOURCE: &str = "function add(a, b) {\n  return a + b;\n}\n\nvar total = 0;\nif (total < 5) {\n  total = add(total, 10);\n}\nprint(\"total \" + total);\n";

const BRANCH_DEBUG: &str = r#"{
  "machines": [
    { "locs": {
        "0": { "start": { "line": 2, "column": 3 }, "end": { "line": 2, "column": 16 } }
    } },
    { "locs": {
        "0": { "start": { "line": 5, "column": 1 }, "end": { "line": 5, "column": 14 } },
        "1": { "start": { "line": 6, "column": 1 }, "end": { "line": 8, "column": 1 } },
        "2": { "start": { "line": 7, "column": 11 }, "end": { "line": 7, "column": 24 } },
        "3": { "start": { "line": 7, "column": 3 }, "end": { "line": 7, "column": 25 } },
        "4": { "start": { "line": 9, "column": 1 }, "end": { "line": 9, "column": 24 } }
    } }
  ],
  "stepIds": [[0], [0, 1, 2, 3, 4]]
}"#;

pub fn branch() -> Result<Program, serde_json::Error> {
    Ok(Program {
        name: "branch".into(),
        fns: vec![Rc::new(AddFn), Rc::new(BranchGlobal)],
        entry: 1,
        debug_info: DebugInfo::from_json(BRANCH_DEBUG)?,
        source: BRANCH_SOURCE.into(),
    })
}

struct BranchGlobal;

impl TransformedFn for BranchGlobal {
    fn machine_id(&self) -> usize {
        1
    }

    fn name(&self) -> &str {
        "<top>"
    }

    fn call(&self, m: &mut Machine, this_value: Value, _args: Vec<Value>) -> StepOutcome {
        let mut frame = if m.restoring() {
            match m.pop_frame() {
                Some(frame) => frame,
                None => return missing_frame(),
            }
        } else {
            let frame = Frame::new(self.machine_id(), self.name(), Some(0), this_value);
            if m.is_stepping() {
                return suspend(frame);
            }
            frame
        };

        loop {
            let step = match frame.next {
                Some(STEP_EVAL) => return run_eval(m, frame),
                Some(step) => step,
                None => break,
            };
            if m.break_at(self.machine_id(), step) {
                return suspend(frame);
            }
            match step {
                0 => {
                    frame.set_local("total", Value::Num(0.0));
                    frame.next = Some(1);
                }
                1 => {
                    let total = frame.local("total").as_num();
                    frame.next = if total < 5.0 { Some(2) } else { Some(4) };
                }
                2 => {
                    let outcome = if m.restoring() {
                        m.restore_next_frame()
                    } else {
                        let total = frame.local("total");
                        m.call_function(0, Value::Null, vec![total, Value::Num(10.0)])
                    };
                    match outcome {
                        StepOutcome::Return(value) => {
                            frame.set_local("$__t0", value);
                            frame.next = Some(3);
                        }
                        StepOutcome::Signal(sig) => {
                            frame.next = Some(2);
                            return StepOutcome::Signal(sig.push_frame(frame));
                        }
                    }
                }
                3 => {
                    let value = frame.local("$__t0");
                    frame.set_local("total", value);
                    frame.next = Some(4);
                }
                4 => {
                    let total = frame.local("total");
                    m.print(format!("total {}", total));
                    frame.next = None;
                }
                _ => return throw(frame, Value::Str(format!("unknown step {}", step))),
            }
            if frame.next.is_some() && m.is_stepping() {
                return suspend(frame);
            }
        }
        StepOutcome::Return(Value::Null)
    }
}
