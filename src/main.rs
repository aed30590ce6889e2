use std::io::{self, BufRead, Write};

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

use stepvm::{sample, CompiledExpr, Event, EventPayload, Machine, State, VmError};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("list") => {
            for name in sample::names() {
                println!("{}", name);
            }
            Ok(())
        }
        Some("run") => {
            let name = args
                .get(2)
                .ok_or_else(|| anyhow!("usage: stepvm run <program>"))?;
            run_program(name)
        }
        Some("debug") => {
            let name = args
                .get(2)
                .ok_or_else(|| anyhow!("usage: stepvm debug <program> [breakpoint lines...]"))?;
            debug_program(name, &args[3..])
        }
        _ => {
            eprintln!("usage: stepvm <list|run|debug> [program] [breakpoint lines...]");
            Ok(())
        }
    }
}

fn load_sample(name: &str) -> Result<Machine> {
    let program = sample::by_name(name)
        .ok_or_else(|| anyhow!("unknown program '{}', try 'stepvm list'", name))?
        .context("embedded debug info is malformed")?;
    let mut machine = Machine::new();
    machine.load(program);
    Ok(machine)
}

fn run_program(name: &str) -> Result<()> {
    let mut machine = load_sample(name)?;
    match machine.run() {
        Ok(_) => {}
        Err(VmError::UncaughtException(value)) => eprintln!("uncaught exception: {}", value),
        Err(err) => return Err(anyhow!("{}", err)),
    }
    machine.pump_events();
    print!("{}", machine.output());
    Ok(())
}

fn debug_program(name: &str, break_lines: &[String]) -> Result<()> {
    let mut machine = load_sample(name)?;

    machine.on(Event::Finish, |_, _| eprintln!("[finished]"));
    machine.on(Event::ContInvoked, |_, _| eprintln!("[continuation invoked]"));
    machine.on(Event::Error, |_, payload| {
        if let EventPayload::Value(value) = payload {
            eprintln!("[error] {}", value);
        }
    });
    machine.on(Event::Watched, |_, payload| {
        if let EventPayload::Watch { id, value } = payload {
            eprintln!("[watch {}] {}", id, value);
        }
    });

    for raw in break_lines {
        let line: u32 = raw
            .parse()
            .with_context(|| format!("bad breakpoint line '{}'", raw))?;
        if machine.toggle_breakpoint(line).is_none() {
            eprintln!("no code at line {}", line);
        }
    }

    let source = machine
        .program()
        .map(|p| p.source.clone())
        .unwrap_or_default();

    let res = machine.run().map(|_| ());
    report(res);
    machine.pump_events();

    let stdin = io::stdin();
    while machine.state() == State::Suspended {
        show_location(&machine, &source);
        eprint!("(svm) ");
        io::stderr().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let words = shlex::split(line.trim()).unwrap_or_default();

        match words.first().map(String::as_str) {
            Some("c") => {
                let res = machine.continue_execution();
                report(res);
            }
            Some("s") => {
                let res = machine.step();
                report(res);
            }
            Some("o") | Some("n") => {
                let res = machine.step_over();
                report(res);
            }
            Some("b") => match words.get(1).and_then(|w| w.parse::<u32>().ok()) {
                Some(line) => {
                    if machine.toggle_breakpoint(line).is_none() {
                        eprintln!("no code at line {}", line);
                    }
                }
                None => eprintln!("usage: b <line>"),
            },
            Some("e") => match words.get(1) {
                Some(local) => match machine.evaluate(CompiledExpr::get(local)) {
                    Ok(value) => eprintln!("{} = {}", local, value),
                    Err(err) => eprintln!("error: {}", err),
                },
                None => eprintln!("usage: e <local>"),
            },
            Some("bt") => {
                for (i, frame) in machine.stack_frames().iter().enumerate() {
                    eprintln!("#{} {} (next {:?})", i, frame.name, frame.next);
                }
            }
            Some("out") => eprint!("{}", machine.output()),
            Some("q") => {
                machine.abort();
                break;
            }
            _ => eprintln!("commands: c(ontinue) s(tep) o(ver) b <line> e <local> bt out q(uit)"),
        }
        machine.pump_events();
    }

    print!("{}", machine.output());
    Ok(())
}

fn report(res: Result<(), VmError>) {
    if let Err(err) = res {
        eprintln!("error: {}", err);
    }
}

fn show_location(machine: &Machine, source: &str) {
    match machine.location() {
        Some(loc) => {
            let text = source
                .lines()
                .nth(loc.start.line.saturating_sub(1) as usize)
                .unwrap_or("");
            eprintln!("paused at {}:{}", loc.start.line, loc.start.column);
            eprintln!("  {} | {}", loc.start.line, text);
        }
        None => eprintln!("paused (no source mapping)"),
    }
}
