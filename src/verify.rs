//! Post-install smoke tests.
//!
//! Each test step runs one installed command with fixed arguments and checks
//! its exit status and/or that its combined stdout and stderr contain a
//! substring. Steps run in order; the first failure stops the run.

use crate::cellar::Keg;
use crate::formula::TestStep;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Output kept in failure messages
const OUTPUT_TAIL: usize = 2000;

/// Resolve a test command against the keg: bare names live in `bin`
pub fn command_path(keg: &Keg, command: &str) -> PathBuf {
    if command.contains('/') {
        PathBuf::from(keg.expand(command))
    } else {
        keg.bin().join(command)
    }
}

fn display_command(step: &TestStep) -> String {
    std::iter::once(step.command.as_str())
        .chain(step.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn tail(output: &str) -> &str {
    if output.len() <= OUTPUT_TAIL {
        return output;
    }
    let mut start = output.len() - OUTPUT_TAIL;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    &output[start..]
}

/// Run one test step, returning a description of the failure if it fails
pub fn run_step(keg: &Keg, step: &TestStep) -> Result<(), String> {
    let program = command_path(keg, &step.command);
    let args: Vec<String> = step.args.iter().map(|a| keg.expand(a)).collect();
    let shown = display_command(step);

    debug!("test: {} {:?}", program.display(), args);
    let mut command = Command::new(&program);
    command.args(&args);
    for (key, value) in &step.env {
        command.env(key, keg.expand(value));
    }

    let output = command
        .output()
        .map_err(|e| format!("`{}` could not be run: {}", shown, e))?;

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    if let Some(expected) = step.expected_status() {
        match output.status.code() {
            Some(code) if code == expected => {}
            Some(code) => {
                return Err(format!(
                    "`{}` exited with {}, expected {}\n{}",
                    shown,
                    code,
                    expected,
                    tail(combined.trim())
                ));
            }
            None => {
                return Err(format!(
                    "`{}` was terminated by a signal, expected exit {}",
                    shown, expected
                ));
            }
        }
    }

    if let Some(needle) = &step.contains {
        let found = if step.ignore_case {
            combined.to_lowercase().contains(&needle.to_lowercase())
        } else {
            combined.contains(needle.as_str())
        };
        if !found {
            return Err(format!(
                "output of `{}` does not contain {:?}\n{}",
                shown,
                needle,
                tail(combined.trim())
            ));
        }
    }

    Ok(())
}

/// Run all steps in order; returns how many passed or the first failure
pub fn run_tests(keg: &Keg, steps: &[TestStep]) -> Result<usize, String> {
    for (passed, step) in steps.iter().enumerate() {
        run_step(keg, step).map_err(|message| {
            format!("test {}/{} failed: {}", passed + 1, steps.len(), message)
        })?;
    }
    Ok(steps.len())
}
