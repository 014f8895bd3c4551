//! # Control-Plane Adapter
//!
//! Textual request/response protocol spoken by periodic tasks.
//!
//! ```text
//! R <pid> <period_ms> <computation_ms>    register
//! D <pid>                                 unregister
//! Y <pid>                                 yield
//! ```
//!
//! Reading status returns one `<pid> <period_ms> <computation_ms>` line per
//! registered task, in registry order.
//!
//! The channel reports nothing back on a write: malformed lines and failed
//! operations are dropped silently and only show up in the log. Clients
//! check the outcome of a registration by reading status.

use std::fmt::Write as _;
use std::str::FromStr;

use log::{debug, warn};

use crate::error::SchedError;
use crate::kernel::{Kernel, TaskInfo};
use crate::task::TaskId;

/// One parsed control-plane request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Register {
        id: TaskId,
        period_ms: u64,
        computation_ms: u64,
    },
    Unregister(TaskId),
    Yield(TaskId),
}

impl FromStr for Command {
    type Err = SchedError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || SchedError::MalformedRequest(line.trim().to_owned());
        let mut fields = line.split_whitespace();
        let action = fields.next().ok_or_else(malformed)?;

        let mut number = || -> Result<u64, SchedError> {
            fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(malformed)
        };

        let command = match action {
            "R" => {
                let id = parse_id(number()?).ok_or_else(malformed)?;
                let period_ms = number()?;
                let computation_ms = number()?;
                Command::Register {
                    id,
                    period_ms,
                    computation_ms,
                }
            }
            "D" => Command::Unregister(parse_id(number()?).ok_or_else(malformed)?),
            "Y" => Command::Yield(parse_id(number()?).ok_or_else(malformed)?),
            _ => return Err(malformed()),
        };

        if fields.next().is_some() {
            return Err(malformed());
        }
        Ok(command)
    }
}

fn parse_id(raw: u64) -> Option<TaskId> {
    u32::try_from(raw).ok().map(TaskId)
}

impl Command {
    /// Render back into the wire format.
    pub fn to_line(&self) -> String {
        match *self {
            Command::Register {
                id,
                period_ms,
                computation_ms,
            } => format!("R {} {} {}", id, period_ms, computation_ms),
            Command::Unregister(id) => format!("D {}", id),
            Command::Yield(id) => format!("Y {}", id),
        }
    }

    /// Apply to `kernel`.
    pub fn apply(&self, kernel: &Kernel) -> Result<(), SchedError> {
        match *self {
            Command::Register {
                id,
                period_ms,
                computation_ms,
            } => kernel.register(id, period_ms, computation_ms),
            Command::Unregister(id) => kernel.unregister(id),
            Command::Yield(id) => kernel.yield_task(id).map(|_| ()),
        }
    }
}

/// The adapter between the text channel and a [`Kernel`].
pub struct ControlPlane<'k> {
    kernel: &'k Kernel,
}

impl<'k> ControlPlane<'k> {
    pub fn new(kernel: &'k Kernel) -> Self {
        Self { kernel }
    }

    /// Handle one write to the channel. Every line in `buf` is treated as a
    /// command. Always reports the whole buffer as consumed; errors are
    /// logged and otherwise swallowed.
    pub fn write(&self, buf: &str) -> usize {
        for line in buf.lines().filter(|l| !l.trim().is_empty()) {
            match line.parse::<Command>() {
                Ok(command) => {
                    debug!("control plane: {:?}", command);
                    if let Err(err) = command.apply(self.kernel) {
                        debug!("control plane: {} failed: {}", command.to_line(), err);
                    }
                }
                Err(err) => warn!("control plane: ignoring {}", err),
            }
        }
        buf.len()
    }

    /// Render the status listing.
    pub fn read_status(&self) -> String {
        render_status(&self.kernel.snapshot())
    }
}

/// `<pid> <period_ms> <computation_ms>\n` per task.
pub fn render_status(tasks: &[TaskInfo]) -> String {
    let mut out = String::new();
    for task in tasks {
        let _ = writeln!(out, "{} {} {}", task.id, task.period_ms, task.computation_ms);
    }
    out
}

/// Parse status text back into the listed ids. Lines whose first field is
/// not a number are skipped.
pub fn parse_status(status: &str) -> Vec<TaskId> {
    status
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|pid| pid.parse().ok().map(TaskId))
        .collect()
}
