//! Engine lifecycle states

use core::fmt;

/// Lifecycle of the execution engine
///
/// Only `Running` permits decode/execute. The engine refuses a transition
/// into the state it already occupies, reporting `false` rather than
/// erroring.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum RunState {
    /// Freshly constructed or reset; not executing
    #[default]
    Init,
    /// Inside the run loop, or single-stepped by a host
    Running,
    /// Stopped by an unrecognized opcode or an explicit halt
    Halted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Init => "INIT",
            RunState::Running => "RUNNING",
            RunState::Halted => "HALTED",
        })
    }
}
