use std::fs;

use tracing::debug;

use crate::model::Requirement;

/// Answers whether one environment requirement currently holds.
///
/// Probing never fails: anything that cannot be confirmed evaluates to `false`.
pub trait Prober {
    fn probe(&self, requirement: &Requirement) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct SystemProber;

impl SystemProber {
    pub fn new() -> Self {
        Self
    }
}

impl Prober for SystemProber {
    fn probe(&self, requirement: &Requirement) -> bool {
        let met = match requirement {
            Requirement::Tool(name) => which::which(name).is_ok(),
            Requirement::File(path) => match fs::metadata(path) {
                Ok(metadata) if metadata.is_dir() => fs::read_dir(path).is_ok(),
                Ok(metadata) if metadata.is_file() => fs::File::open(path).is_ok(),
                _ => false,
            },
            Requirement::Elevated => is_elevated(),
            // Evaluated by the orchestrator against the task's device.
            Requirement::Transport(_) => false,
        };
        debug!(requirement = %requirement, met, "probed requirement");
        met
    }
}

pub fn is_elevated() -> bool {
    nix::unistd::geteuid().is_root()
}
