use crate::{heartbeat::HeartbeatMode, policy::Policy, util::formatted_size};

/// Snapshot of what the pacer did so far.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PacerStatistics {
    pub evaluations: u64,
    pub heartbeats: u64,
    pub heartbeat_mode: Option<HeartbeatMode>,
    pub pacing_ratio: Option<i32>,
    pub memory_ceiling: Option<u64>,
    pub policy: Option<Policy>,
}

impl std::fmt::Display for PacerStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pacer statistics:")?;
        writeln!(f, "  Evaluations: {}", self.evaluations)?;
        match self.heartbeat_mode {
            Some(HeartbeatMode::Cycle) => {
                writeln!(f, "  Heartbeats: {} (per collection cycle)", self.heartbeats)?
            }
            Some(HeartbeatMode::Polling(interval)) => writeln!(
                f,
                "  Heartbeats: {} (polling every {:?})",
                self.heartbeats, interval
            )?,
            Some(HeartbeatMode::Disabled) | None => writeln!(f, "  Heartbeats: disabled")?,
        }
        match self.pacing_ratio {
            Some(ratio) if ratio < 0 => writeln!(f, "  Pacing ratio: off")?,
            Some(ratio) => writeln!(f, "  Pacing ratio: {}%", ratio)?,
            None => writeln!(f, "  Pacing ratio: not set")?,
        }
        if let Some(ceiling) = self.memory_ceiling {
            writeln!(f, "  Memory ceiling: {}", formatted_size(ceiling))?;
        }
        if let Some(policy) = self.policy {
            writeln!(
                f,
                "  Policy: gc_percent={} max_ram_percentage={:.2}",
                policy.gc_percent, policy.max_ram_percentage
            )?;
        }
        Ok(())
    }
}
