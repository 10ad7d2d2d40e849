//! Best-effort total memory limit of the current process.
//!
//! Physical memory, clamped by the cgroup limit when the process runs inside one.

use crate::error::ProbeError;

/// Limits at or above this (1 EiB) mean "no limit".
const UNLIMITED_THRESHOLD_BYTES: u64 = 1 << 60;

/// Memory available to this process: the smaller of physical memory and the
/// cgroup limit.
pub fn memory_limit() -> Result<u64, ProbeError> {
    let total = physical_memory();
    if total == 0 {
        return Err(ProbeError::new("cannot determine system memory"));
    }
    Ok(match cgroup_memory_limit() {
        Some(limit) if limit > 0 && limit < total => limit,
        _ => total,
    })
}

#[cfg(unix)]
pub fn physical_memory() -> u64 {
    unsafe {
        let pages = libc::sysconf(libc::_SC_PHYS_PAGES);
        let page_size = libc::sysconf(libc::_SC_PAGESIZE);
        if pages <= 0 || page_size <= 0 {
            return 0;
        }
        (pages as u64).saturating_mul(page_size as u64)
    }
}

#[cfg(windows)]
pub fn physical_memory() -> u64 {
    use winapi::um::sysinfoapi::{GlobalMemoryStatusEx, MEMORYSTATUSEX};
    unsafe {
        let mut status: MEMORYSTATUSEX = std::mem::zeroed();
        status.dwLength = std::mem::size_of::<MEMORYSTATUSEX>() as _;
        if GlobalMemoryStatusEx(&mut status) == 0 {
            return 0;
        }
        status.ullTotalPhys
    }
}

#[cfg(not(any(unix, windows)))]
pub fn physical_memory() -> u64 {
    0
}

/// Paths of the cgroup the process belongs to, parsed from `/proc/self/cgroup`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcSelfCgroup {
    /// Unified hierarchy entry, `0::/path`.
    pub v2_path: Option<String>,
    /// v1 memory controller entry, `N:memory:/path`.
    pub v1_memory_path: Option<String>,
}

pub fn parse_proc_self_cgroup(contents: &str) -> ProcSelfCgroup {
    let mut parsed = ProcSelfCgroup::default();
    for line in contents.lines() {
        let mut parts = line.trim().splitn(3, ':');
        let (id, controllers, path) = match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(controllers), Some(path)) => (id, controllers, path.trim()),
            _ => continue,
        };
        if parsed.v2_path.is_none() && id == "0" && controllers.is_empty() && !path.is_empty() {
            parsed.v2_path = Some(path.to_string());
        }
        if parsed.v1_memory_path.is_none() && controllers.split(',').any(|c| c.trim() == "memory") {
            parsed.v1_memory_path = Some(path.to_string());
        }
    }
    parsed
}

/// Parses `memory.max` (v2) or `memory.limit_in_bytes` (v1). `None` means unlimited or unknown.
pub fn parse_cgroup_memory_limit(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "max" {
        return None;
    }
    match raw.parse::<u64>() {
        Ok(value) if value < UNLIMITED_THRESHOLD_BYTES => Some(value),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(target: "comet_pacer", raw, error = %err, "failed to parse cgroup memory limit");
            None
        }
    }
}

#[cfg(target_os = "linux")]
fn cgroup_memory_limit() -> Option<u64> {
    use std::path::{Path, PathBuf};

    // Tightest limit between the cgroup and its ancestors.
    fn hierarchical_limit(mount: &Path, cgroup_path: &str, file: &str) -> Option<u64> {
        let mut rel = PathBuf::from(cgroup_path.trim_start_matches('/'));
        let mut best: Option<u64> = None;
        loop {
            if let Ok(raw) = std::fs::read_to_string(mount.join(&rel).join(file)) {
                if let Some(limit) = parse_cgroup_memory_limit(&raw) {
                    best = Some(best.map_or(limit, |best| best.min(limit)));
                }
            }
            if !rel.pop() {
                break;
            }
        }
        best
    }

    let contents = std::fs::read_to_string("/proc/self/cgroup").ok()?;
    let parsed = parse_proc_self_cgroup(&contents);
    parsed
        .v2_path
        .as_deref()
        .and_then(|path| hierarchical_limit(Path::new("/sys/fs/cgroup"), path, "memory.max"))
        .or_else(|| {
            parsed.v1_memory_path.as_deref().and_then(|path| {
                hierarchical_limit(
                    Path::new("/sys/fs/cgroup/memory"),
                    path,
                    "memory.limit_in_bytes",
                )
            })
        })
}

#[cfg(not(target_os = "linux"))]
fn cgroup_memory_limit() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_v1_and_v2_entries() {
        let parsed = parse_proc_self_cgroup(
            "12:cpu,cpuacct:/docker/abc\n5:memory:/docker/abc\n0::/user.slice/app.scope\n",
        );
        assert_eq!(parsed.v1_memory_path.as_deref(), Some("/docker/abc"));
        assert_eq!(parsed.v2_path.as_deref(), Some("/user.slice/app.scope"));

        let parsed = parse_proc_self_cgroup("garbage\n\n");
        assert_eq!(parsed, ProcSelfCgroup::default());
    }

    #[test]
    fn parses_limits() {
        assert_eq!(parse_cgroup_memory_limit("max\n"), None);
        assert_eq!(parse_cgroup_memory_limit(""), None);
        assert_eq!(parse_cgroup_memory_limit("536870912\n"), Some(512 << 20));
        assert_eq!(parse_cgroup_memory_limit("9223372036854771712"), None);
        assert_eq!(parse_cgroup_memory_limit("lots"), None);
    }

    #[cfg(unix)]
    #[test]
    fn system_limit_is_positive() {
        let limit = memory_limit().unwrap();
        assert!(limit > 0);
        assert!(limit <= physical_memory());
    }
}
