// Copyright 2026 The crashpost developers. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! Facts about the machine the crash happened on.

use std::process::Command;

use procfs_core::{ExplicitSystemInfo, FromRead, FromReadSI, KernelStats, Meminfo};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

/// The output of the host-facts command, a flat JSON object.
///
/// Every field is optional, a machine without e.g. a chassis type simply
/// doesn't have one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostFacts {
    #[serde(rename = "Hostname")]
    pub hostname: Option<String>,
    #[serde(rename = "Chassis")]
    pub chassis: Option<String>,
    #[serde(rename = "Virtualization")]
    pub virtualization: Option<String>,
    #[serde(rename = "Timezone")]
    pub timezone: Option<String>,
    #[serde(rename = "OS_NAME")]
    pub os_name: Option<String>,
    #[serde(rename = "OS_VERSION_ID")]
    pub os_version_id: Option<String>,
    #[serde(rename = "OS_BUILD_ID")]
    pub os_build_id: Option<String>,
    #[serde(rename = "OS_VARIANT_ID")]
    pub os_variant_id: Option<String>,
}

impl HostFacts {
    pub fn parse(json: &str) -> Result<HostFacts, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Run `command` and parse what it prints. Failures give empty facts.
    pub fn collect(command: &[String]) -> HostFacts {
        let (program, args) = match command.split_first() {
            Some(split) => split,
            None => return HostFacts::default(),
        };
        let output = match Command::new(program).args(args).output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!("system_info: {program} exited with {}", output.status);
                return HostFacts::default();
            }
            Err(e) => {
                warn!("system_info: cannot run {program}: {e}");
                return HostFacts::default();
            }
        };
        match HostFacts::parse(&String::from_utf8_lossy(&output.stdout)) {
            Ok(facts) => facts,
            Err(e) => {
                warn!("system_info: malformed host facts: {e}");
                HostFacts::default()
            }
        }
    }

    /// The OS build id, falling back to the variant id when it is empty.
    pub fn os_build(&self) -> Option<&str> {
        match self.os_build_id.as_deref() {
            Some(build) if !build.is_empty() => Some(build),
            _ => self.os_variant_id.as_deref(),
        }
    }
}

/// Information about the system that hosted the crashed process.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    /// Machine architecture, e.g. `x86_64`.
    pub arch: String,
    pub cpu_count: usize,
    /// Total memory in bytes.
    pub memory_size: Option<u64>,
    /// Available memory in bytes.
    pub free_memory: Option<u64>,
    pub boot_time: Option<OffsetDateTime>,
    pub kernel_version: Option<String>,
    /// `uname -a`
    pub raw_description: Option<String>,
    pub host: HostFacts,
}

impl SystemInfo {
    /// Gather facts about the local machine.
    pub fn gather(host_facts_command: Option<&[String]>) -> SystemInfo {
        let host = host_facts_command
            .map(HostFacts::collect)
            .unwrap_or_default();

        let meminfo = Meminfo::from_file("/proc/meminfo")
            .map_err(|e| debug!("system_info: cannot read meminfo: {e}"))
            .ok();
        // Only `btime` is read; these values just satisfy the parser's
        // signature and don't affect it.
        let si = ExplicitSystemInfo {
            boot_time_secs: 0,
            ticks_per_second: 100,
            page_size: 4096,
            is_little_endian: cfg!(target_endian = "little"),
        };
        let boot_time = KernelStats::from_file("/proc/stat", &si)
            .map_err(|e| debug!("system_info: cannot read kernel stats: {e}"))
            .ok()
            .and_then(|stats| OffsetDateTime::from_unix_timestamp(stats.btime as i64).ok());

        SystemInfo {
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            memory_size: meminfo.as_ref().map(|m| m.mem_total),
            free_memory: meminfo.as_ref().and_then(|m| m.mem_available),
            boot_time,
            kernel_version: std::fs::read_to_string("/proc/sys/kernel/osrelease")
                .ok()
                .map(|release| release.trim().to_string()),
            raw_description: command_output("uname", &["-a"]),
            host,
        }
    }
}

fn command_output(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
