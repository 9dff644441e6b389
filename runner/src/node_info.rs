use apollo_lib::api::{DiskInfo, NodeInfo};
use sysinfo::{Disks, System};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Gather the telemetry published with every heartbeat.
pub fn collect_node_info() -> NodeInfo {
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu_all();

    let disks = Disks::new_with_refreshed_list()
        .iter()
        .map(|disk| DiskInfo {
            mount_point: disk.mount_point().display().to_string(),
            total_mb: (disk.total_space() / BYTES_PER_MB) as i64,
            available_mb: (disk.available_space() / BYTES_PER_MB) as i64,
        })
        .collect();

    NodeInfo {
        cpu_count: system.cpus().len() as i64,
        ram_total_mb: (system.total_memory() / BYTES_PER_MB) as i64,
        disks,
        uptime_sec: System::uptime() as i64,
        uptime_idle_sec: read_idle_seconds(),
    }
}

/// Second field of /proc/uptime; zero where the file is unavailable.
fn read_idle_seconds() -> i64 {
    std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|contents| {
            contents
                .split_whitespace()
                .nth(1)
                .and_then(|idle| idle.parse::<f64>().ok())
        })
        .map(|idle| idle as i64)
        .unwrap_or(0)
}
