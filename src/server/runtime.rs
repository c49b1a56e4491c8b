/// Tokio worker thread count for this process.
///
/// Detection order:
/// 1. `HERMES_GUARD_WORKERS` env var ("4" threads or "3500m" millicores)
/// 2. cgroup v2: `/sys/fs/cgroup/cpu.max`
/// 3. cgroup v1: `/sys/fs/cgroup/cpu/cpu.cfs_quota_us` + `cpu.cfs_period_us`
/// 4. `std::thread::available_parallelism()`
///
/// Fractional quotas round up: a 1.5 CPU pod gets two workers.
/// Runs before tracing is installed, so it reports on stderr.
pub fn worker_threads() -> usize {
    let (threads, source) = detect();
    let threads = threads.max(1);
    eprintln!("[runtime] {} worker threads ({})", threads, source);
    threads
}

fn detect() -> (usize, &'static str) {
    if let Some(n) = std::env::var("HERMES_GUARD_WORKERS")
        .ok()
        .and_then(|v| parse_cpu_value(&v))
    {
        return (n, "HERMES_GUARD_WORKERS");
    }
    if let Some(n) = std::fs::read_to_string("/sys/fs/cgroup/cpu.max")
        .ok()
        .and_then(|c| parse_cgroup_v2_cpu(&c))
    {
        return (n, "cgroup v2 quota");
    }
    if let (Ok(quota), Ok(period)) = (
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_quota_us"),
        std::fs::read_to_string("/sys/fs/cgroup/cpu/cpu.cfs_period_us"),
    ) {
        if let Some(n) = quota_to_threads(&quota, &period) {
            return (n, "cgroup v1 quota");
        }
    }
    let n = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    (n, "host cpus")
}

fn parse_cpu_value(value: &str) -> Option<usize> {
    let value = value.trim();
    match value.strip_suffix('m') {
        Some(milli) => milli.parse::<usize>().ok().map(|m| m.div_ceil(1000)),
        None => value.parse::<usize>().ok(),
    }
}

/// `cpu.max` is "quota period", or "max period" when unlimited.
fn parse_cgroup_v2_cpu(content: &str) -> Option<usize> {
    let mut parts = content.split_whitespace();
    let quota = parts.next()?;
    let period = parts.next()?;
    if quota == "max" {
        return None;
    }
    quota_to_threads(quota, period)
}

fn quota_to_threads(quota: &str, period: &str) -> Option<usize> {
    let quota: i64 = quota.trim().parse().ok()?;
    let period: i64 = period.trim().parse().ok()?;
    if quota <= 0 || period <= 0 {
        return None;
    }
    Some((quota as u64).div_ceil(period as u64) as usize)
}
