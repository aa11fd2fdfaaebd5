use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Seconds between job-source polls within a monitor session. Defaults to `20`.
pub static HEARTBEAT_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PB_HEARTBEAT_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(20)
});

/// key: reconcile-cadence -> usage-log pass every N heartbeats
pub static RECONCILE_EVERY: Lazy<u64> = Lazy::new(|| {
    std::env::var("PB_RECONCILE_EVERY")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3)
});

/// Upper bound on a polling session in seconds; `0` disables the bound.
pub static SESSION_MAX_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PB_SESSION_MAX_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0)
});

/// key: reconcile-wait -> days before an unmatched external job is forced to ERROR
pub static USAGE_WAIT_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("PB_USAGE_WAIT_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(5)
});

/// Decimal scale used when splitting reported usage cost across accounts.
pub static COST_SCALE: Lazy<u32> = Lazy::new(|| {
    std::env::var("PB_COST_SCALE")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .filter(|value| *value <= 8)
        .unwrap_or(2)
});

/// Field width of the metering system's document-name column.
pub static JOB_NAME_WIDTH: Lazy<usize> = Lazy::new(|| {
    std::env::var("PB_JOB_NAME_WIDTH")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value >= 16)
        .unwrap_or(64)
});

/// Directory receiving documents that have no direct-print target. Defaults to `hold`.
pub static HOLD_DIR: Lazy<String> =
    Lazy::new(|| std::env::var("PB_HOLD_DIR").unwrap_or_else(|_| "hold".to_string()));

/// Path of the JSON connection registry file. Defaults to `connections.json`.
pub static CONNECTIONS_FILE: Lazy<String> = Lazy::new(|| {
    std::env::var("PB_CONNECTIONS_FILE").unwrap_or_else(|_| "connections.json".to_string())
});

/// Supplier tag stamped on every job record created from the external source.
pub static SUPPLIER_TAG: Lazy<String> =
    Lazy::new(|| std::env::var("PB_SUPPLIER_TAG").unwrap_or_else(|_| "portal".to_string()));

/// Reserved identities that are never provisioned or billed. `PB_RESERVED_USERS`
/// extends the built-in set with a comma-separated list.
pub static RESERVED_USERS: Lazy<HashSet<String>> = Lazy::new(|| {
    let mut reserved: HashSet<String> = ["admin", "root", "guest", "system", "printer"]
        .iter()
        .map(|name| (*name).to_string())
        .collect();
    if let Ok(value) = std::env::var("PB_RESERVED_USERS") {
        for item in value.split(',') {
            let trimmed = item.trim().to_ascii_lowercase();
            if !trimmed.is_empty() {
                reserved.insert(trimmed);
            }
        }
    }
    reserved
});

/// Poll interval while shutdown waits for in-flight document work to finish.
pub static SHUTDOWN_POLL_MS: Lazy<u64> = Lazy::new(|| {
    std::env::var("PB_SHUTDOWN_POLL_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(250)
});
