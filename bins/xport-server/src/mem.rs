//! Resident-memory sampling for the benchmark harness.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Current resident set size of this process, if the platform exposes it.
#[cfg(target_os = "linux")]
pub fn current_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().strip_suffix("kB")?.trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
pub fn current_rss_bytes() -> Option<u64> {
    None
}

/// Background task polling RSS at a fixed cadence and keeping the maximum.
pub struct PeakSampler {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<u64>,
}

impl PeakSampler {
    pub fn start(interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = tokio::spawn(async move {
            let mut peak = current_rss_bytes().unwrap_or(0);
            while !flag.load(Ordering::Relaxed) {
                tokio::time::sleep(interval).await;
                if let Some(rss) = current_rss_bytes() {
                    peak = peak.max(rss);
                }
            }
            peak
        });
        Self { stop, handle }
    }

    /// Stop sampling and return the peak observed, in bytes.
    pub async fn stop(self) -> u64 {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.await.unwrap_or(0)
    }
}
