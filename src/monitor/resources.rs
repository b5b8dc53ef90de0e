//! Resource gating and sampling
//!
//! The gate decides whether a unit of work may start based on free disk
//! space; the sampler is the one background thread permitted to run
//! alongside a training unit, collecting process memory snapshots at a fixed
//! interval.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::utils::fmt::bytes_to_gb;

/// Source of free-space readings for a storage volume
pub trait FreeSpaceProbe: Send + Sync {
    /// Free bytes on the volume containing `path`
    fn free_bytes(&self, path: &Path) -> Result<u64>;
}

/// Probe backed by `statvfs` on the real filesystem
#[derive(Debug, Default)]
pub struct VolumeProbe;

impl FreeSpaceProbe for VolumeProbe {
    #[cfg(unix)]
    fn free_bytes(&self, path: &Path) -> Result<u64> {
        use std::os::unix::ffi::OsStrExt;

        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }

        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }

    #[cfg(not(unix))]
    fn free_bytes(&self, _path: &Path) -> Result<u64> {
        // No portable probe on this platform; report unlimited so the gate
        // never blocks a sweep it cannot measure.
        Ok(u64::MAX)
    }
}

/// Probe returning a fixed value, for simulation and tests
#[derive(Debug)]
pub struct FixedProbe(pub u64);

impl FreeSpaceProbe for FixedProbe {
    fn free_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.0)
    }
}

/// Disk-space gate for sweep work
pub struct ResourceGate {
    root: PathBuf,
    probe: Box<dyn FreeSpaceProbe>,
}

impl ResourceGate {
    /// Gate over the volume containing `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            probe: Box::new(VolumeProbe),
        }
    }

    /// Replace the free-space probe
    pub fn with_probe(mut self, probe: Box<dyn FreeSpaceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Whether at least `min_gb` of free space is available
    ///
    /// A failed probe is logged and treated as capacity available; the gate
    /// must never fail a sweep it cannot measure.
    pub fn has_capacity(&self, min_gb: f64) -> bool {
        match self.probe.free_bytes(&self.root) {
            Ok(free) => {
                let free_gb = bytes_to_gb(free);
                if free_gb < min_gb {
                    warn!(
                        free_gb = format!("{:.2}", free_gb).as_str(),
                        required_gb = min_gb,
                        "low disk space"
                    );
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                warn!("free-space probe failed, assuming capacity: {}", e);
                true
            }
        }
    }
}

/// Remove the oldest sweep output directories, keeping the newest N
///
/// Called before a new sweep starts (never in rerun mode) to reclaim space
/// proactively. Failures are logged per directory and never propagated.
pub fn cleanup_old_sweeps(output_dir: &Path, keep_newest: usize, prefix: &str) {
    let entries = match std::fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut sweep_dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(prefix))
                    .unwrap_or(false)
        })
        .collect();

    sweep_dirs.sort_by_key(|p| {
        std::cmp::Reverse(
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH),
        )
    });

    for old_dir in sweep_dirs.into_iter().skip(keep_newest) {
        info!(path = %old_dir.display(), "removing old sweep directory");
        if let Err(e) = std::fs::remove_dir_all(&old_dir) {
            warn!(path = %old_dir.display(), "failed to remove old sweep directory: {}", e);
        }
    }
}

/// One resource snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReading {
    /// Seconds since sampling started
    pub elapsed_secs: f64,

    /// Process resident set size in bytes
    pub rss_bytes: u64,
}

/// Summary of a sampling session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUsageSummary {
    /// Total sampling duration in seconds
    pub duration_secs: f64,

    /// Number of readings collected
    pub readings_count: usize,

    /// Mean resident set size in megabytes
    pub rss_mb_mean: f64,

    /// Peak resident set size in megabytes
    pub rss_mb_max: f64,

    /// Minimum resident set size in megabytes
    pub rss_mb_min: f64,
}

/// Background resource sampler
///
/// Cooperative: the sampling thread checks an explicit stop flag and is
/// joined with a bounded timeout so a stuck sampler cannot block shutdown.
pub struct ResourceSampler {
    stop: Arc<AtomicBool>,
    done_rx: Receiver<()>,
    readings: Arc<Mutex<Vec<ResourceReading>>>,
    handle: Option<JoinHandle<()>>,
    started: Instant,
}

impl ResourceSampler {
    /// Start sampling at the given interval
    pub fn start(interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let readings = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = mpsc::channel();

        let thread_stop = Arc::clone(&stop);
        let thread_readings = Arc::clone(&readings);
        let started = Instant::now();

        let handle = std::thread::spawn(move || {
            const SLICE: Duration = Duration::from_millis(50);

            while !thread_stop.load(Ordering::Relaxed) {
                if let Some(rss) = current_rss_bytes() {
                    thread_readings.lock().push(ResourceReading {
                        elapsed_secs: started.elapsed().as_secs_f64(),
                        rss_bytes: rss,
                    });
                }

                // Sleep in short slices so a stop request is noticed quickly.
                let mut slept = Duration::ZERO;
                while slept < interval && !thread_stop.load(Ordering::Relaxed) {
                    let step = SLICE.min(interval - slept);
                    std::thread::sleep(step);
                    slept += step;
                }
            }

            let _ = done_tx.send(());
        });

        Self {
            stop,
            done_rx,
            readings,
            handle: Some(handle),
            started,
        }
    }

    /// Signal the sampler to stop, join it within `join_timeout`, and
    /// summarize the collected readings
    pub fn stop(mut self, join_timeout: Duration) -> ResourceUsageSummary {
        self.stop.store(true, Ordering::Relaxed);

        match self.done_rx.recv_timeout(join_timeout) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
            Err(_) => {
                warn!("resource sampler did not stop within {:?}, detaching", join_timeout);
            }
        }

        let readings = self.readings.lock();
        summarize(&readings, self.started.elapsed())
    }
}

fn summarize(readings: &[ResourceReading], duration: Duration) -> ResourceUsageSummary {
    const MB: f64 = 1024.0 * 1024.0;

    let (mean, max, min) = if readings.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let values: Vec<f64> = readings.iter().map(|r| r.rss_bytes as f64 / MB).collect();
        let sum: f64 = values.iter().sum();
        (
            sum / values.len() as f64,
            values.iter().cloned().fold(f64::MIN, f64::max),
            values.iter().cloned().fold(f64::MAX, f64::min),
        )
    };

    ResourceUsageSummary {
        duration_secs: duration.as_secs_f64(),
        readings_count: readings.len(),
        rss_mb_mean: mean,
        rss_mb_max: max,
        rss_mb_min: min,
    }
}

/// Current process resident set size
#[cfg(target_os = "linux")]
fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(rss_pages * page_size as u64)
}

#[cfg(not(target_os = "linux"))]
fn current_rss_bytes() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_gate_blocks_below_threshold() {
        let gate = ResourceGate::new("/").with_probe(Box::new(FixedProbe(GB)));
        assert!(!gate.has_capacity(5.0));
        assert!(gate.has_capacity(0.5));
    }

    #[test]
    fn test_gate_allows_at_threshold() {
        let gate = ResourceGate::new("/").with_probe(Box::new(FixedProbe(2 * GB)));
        assert!(gate.has_capacity(2.0));
    }

    #[test]
    fn test_failed_probe_assumes_capacity() {
        struct FailingProbe;
        impl FreeSpaceProbe for FailingProbe {
            fn free_bytes(&self, _path: &Path) -> Result<u64> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "probe down").into())
            }
        }

        let gate = ResourceGate::new("/").with_probe(Box::new(FailingProbe));
        assert!(gate.has_capacity(100.0));
    }

    #[test]
    fn test_cleanup_keeps_newest() {
        let dir = TempDir::new().unwrap();
        for name in ["sweep_old", "sweep_mid", "sweep_new"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
            std::thread::sleep(Duration::from_millis(10));
        }
        std::fs::create_dir(dir.path().join("unrelated")).unwrap();

        cleanup_old_sweeps(dir.path(), 1, "sweep_");

        assert!(!dir.path().join("sweep_old").exists());
        assert!(!dir.path().join("sweep_mid").exists());
        assert!(dir.path().join("sweep_new").exists());
        assert!(dir.path().join("unrelated").exists());
    }

    #[test]
    fn test_sampler_stops_within_timeout() {
        let sampler = ResourceSampler::start(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(100));

        let started = Instant::now();
        let summary = sampler.stop(Duration::from_secs(2));

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(summary.duration_secs >= 0.1);
        // On Linux the sampler collects real readings; elsewhere it may
        // collect none, which is still a valid (empty) summary.
        if summary.readings_count > 0 {
            assert!(summary.rss_mb_max >= summary.rss_mb_min);
        }
    }
}
