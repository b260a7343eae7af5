//! VRAM usage measurement and budget reporting.
//!
//! The budget is advisory: exceeding it is logged, never refused. Usage comes
//! either from the device (`nvidia-smi`) or, when the device cannot be queried,
//! from the configured per-slot footprints of the resident slots.

use crate::config::{MemoryConfig, MemoryProbe};
use crate::models::ModelKind;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Access to device memory state.
pub trait DeviceMemory: Send + Sync {
    /// Currently allocated device memory in GB, or `None` if the device
    /// cannot report it. `None` makes the manager fall back to accounting.
    fn allocated_gb(&self) -> Option<f64>;

    /// Post-release hook, called once per unload after the slot's last
    /// reference to the model has been dropped.
    ///
    /// The built-in probes only count calls. Embedders whose runtime keeps a
    /// caching allocator implement this to empty that cache.
    fn reclaim(&self);
}

/// No device query; usage is accounted from configured footprints.
#[derive(Debug, Default)]
pub struct AccountedMemory {
    reclaims: AtomicU64,
}

impl AccountedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of reclaim requests received.
    pub fn reclaim_count(&self) -> u64 {
        self.reclaims.load(Ordering::Relaxed)
    }
}

impl DeviceMemory for AccountedMemory {
    fn allocated_gb(&self) -> Option<f64> {
        None
    }

    fn reclaim(&self) {
        self.reclaims.fetch_add(1, Ordering::Relaxed);
    }
}

/// Queries the first NVIDIA GPU through `nvidia-smi`.
#[derive(Debug, Default)]
pub struct NvidiaSmiMemory {
    reclaims: AtomicU64,
}

impl NvidiaSmiMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reclaim_count(&self) -> u64 {
        self.reclaims.load(Ordering::Relaxed)
    }
}

impl DeviceMemory for NvidiaSmiMemory {
    fn allocated_gb(&self) -> Option<f64> {
        let output = std::process::Command::new("nvidia-smi")
            .args(["--query-gpu=memory.used", "--format=csv,noheader,nounits"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let mib = parse_nvidia_smi_used_mib(&String::from_utf8_lossy(&output.stdout))?;
        Some(mib / 1024.0)
    }

    fn reclaim(&self) {
        // Counted only. nvidia-smi has no call that releases memory.
        self.reclaims.fetch_add(1, Ordering::Relaxed);
        debug!("device memory reclaim hook ran");
    }
}

/// Parse the first line of
/// `nvidia-smi --query-gpu=memory.used --format=csv,noheader,nounits`.
pub fn parse_nvidia_smi_used_mib(stdout: &str) -> Option<f64> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let value = line.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value)
}

/// Build the probe selected in configuration.
pub fn probe_from_config(config: &MemoryConfig) -> Arc<dyn DeviceMemory> {
    match config.probe {
        MemoryProbe::Accounted => Arc::new(AccountedMemory::new()),
        MemoryProbe::NvidiaSmi => Arc::new(NvidiaSmiMemory::new()),
    }
}

/// Where a usage figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    Device,
    Accounted,
}

/// Point-in-time budget check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub usage_gb: f64,
    pub budget_gb: f64,
    pub source: UsageSource,
    /// Slots holding a handle when the check ran.
    pub resident: Vec<ModelKind>,
}

impl BudgetStatus {
    pub fn exceeded(&self) -> bool {
        self.usage_gb > self.budget_gb
    }

    /// Remaining room under the budget (negative when exceeded).
    pub fn headroom_gb(&self) -> f64 {
        self.budget_gb - self.usage_gb
    }
}
