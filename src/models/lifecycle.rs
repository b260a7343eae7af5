//! Slot table and load/unload state machine.
//!
//! Each slot moves `Unloaded → Loading → Loaded → Unloading → Unloaded`.
//! Transitions on one slot are serialized: a caller that finds the slot mid
//! transition waits on the slot's condvar until it settles. The factory runs
//! with the slot lock released, so snapshots and other slots are never blocked
//! by a slow load.
//!
//! Phase code should use [`ModelLifecycleManager::acquire`]: the returned
//! [`SlotLease`] keeps the slot loaded while it is alive, and dropping the
//! last lease on a transient slot unloads it. Raw [`ModelLifecycleManager::unload`]
//! never pulls a model out from under a live lease.

use crate::config::{MemoryConfig, ModelFootprints, SpeechConfig};
use crate::error::{Result, SpeechError};
use crate::models::vram::{self, BudgetStatus, DeviceMemory, UsageSource};
use crate::models::{ModelFactory, ModelHandle, ModelKind, ResidencyClass};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Residency state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

impl SlotState {
    fn in_transition(self) -> bool {
        matches!(self, Self::Loading | Self::Unloading)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
        })
    }
}

struct ModelSlot {
    state: SlotState,
    /// Present iff `state` is `Loaded`.
    handle: Option<ModelHandle>,
    leases: usize,
    /// A raw unload arrived while leased; honoured at the last release.
    unload_pending: bool,
    loads: u64,
}

struct SlotCell {
    slot: Mutex<ModelSlot>,
    settled: Condvar,
}

impl SlotCell {
    fn new() -> Self {
        Self {
            slot: Mutex::new(ModelSlot {
                state: SlotState::Unloaded,
                handle: None,
                leases: 0,
                unload_pending: false,
                loads: 0,
            }),
            settled: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ModelSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock once the slot is not mid transition.
    fn lock_settled(&self) -> MutexGuard<'_, ModelSlot> {
        let guard = self.lock();
        self.settled
            .wait_while(guard, |s| s.state.in_transition())
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// Public view of one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSnapshot {
    pub kind: ModelKind,
    pub residency: ResidencyClass,
    pub state: SlotState,
    pub leases: usize,
    /// Successful factory loads since construction.
    pub loads: u64,
}

/// Owns every model slot and the VRAM budget.
///
/// Constructed once and shared by `Arc` between sessions.
pub struct ModelLifecycleManager {
    slots: BTreeMap<ModelKind, SlotCell>,
    factory: Arc<dyn ModelFactory>,
    memory: Arc<dyn DeviceMemory>,
    budget_gb: f64,
    footprints: ModelFootprints,
    shut_down: AtomicBool,
}

impl fmt::Debug for ModelLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelLifecycleManager")
            .field("budget_gb", &self.budget_gb)
            .field("resident", &self.resident())
            .finish_non_exhaustive()
    }
}

impl ModelLifecycleManager {
    /// Create a manager with every slot unloaded.
    pub fn new(
        factory: Arc<dyn ModelFactory>,
        memory: Arc<dyn DeviceMemory>,
        config: &MemoryConfig,
    ) -> Self {
        let slots = ModelKind::ALL
            .into_iter()
            .map(|kind| (kind, SlotCell::new()))
            .collect();
        info!(
            budget_gb = config.max_vram_gb,
            probe = ?config.probe,
            "model lifecycle manager created"
        );
        Self {
            slots,
            factory,
            memory,
            budget_gb: config.max_vram_gb,
            footprints: config.footprint_gb.clone(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Create a manager using the memory probe selected in `config`.
    pub fn from_config(factory: Arc<dyn ModelFactory>, config: &SpeechConfig) -> Self {
        Self::new(factory, vram::probe_from_config(&config.memory), &config.memory)
    }

    fn cell(&self, kind: ModelKind) -> &SlotCell {
        // The table is built from `ModelKind::ALL`; every kind is present.
        &self.slots[&kind]
    }

    /// Materialize `kind` if it is not already loaded.
    ///
    /// Never evicts another slot. Checks the budget after a successful load.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::ModelLoad`] if the factory fails, returns a
    /// handle of the wrong kind, or the manager has been shut down. The slot
    /// is left unloaded.
    pub fn load(&self, kind: ModelKind) -> Result<()> {
        let cell = self.cell(kind);
        let mut slot = cell.lock_settled();
        if slot.state == SlotState::Loaded {
            debug!(model = %kind, "load skipped, already resident");
            return Ok(());
        }
        if self.shut_down.load(Ordering::Acquire) {
            return Err(SpeechError::model_load(
                kind.name(),
                "lifecycle manager is shut down",
            ));
        }
        slot.state = SlotState::Loading;
        drop(slot);

        let started = Instant::now();
        let result = self
            .factory
            .load(kind)
            .and_then(|handle| {
                if handle.kind() == kind {
                    Ok(handle)
                } else {
                    Err(SpeechError::model_load(
                        kind.name(),
                        format!("factory returned a {} model", handle.kind()),
                    ))
                }
            })
            .map_err(|e| match e {
                e @ SpeechError::ModelLoad { .. } => e,
                other => SpeechError::model_load(kind.name(), other.to_string()),
            });

        let mut slot = cell.lock();
        match result {
            Ok(handle) => {
                slot.handle = Some(handle);
                slot.state = SlotState::Loaded;
                slot.loads += 1;
                drop(slot);
                cell.settled.notify_all();
                info!(
                    model = %kind,
                    residency = %kind.residency(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model loaded"
                );
                self.check_budget();
                Ok(())
            }
            Err(e) => {
                slot.state = SlotState::Unloaded;
                drop(slot);
                cell.settled.notify_all();
                warn!(model = %kind, error = %e, "model load failed");
                Err(e)
            }
        }
    }

    /// Release `kind` and request device memory reclamation.
    ///
    /// Returns `true` if this call unloaded the slot. Unloading an unloaded
    /// slot is a no-op. Persistent slots are only released by
    /// [`shutdown`](Self::shutdown); a leased transient slot is released
    /// when its last lease drops.
    pub fn unload(&self, kind: ModelKind) -> bool {
        let cell = self.cell(kind);
        let mut slot = cell.lock_settled();
        if slot.state == SlotState::Unloaded {
            debug!(model = %kind, "unload skipped, not resident");
            return false;
        }
        if kind.residency() == ResidencyClass::Persistent && !self.shut_down.load(Ordering::Acquire)
        {
            warn!(model = %kind, "refusing to unload persistent model before shutdown");
            return false;
        }
        if slot.leases > 0 {
            slot.unload_pending = true;
            debug!(model = %kind, leases = slot.leases, "unload deferred until leases drop");
            return false;
        }
        self.finish_unload(kind, cell, slot);
        true
    }

    /// Takes the handle out of a `Loaded` slot, drops it with the lock
    /// released, then reclaims device memory.
    fn finish_unload(&self, kind: ModelKind, cell: &SlotCell, mut slot: MutexGuard<'_, ModelSlot>) {
        slot.state = SlotState::Unloading;
        let handle = slot.handle.take();
        drop(slot);

        drop(handle);
        self.memory.reclaim();

        let mut slot = cell.lock();
        slot.state = SlotState::Unloaded;
        slot.unload_pending = false;
        drop(slot);
        cell.settled.notify_all();
        info!(model = %kind, residency = %kind.residency(), "model unloaded");
    }

    /// Load `kind` if needed and pin it for the lifetime of the lease.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::ModelLoad`] if the slot cannot be loaded.
    pub fn acquire(self: &Arc<Self>, kind: ModelKind) -> Result<SlotLease> {
        let cell = self.cell(kind);
        loop {
            let mut slot = cell.lock_settled();
            if slot.state == SlotState::Loaded
                && let Some(handle) = slot.handle.clone()
            {
                slot.leases += 1;
                debug!(model = %kind, leases = slot.leases, "slot leased");
                return Ok(SlotLease {
                    manager: Arc::clone(self),
                    kind,
                    handle: Some(handle),
                });
            }
            drop(slot);
            // Another session may unload between this load and the re-lock;
            // the loop then loads again.
            self.load(kind)?;
        }
    }

    fn release(&self, kind: ModelKind) {
        let cell = self.cell(kind);
        let mut slot = cell.lock();
        slot.leases = slot.leases.saturating_sub(1);
        debug!(model = %kind, leases = slot.leases, "slot lease released");
        if slot.leases > 0 || slot.state != SlotState::Loaded {
            return;
        }
        let release_now = match kind.residency() {
            ResidencyClass::Transient => true,
            ResidencyClass::Persistent => {
                slot.unload_pending && self.shut_down.load(Ordering::Acquire)
            }
        };
        if release_now {
            self.finish_unload(kind, cell, slot);
        }
    }

    pub fn state(&self, kind: ModelKind) -> SlotState {
        self.cell(kind).lock().state
    }

    pub fn is_loaded(&self, kind: ModelKind) -> bool {
        self.state(kind) == SlotState::Loaded
    }

    /// Slots currently holding a handle, in slot order.
    pub fn resident(&self) -> Vec<ModelKind> {
        self.slots
            .iter()
            .filter(|(_, cell)| cell.lock().handle.is_some())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Transient slots currently holding a handle.
    pub fn resident_transient(&self) -> Vec<ModelKind> {
        self.resident()
            .into_iter()
            .filter(|k| k.is_transient())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.slots
            .iter()
            .map(|(kind, cell)| {
                let slot = cell.lock();
                SlotSnapshot {
                    kind: *kind,
                    residency: kind.residency(),
                    state: slot.state,
                    leases: slot.leases,
                    loads: slot.loads,
                }
            })
            .collect()
    }

    /// Soft VRAM ceiling in GB.
    pub fn budget(&self) -> f64 {
        self.budget_gb
    }

    /// Current VRAM usage in GB: device-reported when available, otherwise
    /// the sum of the resident slots' configured footprints.
    pub fn current_usage(&self) -> f64 {
        self.usage_with_source().0
    }

    fn usage_with_source(&self) -> (f64, UsageSource) {
        match self.memory.allocated_gb() {
            Some(gb) => (gb, UsageSource::Device),
            None => (self.accounted_usage(&self.resident()), UsageSource::Accounted),
        }
    }

    fn accounted_usage(&self, kinds: &[ModelKind]) -> f64 {
        kinds.iter().map(|k| self.footprints.for_kind(*k)).sum()
    }

    /// Whether `kinds` could all be resident at once alongside what is
    /// already loaded, judged by configured footprints.
    pub fn fits_together(&self, kinds: &[ModelKind]) -> bool {
        let mut projected = self.resident();
        for kind in kinds {
            if !projected.contains(kind) {
                projected.push(*kind);
            }
        }
        self.accounted_usage(&projected) <= self.budget_gb
    }

    /// Compare usage against the budget. Logs a warning when exceeded;
    /// nothing is refused.
    pub fn check_budget(&self) -> BudgetStatus {
        let (usage_gb, source) = self.usage_with_source();
        let status = BudgetStatus {
            usage_gb,
            budget_gb: self.budget_gb,
            source,
            resident: self.resident(),
        };
        if status.exceeded() {
            warn!(
                usage_gb = status.usage_gb,
                budget_gb = status.budget_gb,
                source = ?status.source,
                resident = ?status.resident,
                "VRAM budget exceeded"
            );
        } else {
            debug!(
                usage_gb = status.usage_gb,
                budget_gb = status.budget_gb,
                "VRAM within budget"
            );
        }
        status
    }

    /// Release every slot, persistent ones included. Leased slots are
    /// released when their last lease drops. Further loads are refused.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("model lifecycle manager shutting down");
        for kind in ModelKind::ALL {
            self.unload(kind);
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

/// Keeps a slot loaded while alive.
///
/// Dropping the last lease of a transient slot unloads it. The lease lets go
/// of its own handle before releasing the slot, so the model is gone by the
/// time [`DeviceMemory::reclaim`] runs unless a caller still holds an `Arc`
/// taken from [`handle`](Self::handle).
pub struct SlotLease {
    manager: Arc<ModelLifecycleManager>,
    kind: ModelKind,
    /// `None` only inside `drop`.
    handle: Option<ModelHandle>,
}

impl SlotLease {
    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    /// The leased model.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Pipeline`] if the lease has already let go of
    /// its handle, which only happens while it is being dropped.
    pub fn handle(&self) -> Result<&ModelHandle> {
        self.handle.as_ref().ok_or_else(|| {
            SpeechError::Pipeline(format!("lease on {} already released", self.kind))
        })
    }
}

impl fmt::Debug for SlotLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotLease").field("kind", &self.kind).finish()
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        drop(self.handle.take());
        self.manager.release(self.kind);
    }
}
