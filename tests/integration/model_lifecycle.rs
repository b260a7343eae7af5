//! Lifecycle manager driven through the public registry API.

use crate::helpers::{ScriptedBackends, speech_segment};
use attune::config::{DetectorBackend, SpeechConfig};
use attune::models::{
    AccountedMemory, DeviceMemory, LoaderRegistry, ModelKind, ModelLifecycleManager, SlotState,
};
use std::sync::Arc;

fn manager_with(registry: LoaderRegistry, config: &SpeechConfig) -> Arc<ModelLifecycleManager> {
    Arc::new(ModelLifecycleManager::new(
        Arc::new(registry),
        Arc::new(AccountedMemory::new()) as Arc<dyn DeviceMemory>,
        &config.memory,
    ))
}

#[test]
fn builtin_detectors_serve_leases() {
    let config = SpeechConfig::default();
    let manager = manager_with(LoaderRegistry::with_builtin_detectors(&config), &config);

    let lease = manager.acquire(ModelKind::SpeechEmotion).unwrap();
    let detector = lease.handle().unwrap().speech_emotion().unwrap();
    let sample = detector.detect(&speech_segment().samples, 16_000).unwrap();
    assert_eq!(sample.label, "anger");
    assert!(manager.is_loaded(ModelKind::SpeechEmotion));

    drop(lease);
    assert_eq!(manager.state(ModelKind::SpeechEmotion), SlotState::Unloaded);
}

#[test]
fn external_backend_has_no_builtin_loader() {
    let mut config = SpeechConfig::default();
    config.detectors.text_emotion = DetectorBackend::External;
    let registry = LoaderRegistry::with_builtin_detectors(&config);
    assert!(!registry.has_loader(ModelKind::TextEmotion));
    assert!(registry.has_loader(ModelKind::SpeechEmotion));

    let manager = manager_with(registry, &config);
    let err = manager.acquire(ModelKind::TextEmotion).unwrap_err();
    assert!(err.is_model_load());
    assert!(err.to_string().contains("no loader registered"));
    assert_eq!(manager.state(ModelKind::TextEmotion), SlotState::Unloaded);
}

#[test]
fn persistent_slots_survive_turn_unloads() {
    let config = SpeechConfig::default();
    let manager = manager_with(ScriptedBackends::new().registry(&config), &config);

    manager.load(ModelKind::Llm).unwrap();
    assert!(!manager.unload(ModelKind::Llm));
    assert!(manager.is_loaded(ModelKind::Llm));

    manager.load(ModelKind::Stt).unwrap();
    assert!(manager.unload(ModelKind::Stt));
    assert!(!manager.unload(ModelKind::Stt));

    manager.shutdown();
    assert!(manager.resident().is_empty());
    assert!(manager.load(ModelKind::Stt).is_err());
}

#[test]
fn budget_tracks_resident_footprints() {
    let config = SpeechConfig::default();
    let manager = manager_with(ScriptedBackends::new().registry(&config), &config);

    manager.load(ModelKind::Llm).unwrap();
    manager.load(ModelKind::Vad).unwrap();
    let status = manager.check_budget();
    assert!((status.usage_gb - 1.65).abs() < 1e-9);
    assert!(!status.exceeded());
    assert!(manager.fits_together(&[ModelKind::SpeechEmotion, ModelKind::TextEmotion]));

    // Every model at once is more than the default 5.5 GB.
    assert!(!manager.fits_together(&ModelKind::ALL));
    for kind in ModelKind::ALL {
        manager.load(kind).unwrap();
    }
    let status = manager.check_budget();
    assert!(status.exceeded());
    assert_eq!(status.resident.len(), ModelKind::ALL.len());
}

#[test]
fn snapshot_reports_leases_and_loads() {
    let config = SpeechConfig::default();
    let manager = manager_with(LoaderRegistry::with_builtin_detectors(&config), &config);

    let first = manager.acquire(ModelKind::Vad).unwrap();
    let second = manager.acquire(ModelKind::Vad).unwrap();
    let vad = manager
        .snapshot()
        .into_iter()
        .find(|s| s.kind == ModelKind::Vad)
        .unwrap();
    assert_eq!(vad.leases, 2);
    assert_eq!(vad.loads, 1);

    drop(first);
    drop(second);
    // Persistent: still resident with no leases.
    assert!(manager.is_loaded(ModelKind::Vad));
}
