//! End-to-end lifecycle scenarios over the assembled engine

use std::path::Path;

use image::RgbImage;

use common::{Error, InferenceMethod, Label, ModelType, Version};
use common::utils::remove_dir_if_exists;
use config::EngineConfig;
use qc_vision::Engine;

fn engine_in(tmp: &tempfile::TempDir) -> Engine {
    let mut config = EngineConfig::default();
    config.data_root = tmp.path().join("data");
    config.models_root = tmp.path().join("models");
    Engine::new(config).unwrap()
}

fn write_ok_images(dir: &Path, count: u32) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let img = RgbImage::from_fn(64, 64, |x, y| {
            let v = 120 + ((x * 7 + y * 13 + i * 31) % 17) as u8;
            image::Rgb([v, v, v])
        });
        img.save(dir.join(format!("ok_{:03}.png", i))).unwrap();
    }
}

#[test]
fn train_predict_and_version_history() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);
    write_ok_images(&engine.config().ok_dir(), 12);

    let report = engine.train(ModelType::Patchcore).unwrap();
    assert_eq!(report.version, Version(1));
    assert_eq!(report.samples_used, 12);
    assert!(report.export.is_exported());

    let versions = engine
        .registry()
        .list_versions(ModelType::Patchcore)
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, Version(1));
    assert!(versions[0].has_checkpoint);

    let prediction = engine
        .router()
        .predict(&engine.config().ok_dir().join("ok_000.png"))
        .unwrap();
    assert!((0.0..=1.0).contains(&prediction.score));
    assert!(matches!(prediction.label, Label::Ok | Label::Ng));
    assert_eq!(prediction.method, InferenceMethod::Optimized);

    // the staging workspace is gone and the guard is idle again
    assert!(!engine.config().staging_root().exists());
    assert!(!engine.guard().is_active());
}

#[test]
fn insufficient_corpus_leaves_registry_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);
    write_ok_images(&engine.config().ok_dir(), 5);

    let err = engine.train(ModelType::Patchcore).unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientSamples {
            required: 10,
            found: 5
        }
    ));

    assert_eq!(
        engine
            .registry()
            .current_version(ModelType::Patchcore)
            .unwrap(),
        None
    );
    assert!(!engine.config().staging_root().exists());
    assert!(!engine.router().is_loaded());
}

#[test]
fn version_numbers_increase_by_exactly_one() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);
    write_ok_images(&engine.config().ok_dir(), 12);

    assert_eq!(engine.train(ModelType::Patchcore).unwrap().version, Version(1));
    assert_eq!(engine.train(ModelType::Patchcore).unwrap().version, Version(2));
    assert_eq!(engine.train(ModelType::Patchcore).unwrap().version, Version(3));

    assert_eq!(
        engine
            .registry()
            .current_version(ModelType::Patchcore)
            .unwrap(),
        Some(Version(3))
    );
}

#[test]
fn rollback_switches_served_version() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);
    write_ok_images(&engine.config().ok_dir(), 12);

    engine.train(ModelType::Patchcore).unwrap();
    write_ok_images(&engine.config().ok_dir().join("batch2"), 4);
    engine.train(ModelType::Patchcore).unwrap();

    engine.rollback(ModelType::Patchcore, Version(1)).unwrap();

    // history is untouched; only the alias moved
    assert_eq!(
        engine
            .registry()
            .current_version(ModelType::Patchcore)
            .unwrap(),
        Some(Version(2))
    );
    let alias_checkpoint = engine
        .registry()
        .preferred_checkpoint(ModelType::Patchcore)
        .unwrap();
    assert!(alias_checkpoint.starts_with(engine.registry().alias_dir(ModelType::Patchcore)));

    // and predictions still resolve after the reload
    let prediction = engine
        .router()
        .predict(&engine.config().ok_dir().join("ok_001.png"))
        .unwrap();
    assert!((0.0..=1.0).contains(&prediction.score));

    // a missing target alters nothing
    let err = engine
        .rollback(ModelType::Patchcore, Version(9))
        .unwrap_err();
    assert!(err.is_version_not_found());
    assert!(engine.router().is_loaded());
}

#[test]
fn reference_path_serves_heatmap_when_optimized_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);
    write_ok_images(&engine.config().ok_dir(), 12);
    engine.train(ModelType::Patchcore).unwrap();

    remove_dir_if_exists(&engine.registry().optimized_dir()).unwrap();
    engine.router().reload(ModelType::Patchcore).unwrap();

    let prediction = engine
        .router()
        .predict(&engine.config().ok_dir().join("ok_002.png"))
        .unwrap();
    assert_eq!(prediction.method, InferenceMethod::Reference);
    assert!(prediction
        .heatmap
        .as_deref()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
}

#[test]
fn model_types_train_into_separate_namespaces() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(&tmp);
    write_ok_images(&engine.config().ok_dir(), 12);

    engine.train(ModelType::Patchcore).unwrap();
    engine.train(ModelType::Padim).unwrap();

    assert_eq!(
        engine
            .registry()
            .current_version(ModelType::Patchcore)
            .unwrap(),
        Some(Version(1))
    );
    assert_eq!(
        engine.registry().current_version(ModelType::Padim).unwrap(),
        Some(Version(1))
    );
    assert_eq!(
        engine
            .registry()
            .current_version(ModelType::EfficientAd)
            .unwrap(),
        None
    );

    let models = engine.router().available_models();
    assert!(models.iter().any(|m| m.model_type == ModelType::Padim && m.trained));
    assert!(models
        .iter()
        .any(|m| m.model_type == ModelType::EfficientAd && !m.trained));
}
