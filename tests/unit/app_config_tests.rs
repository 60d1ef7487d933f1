/*!
 * Tests for configuration loading and validation
 */

use bookling::app_config::{Config, LogLevel, ProviderKind};
use bookling::translation::ConflictPolicy;

use crate::common;

#[test]
fn test_loadOrCreate_withMissingFile_shouldWriteDefaults() {
    let dir = common::create_temp_dir().unwrap();
    let path = dir.path().join("conf.json");

    let config = Config::load_or_create(&path).unwrap();
    assert!(path.exists());
    assert_eq!(config.translation.provider, ProviderKind::Stub);

    // Loading again reads the written file
    let reloaded = Config::load_or_create(&path).unwrap();
    assert_eq!(reloaded.flashcards.top_n, config.flashcards.top_n);
}

#[test]
fn test_loadOrCreate_withCustomFile_shouldApplyOverrides() {
    let dir = common::create_temp_dir().unwrap();
    let path = common::create_test_file(
        dir.path(),
        "conf.json",
        r#"{
            "source_language": "fr",
            "target_language": "de",
            "translation": { "conflict_policy": "strict", "worker_count": 2 },
            "retry": { "batch": { "max_attempts": 6, "base_delay_ms": 250, "multiplier": 2.0, "max_delay_ms": 8000 } },
            "flashcards": { "top_n": 5 },
            "log_level": "debug"
        }"#,
    )
    .unwrap();

    let config = Config::load_or_create(&path).unwrap();
    assert_eq!(config.source_language, "fr");
    assert_eq!(config.translation.conflict_policy, ConflictPolicy::Strict);
    assert_eq!(config.translation.worker_count, 2);
    assert_eq!(config.retry.batch.max_attempts, 6);
    assert_eq!(config.retry.stage.max_attempts, 3);
    assert_eq!(config.flashcards.top_n, 5);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert!(config.validate().is_ok());
}

#[test]
fn test_validate_withZeroTopN_shouldFail() {
    let mut config = Config::default();
    config.flashcards.top_n = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_withUnknownLanguage_shouldFail() {
    let mut config = Config::default();
    config.target_language = "zz".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_maxInputBytes_shouldConvertMegabytes() {
    let mut config = Config::default();
    config.storage.max_input_mb = 2;
    assert_eq!(config.max_input_bytes(), 2 * 1024 * 1024);
}
