// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use grokit::config::Settings;
use grokit::error::GrokitError;
use grokit::llm::retry::RetryPolicy;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_settings_default_values() {
    let settings = Settings::default();

    assert_eq!(settings.api.base_url, "https://api.x.ai/v1/chat/completions");
    assert_eq!(settings.api.api_key_env, "XAI_API_KEY");
    assert_eq!(settings.defaults.model, "grok-4");
    assert_eq!(settings.defaults.max_tool_rounds, 10);
    assert!(settings.defaults.stream);
}

#[test]
fn test_settings_api_key_priority() {
    let mut settings = Settings::default();
    settings.api.api_key_env = "GROKIT_TEST_API_KEY_31337".to_string();
    settings.api.api_key = Some("config-key".to_string());

    std::env::remove_var("GROKIT_TEST_API_KEY_31337");
    assert_eq!(settings.get_api_key(), Some("config-key".to_string()));

    std::env::set_var("GROKIT_TEST_API_KEY_31337", "env-key");
    assert_eq!(settings.get_api_key(), Some("env-key".to_string()));

    std::env::remove_var("GROKIT_TEST_API_KEY_31337");
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{
            "defaults": {"model": "grok-3-mini"},
            "scheduler": {"batch_size": 2, "min_delay_ms": 0}
        }"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();

    assert_eq!(settings.defaults.model, "grok-3-mini");
    assert!(settings.defaults.stream);
    assert_eq!(settings.scheduler.batch_size, 2);
    assert_eq!(settings.scheduler.min_delay(), Duration::ZERO);
    assert_eq!(settings.scheduler.inter_request_delay_ms, 100);
    assert!(settings.scheduler.cacheable_operations.contains("read_file"));
    assert_eq!(settings.resilience.chat_rate_limit_budget, 10);
}

#[test]
fn test_corrupt_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(
        Settings::load_from(&path),
        Err(GrokitError::Config(_))
    ));
}

#[test]
fn test_validation_rejects_cached_writes() {
    let mut settings = Settings::default();
    settings
        .scheduler
        .cacheable_operations
        .insert("create_file".to_string());

    match settings.validate() {
        Err(GrokitError::Config(message)) => assert!(message.contains("create_file")),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_policies_follow_resilience_section() {
    let mut settings = Settings::default();
    settings.resilience.backoff_base_secs = 0.5;
    settings.resilience.jitter_max_secs = 0.0;

    let chat = RetryPolicy::for_chat(&settings.resilience);
    let dispatch = RetryPolicy::for_dispatch(&settings.resilience);

    assert_eq!(chat.rate_limit_budget, 10);
    assert_eq!(dispatch.rate_limit_budget, 8);
    assert_eq!(chat.server_error_budget, 3);
    assert_eq!(chat.backoff_delay(1), Duration::from_millis(500));
    assert_eq!(chat.backoff_delay(3), Duration::from_secs(2));
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("settings.json");
    let mut settings = Settings::default();
    settings.defaults.system_prompt = Some("Be brief.".to_string());

    settings.save_to(&path).unwrap();
    let loaded = Settings::load_from(&path).unwrap();

    assert_eq!(loaded.defaults.system_prompt.as_deref(), Some("Be brief."));
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_oversized_backoff_in_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(&path, r#"{"resilience": {"backoff_max_secs": 1e30}}"#).unwrap();

    let settings = Settings::load_from(&path).unwrap();
    match settings.validate() {
        Err(GrokitError::Config(message)) => assert!(message.contains("backoff_max_secs")),
        other => panic!("expected config error, got {other:?}"),
    }
}
