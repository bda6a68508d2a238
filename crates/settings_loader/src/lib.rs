//! # Settings Loader
//!
//! Centralised configuration loading for the MRI analysis tools. Settings come
//! from an optional `settings.json`, then `.env`, then the process
//! environment, each layer overriding the previous one.
//!
//! ## Usage Examples
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//!
//! // Load settings from a specific path
//! let settings = settings_loader::load_settings("config/settings.json")?;
//!
//! // Fall back to ./settings.json, then to built-in defaults, then apply env
//! let path = Some(PathBuf::from("settings.json"));
//! let settings = settings_loader::resolve_settings(path.as_ref())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use models::{LlmProvider, Settings};

pub const DEFAULT_SETTINGS_FILE: &str = "settings.json";

/// Loads settings from a JSON file
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Reading settings file: {}", path.display()))?;
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing settings JSON in {}", path.display()))?;
    Ok(settings)
}

/// Loads settings from the default location (settings.json in the current directory)
pub fn load_default_settings() -> Result<Settings> {
    load_settings(DEFAULT_SETTINGS_FILE)
}

/// Loads settings from an optional path, returning None if no path is provided
pub fn load_optional_settings(path: Option<&PathBuf>) -> Result<Option<Settings>> {
    match path {
        Some(settings_path) => Ok(Some(load_settings(settings_path)?)),
        None => Ok(None),
    }
}

/// An explicitly requested file must load. Without one, `settings.json` in
/// the current directory is used when present. Returns None when neither
/// applies.
pub fn load_settings_with_fallback(path: Option<&PathBuf>) -> Result<Option<Settings>> {
    if let Some(settings) = load_optional_settings(path)? {
        return Ok(Some(settings));
    }

    if !settings_file_exists(DEFAULT_SETTINGS_FILE) {
        return Ok(None);
    }
    load_default_settings().map(Some)
}

/// Full resolution used by the binaries: file (or defaults), then `.env`,
/// then environment overrides.
pub fn resolve_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let mut settings = match load_settings_with_fallback(path)? {
        Some(settings) => settings,
        None => {
            tracing::debug!("No settings file found, using built-in defaults");
            Settings::default()
        }
    };

    if let Ok(env_path) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", env_path.display());
    }

    apply_overrides(&mut settings, |key| std::env::var(key).ok());
    sanitize(&mut settings);
    Ok(settings)
}

/// Drops values that would otherwise silently change pipeline behaviour.
pub fn sanitize(settings: &mut Settings) {
    let policy = &mut settings.consistency;
    if let (Some(limit), None) = (policy.max_confidence_spread, policy.spread_limit()) {
        tracing::warn!("Ignoring invalid consistency.max_confidence_spread {limit} (expected a non-negative number)");
        policy.max_confidence_spread = None;
    }
}

/// Applies environment-style overrides. `lookup` maps a variable name to its
/// value; empty values are ignored.
pub fn apply_overrides<F>(settings: &mut Settings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(v) = get("MODEL_SERVER_URL") {
        settings.model_server.base_url = v;
    }
    if let Some(v) = get("CLASSIFIER_MODEL") {
        settings.model_server.classifier_model = v;
    }
    if let Some(v) = get("GRADCAM_MODEL") {
        settings.model_server.gradcam_model = v;
    }
    if let Some(secs) = get("MODEL_SERVER_TIMEOUT_SECS").and_then(|v| parse_secs("MODEL_SERVER_TIMEOUT_SECS", &v)) {
        settings.model_server.timeout_secs = secs;
    }

    if let Some(v) = get("LLM_PROVIDER") {
        match v.to_lowercase().as_str() {
            "gemini" => settings.llm.set_provider(LlmProvider::Gemini),
            "ollama" => settings.llm.set_provider(LlmProvider::Ollama),
            other => tracing::warn!("Ignoring unknown LLM_PROVIDER '{other}'"),
        }
    }

    match settings.llm.provider {
        LlmProvider::Gemini => {
            if let Some(v) = get("GEMINI_API_KEY") {
                settings.llm.api_key = Some(v);
            }
            if let Some(v) = get("GEMINI_MODEL") {
                settings.llm.model = Some(v);
            }
            if let Some(v) = get("GEMINI_BASE_URL") {
                settings.llm.base_url = Some(v);
            }
        }
        LlmProvider::Ollama => {
            if let Some(v) = get("OLLAMA_BASE_URL") {
                settings.llm.base_url = Some(v);
            }
            if let Some(v) = get("OLLAMA_MODEL") {
                settings.llm.model = Some(v);
            }
        }
    }
    if let Some(secs) = get("LLM_TIMEOUT_SECS").and_then(|v| parse_secs("LLM_TIMEOUT_SECS", &v)) {
        settings.llm.timeout_secs = secs;
    }

    if let Some(v) = get("REPORT_OUTPUT_DIR") {
        settings.report.output_dir = PathBuf::from(v);
    }
}

/// Checks if a settings file exists at the given path
pub fn settings_file_exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists() && path.as_ref().is_file()
}

fn parse_secs(key: &str, raw: &str) -> Option<u64> {
    match raw.parse::<u64>() {
        Ok(secs) if secs > 0 => Some(secs),
        _ => {
            tracing::warn!("Ignoring invalid {key}='{raw}' (expected a positive integer)");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_load_settings_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "model_server": {{ "classifier_model": "resnet_v2" }}, "report": {{ "output_dir": "out" }} }}"#
        )
        .unwrap();

        let settings = load_settings(file.path()).unwrap();
        assert_eq!(settings.model_server.classifier_model, "resnet_v2");
        assert_eq!(settings.report.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_load_settings_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let err = load_settings(file.path()).unwrap_err();
        assert!(err.to_string().contains("Parsing settings JSON"));
    }

    #[test]
    fn test_explicit_missing_path_is_an_error() {
        let missing = PathBuf::from("/definitely/not/here/settings.json");
        assert!(load_settings_with_fallback(Some(&missing)).is_err());
    }

    #[test]
    fn test_optional_none() {
        assert!(load_optional_settings(None).unwrap().is_none());
    }

    #[test]
    fn test_overrides_apply_gemini_key() {
        let mut settings = Settings::default();
        apply_overrides(
            &mut settings,
            lookup(&[
                ("GEMINI_API_KEY", "abc123"),
                ("GEMINI_MODEL", "gemini-2.0-flash"),
                ("MODEL_SERVER_URL", "http://gpu-box:8080"),
                ("LLM_TIMEOUT_SECS", "5"),
            ]),
        );

        assert_eq!(settings.llm.api_key.as_deref(), Some("abc123"));
        assert_eq!(settings.llm.model(), "gemini-2.0-flash");
        assert_eq!(settings.model_server.base_url, "http://gpu-box:8080");
        assert_eq!(settings.llm.timeout_secs, 5);
    }

    #[test]
    fn test_blank_key_leaves_enrichment_disabled() {
        let mut settings = Settings::default();
        apply_overrides(&mut settings, lookup(&[("GEMINI_API_KEY", "   ")]));
        assert!(settings.llm.api_key.is_none());
    }

    #[test]
    fn test_switch_to_ollama_uses_local_defaults() {
        let mut settings = Settings::default();
        apply_overrides(
            &mut settings,
            lookup(&[("LLM_PROVIDER", "ollama"), ("OLLAMA_MODEL", "qwen2.5:7b"), ("GEMINI_API_KEY", "ignored")]),
        );

        assert_eq!(settings.llm.provider, LlmProvider::Ollama);
        assert_eq!(settings.llm.base_url(), "http://localhost:11434");
        assert_eq!(settings.llm.model(), "qwen2.5:7b");
        assert!(settings.llm.api_key.is_none());
    }

    #[test]
    fn test_provider_from_file_keeps_its_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "llm": {{ "provider": "ollama" }} }}"#).unwrap();

        let mut settings = load_settings(file.path()).unwrap();
        apply_overrides(&mut settings, lookup(&[("LLM_PROVIDER", "ollama")]));
        assert_eq!(settings.llm.base_url(), "http://localhost:11434");
        assert_eq!(settings.llm.model(), "llama3.2");

        apply_overrides(&mut settings, lookup(&[("LLM_PROVIDER", "gemini"), ("GEMINI_API_KEY", "k")]));
        assert_eq!(settings.llm.base_url(), "https://generativelanguage.googleapis.com/v1beta/");
        assert_eq!(settings.llm.model(), "gemini-1.5-flash");
        assert_eq!(settings.llm.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_sanitize_drops_negative_spread_limit() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "consistency": {{ "max_confidence_spread": -5.0 }} }}"#).unwrap();

        let mut settings = load_settings(file.path()).unwrap();
        sanitize(&mut settings);
        assert_eq!(settings.consistency.max_confidence_spread, None);

        settings.consistency.max_confidence_spread = Some(15.0);
        sanitize(&mut settings);
        assert_eq!(settings.consistency.max_confidence_spread, Some(15.0));
    }

    #[test]
    fn test_invalid_timeout_ignored() {
        let mut settings = Settings::default();
        apply_overrides(&mut settings, lookup(&[("MODEL_SERVER_TIMEOUT_SECS", "soon")]));
        assert_eq!(settings.model_server.timeout_secs, 30);
    }
}
