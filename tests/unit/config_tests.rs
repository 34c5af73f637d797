use std::time::Duration;

use agent_dashboard::config::{CONFIG_PATH_ENV, DATA_DIR_ENV};
use agent_dashboard::{AppError, DashboardConfig};
use serial_test::serial;

fn sample_toml(data_dir: &str) -> String {
    format!(
        r#"
data_dir = '{data_dir}'
lock_timeout_ms = 2500
stale_lock_seconds = 30
resume_cli = "auggie"
max_loop_iterations = 5
completion_phrases = ["ship it"]

[loop_prompts.review]
prompt = "Review the diff again."
end_condition = "REVIEW_DONE"
"#
    )
}

#[test]
fn parses_full_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data_dir = temp.path().to_string_lossy().to_string();

    let config = DashboardConfig::from_toml_str(&sample_toml(&data_dir)).expect("valid config");

    assert_eq!(config.lock_timeout(), Duration::from_millis(2500));
    assert_eq!(config.stale_lock_after(), Duration::from_secs(30));
    assert_eq!(config.max_loop_iterations, 5);
    assert_eq!(config.completion_phrases, vec!["ship it".to_owned()]);
    let review = config.loop_prompts.get("review").expect("review prompt");
    assert_eq!(review.end_condition, "REVIEW_DONE");
    assert_eq!(config.sessions_path(), temp.path().join("sessions.json"));
    assert_eq!(config.hook_log_path(), temp.path().join("hook.log"));
}

#[test]
#[serial]
fn empty_document_uses_defaults() {
    std::env::remove_var(DATA_DIR_ENV);
    let config = DashboardConfig::from_toml_str("").expect("defaults are valid");

    assert_eq!(config.lock_timeout_ms, 10_000);
    assert_eq!(config.stale_lock_seconds, 60);
    assert_eq!(config.resume_cli, "auggie");
    assert_eq!(config.max_loop_iterations, 50);
    assert!(config
        .completion_phrases
        .iter()
        .any(|p| p == "task is complete"));
    assert!(config.data_dir.ends_with(".augment/dashboard"));
}

#[test]
fn zero_lock_timeout_is_rejected() {
    let result = DashboardConfig::from_toml_str("lock_timeout_ms = 0");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn zero_stale_threshold_is_rejected() {
    let result = DashboardConfig::from_toml_str("stale_lock_seconds = 0");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn zero_loop_cap_is_rejected() {
    let result = DashboardConfig::from_toml_str("max_loop_iterations = 0");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn blank_resume_cli_is_rejected() {
    let result = DashboardConfig::from_toml_str("resume_cli = '  '");
    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn malformed_toml_is_config_error() {
    let err = DashboardConfig::from_toml_str("lock_timeout_ms = [").unwrap_err();
    assert!(err.to_string().starts_with("config:"), "got {err}");
}

#[test]
#[serial]
fn data_dir_env_overrides_default() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::env::set_var(DATA_DIR_ENV, temp.path());
    std::env::remove_var(CONFIG_PATH_ENV);

    let config = DashboardConfig::resolve(None).expect("resolve");
    std::env::remove_var(DATA_DIR_ENV);

    assert_eq!(config.data_dir, temp.path());
}

#[test]
#[serial]
fn config_file_in_data_dir_is_picked_up() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("config.toml"), "max_loop_iterations = 7\n")
        .expect("write config");
    std::env::set_var(DATA_DIR_ENV, temp.path());
    std::env::remove_var(CONFIG_PATH_ENV);

    let config = DashboardConfig::resolve(None).expect("resolve");
    std::env::remove_var(DATA_DIR_ENV);

    assert_eq!(config.max_loop_iterations, 7);
    assert_eq!(config.data_dir, temp.path());
}

#[test]
#[serial]
fn explicit_path_wins_over_environment() {
    let temp = tempfile::tempdir().expect("tempdir");
    let env_file = temp.path().join("env.toml");
    let explicit_file = temp.path().join("explicit.toml");
    std::fs::write(&env_file, "max_loop_iterations = 3\n").expect("write env config");
    std::fs::write(&explicit_file, "max_loop_iterations = 9\n").expect("write explicit config");
    std::env::set_var(CONFIG_PATH_ENV, &env_file);

    let from_env = DashboardConfig::resolve(None).expect("resolve env");
    let explicit = DashboardConfig::resolve(Some(&explicit_file)).expect("resolve explicit");
    std::env::remove_var(CONFIG_PATH_ENV);

    assert_eq!(from_env.max_loop_iterations, 3);
    assert_eq!(explicit.max_loop_iterations, 9);
}

#[test]
fn missing_explicit_file_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = DashboardConfig::resolve(Some(&temp.path().join("absent.toml")));
    assert!(matches!(result, Err(AppError::Config(_))));
}
