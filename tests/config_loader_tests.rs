use fulfillment_monitor::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

const MANAGED_VARS: &[&str] = &[
    "FULFILLMENT_PROFILE",
    "FULFILLMENT_API_BIND_ADDR",
    "FULFILLMENT_LOG_LEVEL",
    "FULFILLMENT_OPERATOR_TOKEN",
    "FULFILLMENT_OPERATOR_TOKENS",
    "FULFILLMENT_WORKER_CONCURRENCY",
    "FULFILLMENT_JOB_MAX_ATTEMPTS",
    "FULFILLMENT_JOB_JITTER_FACTOR",
    "FULFILLMENT_ALERT_RECIPIENTS",
    "FULFILLMENT_ESCALATION_RECIPIENTS",
    "FULFILLMENT_ESCALATION_THRESHOLD_HOURS",
    "FULFILLMENT_EMAIL_API_URL",
    "FULFILLMENT_EMAIL_API_TOKEN",
];

fn clear_env() {
    for var in MANAGED_VARS {
        unsafe {
            env::remove_var(var);
        }
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf());
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.worker.concurrency, 4);
    assert_eq!(cfg.worker.max_attempts, 5);
    assert_eq!(cfg.notifications.escalation_threshold_hours, 4);
    assert!(cfg.operator_tokens.is_empty());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "FULFILLMENT_API_BIND_ADDR=127.0.0.1:3000\nFULFILLMENT_WORKER_CONCURRENCY=2\n",
    );
    write_env_file(
        &temp_dir,
        ".env.local",
        "FULFILLMENT_PROFILE=test\nFULFILLMENT_API_BIND_ADDR=127.0.0.1:4000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test",
        "FULFILLMENT_API_BIND_ADDR=192.168.0.10:5000\nFULFILLMENT_JOB_MAX_ATTEMPTS=7\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "FULFILLMENT_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    let loader = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf());
    let cfg = loader.load().expect("layered config loads");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.worker.concurrency, 2);
    assert_eq!(cfg.worker.max_attempts, 7);
    clear_env();
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "FULFILLMENT_LOG_LEVEL=debug\nFULFILLMENT_ALERT_RECIPIENTS=ops@example.com\n",
    );

    unsafe {
        env::set_var("FULFILLMENT_LOG_LEVEL", "warn");
        env::set_var(
            "FULFILLMENT_ESCALATION_RECIPIENTS",
            "lead@example.com, director@example.com ,",
        );
    }

    let loader = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf());
    let cfg = loader.load().expect("config loads");

    assert_eq!(cfg.log_level, "warn");
    assert_eq!(
        cfg.notifications.default_recipients,
        vec!["ops@example.com".to_string()]
    );
    assert_eq!(
        cfg.notifications.escalation_recipients,
        vec![
            "lead@example.com".to_string(),
            "director@example.com".to_string()
        ]
    );
    clear_env();
}

#[test]
fn production_profile_requires_operator_tokens() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("FULFILLMENT_PROFILE", "prod");
    }

    let loader = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf());
    let err = loader.load().expect_err("prod without tokens must fail");
    assert!(matches!(err, ConfigError::MissingOperatorTokens));

    unsafe {
        env::set_var("FULFILLMENT_OPERATOR_TOKENS", "alpha, beta");
    }
    let cfg = loader.load().expect("prod with tokens loads");
    assert_eq!(cfg.operator_tokens, vec!["alpha".to_string(), "beta".to_string()]);
    clear_env();
}

#[test]
fn invalid_worker_settings_are_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("FULFILLMENT_JOB_JITTER_FACTOR", "1.5");
    }

    let loader = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf());
    let err = loader.load().expect_err("jitter above 1.0 must fail");
    assert!(matches!(err, ConfigError::InvalidJitterFactor { .. }));
    clear_env();
}

#[test]
fn invalid_bind_addr_is_reported() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("FULFILLMENT_API_BIND_ADDR", "not-an-addr");
    }

    let loader = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf());
    let err = loader.load().expect_err("bad bind addr must fail");
    assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
    clear_env();
}

#[test]
fn redacted_json_hides_secrets() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("FULFILLMENT_OPERATOR_TOKEN", "super-secret-token");
        env::set_var("FULFILLMENT_EMAIL_API_URL", "https://mail.example.com/send");
        env::set_var("FULFILLMENT_EMAIL_API_TOKEN", "mail-secret");
    }

    let loader = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf());
    let cfg = loader.load().expect("config loads");
    let json = cfg.redacted_json().unwrap();

    assert!(!json.contains("super-secret-token"));
    assert!(!json.contains("mail-secret"));
    assert!(json.contains("[REDACTED]"));
    clear_env();
}
