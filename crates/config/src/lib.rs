use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ── Vault ─────────────────────────────────────────────────────────────────────

/// Which vault the engine operates against.  Function registrations are
/// scoped by `name`; the note store reads `notes_path`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub name: String,
    /// Directory holding the vault's markdown notes.  Overridden at runtime
    /// by the `FLINT_VAULT_PATH` environment variable when set.
    pub notes_path: String,
    /// Directory for engine-owned state (function registry database).
    pub data_dir: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            notes_path: "vault".to_string(),
            data_dir: ".flint".to_string(),
        }
    }
}

// ── Execution limits ──────────────────────────────────────────────────────────

/// Resource limits applied to every evaluation.
///
/// | Limit                | Exhaustion surfaces as          |
/// |----------------------|---------------------------------|
/// | `default_timeout_ms` | `timeout`                       |
/// | `max_operations`     | `timeout`                       |
/// | `max_memory_bytes`   | `runtimeError` (out of memory)  |
/// | `max_stack_bytes`    | `runtimeError` (stack overflow) |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Timeout used when a request does not carry one.
    pub default_timeout_ms: u64,
    /// Upper bound for any requested timeout.
    pub max_timeout_ms: u64,
    /// Step budget per evaluation, counted in interrupt-poll intervals.
    pub max_operations: u64,
    /// Heap limit of the per-evaluation JavaScript runtime.
    pub max_memory_bytes: usize,
    /// Guest stack limit; must stay below `worker_stack_bytes`.
    pub max_stack_bytes: usize,
    /// `console.*` lines kept per evaluation; later lines are dropped.
    pub max_log_lines: usize,
    /// Stack size of the per-evaluation worker thread.
    pub worker_stack_bytes: usize,
    /// Number of compiled units kept in the content-addressed compile cache.
    pub compile_cache_size: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            max_timeout_ms: 60_000,
            max_operations: 5_000_000,
            max_memory_bytes: 64 * 1024 * 1024,
            max_stack_bytes: 1024 * 1024,
            max_log_lines: 1_000,
            worker_stack_bytes: 16 * 1024 * 1024,
            compile_cache_size: 128,
        }
    }
}

impl ExecConfig {
    /// See [`AppConfig::effective_timeout_ms`].
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        match requested {
            Some(ms) if ms > 0 => ms.min(self.max_timeout_ms),
            _ => self.default_timeout_ms.min(self.max_timeout_ms),
        }
    }
}

// ── Security gate ─────────────────────────────────────────────────────────────

/// An operator-supplied deny-list rule, appended to the built-in set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    /// Regular expression matched against masked program text.
    pub pattern: String,
    /// `warning`, `high` or `critical`.  Unknown values are treated as `high`.
    #[serde(default = "default_rule_severity")]
    pub severity: String,
    #[serde(default)]
    pub message: String,
}

fn default_rule_severity() -> String {
    "high".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Built-in rule ids to switch off.
    pub disabled_rules: Vec<String>,
    pub extra_rules: Vec<RuleConfig>,
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Path of the redb database, relative to `vault.data_dir` unless absolute.
    pub db_path: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: "functions.redb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub vault: VaultConfig,
    pub exec: ExecConfig,
    pub security: SecurityConfig,
    pub registry: RegistryConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)
                .with_context(|| format!("parsing config at {}", path.display()))?;
        }

        if let Ok(value) = env::var("FLINT_VAULT_PATH") {
            if !value.is_empty() {
                config.vault.notes_path = value;
            }
        }
        if let Ok(value) = env::var("FLINT_DATA_DIR") {
            if !value.is_empty() {
                config.vault.data_dir = value;
            }
        }
        if let Ok(value) = env::var("FLINT_LOG_LEVEL") {
            if !value.is_empty() {
                config.telemetry.log_level = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Absolute or data-dir-relative location of the function registry.
    pub fn registry_db_path(&self) -> PathBuf {
        let db = Path::new(&self.registry.db_path);
        if db.is_absolute() {
            db.to_path_buf()
        } else {
            Path::new(&self.vault.data_dir).join(db)
        }
    }

    /// Clamp a requested timeout into `(0, max_timeout_ms]`, substituting the
    /// default when none (or zero) was requested.
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        self.exec.effective_timeout_ms(requested)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    // ── Security-critical defaults ────────────────────────────────────────
    // Loosening any of these should be a deliberate, reviewed decision.

    #[test]
    fn security_defaults_bound_execution() {
        let cfg = AppConfig::default();
        assert!(cfg.exec.default_timeout_ms <= cfg.exec.max_timeout_ms);
        assert!(cfg.exec.max_operations > 0);
        assert!(cfg.exec.max_memory_bytes > 0 && cfg.exec.max_memory_bytes <= 256 * 1024 * 1024);
        assert!(cfg.exec.max_stack_bytes < cfg.exec.worker_stack_bytes);
        assert!(
            cfg.security.disabled_rules.is_empty(),
            "no built-in gate rule may be disabled by default"
        );
        assert!(cfg.security.extra_rules.is_empty());
    }

    #[test]
    fn cosmetic_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.vault.name, "default");
        assert_eq!(cfg.vault.data_dir, ".flint");
        assert_eq!(cfg.registry.db_path, "functions.redb");
        assert_eq!(cfg.telemetry.log_level, "info");
        assert_eq!(cfg.exec.compile_cache_size, 128);
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.exec.default_timeout_ms, 5_000);
    }

    #[test]
    fn load_from_valid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.toml");
        fs::write(
            &path,
            r#"
[vault]
name = "work"

[exec]
default_timeout_ms = 250
max_memory_bytes = 8388608

[security]
disabled_rules = ["timers"]

[[security.extra_rules]]
id = "no-secrets"
pattern = "\\bsecret\\b"
severity = "critical"
message = "secrets are off limits"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.vault.name, "work");
        assert_eq!(cfg.exec.default_timeout_ms, 250);
        assert_eq!(cfg.exec.max_memory_bytes, 8 * 1024 * 1024);
        // Unspecified values keep their defaults.
        assert_eq!(cfg.exec.max_timeout_ms, 60_000);
        assert_eq!(cfg.security.disabled_rules, vec!["timers".to_string()]);
        assert_eq!(cfg.security.extra_rules.len(), 1);
        assert_eq!(cfg.security.extra_rules[0].severity, "critical");
    }

    #[test]
    fn extra_rule_severity_defaults_to_high() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rule.toml");
        fs::write(
            &path,
            r#"
[[security.extra_rules]]
id = "x"
pattern = "x"
"#,
        )
        .unwrap();
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.security.extra_rules[0].severity, "high");
        assert!(cfg.security.extra_rules[0].message.is_empty());
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.vault.name = "roundtrip".to_string();
        cfg.exec.max_operations = 42;
        cfg.security.disabled_rules = vec!["reflection".to_string()];

        cfg.save_to(&path).unwrap();
        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.vault.name, "roundtrip");
        assert_eq!(loaded.exec.max_operations, 42);
        assert_eq!(loaded.security.disabled_rules, vec!["reflection".to_string()]);
    }

    #[test]
    fn registry_path_is_relative_to_data_dir() {
        let mut cfg = AppConfig::default();
        cfg.vault.data_dir = "/var/flint".to_string();
        assert_eq!(cfg.registry_db_path(), PathBuf::from("/var/flint/functions.redb"));

        cfg.registry.db_path = "/elsewhere/fns.redb".to_string();
        assert_eq!(cfg.registry_db_path(), PathBuf::from("/elsewhere/fns.redb"));
    }

    #[test]
    fn effective_timeout_is_clamped() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.effective_timeout_ms(None), 5_000);
        assert_eq!(cfg.effective_timeout_ms(Some(0)), 5_000);
        assert_eq!(cfg.effective_timeout_ms(Some(100)), 100);
        assert_eq!(cfg.effective_timeout_ms(Some(10_000_000)), 60_000);
    }

    #[test]
    fn env_vault_path_overrides_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[vault]
notes_path = "from-file"
"#,
        )
        .unwrap();

        // SAFETY: no other test reads or writes FLINT_VAULT_PATH.
        unsafe { env::set_var("FLINT_VAULT_PATH", "from-env") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.vault.notes_path, "from-env");
        unsafe { env::remove_var("FLINT_VAULT_PATH") };
    }
}
