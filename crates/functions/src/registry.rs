use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use flint_script::{CompiledFunction, FunctionSignature, compile_function, namespace_type_text};
use flint_security::{ScanTarget, SecurityGate, SecurityReport};

use crate::model::{content_hash, validate_name};
use crate::{CustomFunction, FunctionStore, FunctionSummary, Namespace, Registration, RegistryError};

/// Immutable view of the registry at one point in time.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    functions: BTreeMap<String, Arc<CustomFunction>>,
    version: u64,
}

impl RegistrySnapshot {
    pub fn get(&self, name: &str) -> Option<&Arc<CustomFunction>> {
        self.functions.get(name)
    }

    /// All functions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &CustomFunction> {
        self.functions.values().map(|f| f.as_ref())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &CustomFunction> {
        self.iter().filter(|f| f.enabled)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Bumped by every successful mutation.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Registered functions of one vault.
///
/// Reads take a cheap `Arc` snapshot.  Writers are serialised, finish
/// compiling, scanning and persisting, and only then publish a new snapshot
/// and drop the cached namespace.
pub struct FunctionRegistry {
    vault: String,
    store: Arc<dyn FunctionStore>,
    gate: Arc<SecurityGate>,
    current: RwLock<Arc<RegistrySnapshot>>,
    writer: tokio::sync::Mutex<()>,
    namespace: Mutex<Option<Arc<Namespace>>>,
}

impl FunctionRegistry {
    /// Load `vault` from `store`.  Functions that no longer pass `gate`, or
    /// whose stored hash does not match their compiled text, are loaded
    /// disabled.
    pub fn open(
        vault: impl Into<String>,
        store: Arc<dyn FunctionStore>,
        gate: Arc<SecurityGate>,
    ) -> Result<Self, RegistryError> {
        let vault = vault.into();
        let mut functions = BTreeMap::new();
        for mut function in store.load(&vault)? {
            if !function.hash_matches() {
                warn!(function = %function.name, "stored function hash mismatch; loading disabled");
                function.enabled = false;
            }
            let report = scan_function(&gate, &function.source_text, &function.compiled_text);
            if !report.passed {
                warn!(
                    function = %function.name,
                    result = %report.summary(),
                    "stored function fails the current security rules; loading disabled"
                );
                function.enabled = false;
            }
            function.last_security_scan = report;
            functions.insert(function.name.clone(), Arc::new(function));
        }
        info!(vault = %vault, functions = functions.len(), "function registry opened");
        Ok(Self {
            vault,
            store,
            gate,
            current: RwLock::new(Arc::new(RegistrySnapshot {
                functions,
                version: 0,
            })),
            writer: tokio::sync::Mutex::new(()),
            namespace: Mutex::new(None),
        })
    }

    pub fn vault(&self) -> &str {
        &self.vault
    }

    pub fn gate(&self) -> &Arc<SecurityGate> {
        &self.gate
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn get(&self, name: &str) -> Option<CustomFunction> {
        self.snapshot().get(name).map(|f| f.as_ref().clone())
    }

    pub fn list(&self) -> Vec<FunctionSummary> {
        self.snapshot().iter().map(CustomFunction::summary).collect()
    }

    /// Validate, compile, scan and persist a new function.  Nothing is
    /// stored unless every step succeeds.
    pub async fn register(&self, registration: Registration) -> Result<CustomFunction, RegistryError> {
        validate_name(&registration.name)?;
        let _writer = self.writer.lock().await;
        if self.snapshot().get(&registration.name).is_some() {
            return Err(RegistryError::AlreadyExists(registration.name));
        }
        let (compiled, report) = self.validate(&registration)?;
        let now = Utc::now();
        let function = build(
            &registration,
            compiled,
            report,
            Uuid::new_v4(),
            registration.description.clone().unwrap_or_default(),
            registration.enabled,
            now,
        );
        self.store.upsert(&self.vault, &function)?;
        self.publish(|functions| {
            functions.insert(function.name.clone(), Arc::new(function.clone()));
        });
        info!(
            vault = %self.vault,
            function = %function.name,
            signature = %function.rendered_signature(),
            enabled = function.enabled,
            "registered function"
        );
        Ok(function)
    }

    /// Replace the source of an existing function.  `id`, `created_at` and
    /// the enabled flag are kept.
    pub async fn update(&self, registration: Registration) -> Result<CustomFunction, RegistryError> {
        let _writer = self.writer.lock().await;
        let existing = self
            .snapshot()
            .get(&registration.name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(registration.name.clone()))?;
        let (compiled, report) = self.validate(&registration)?;
        let description = registration
            .description
            .clone()
            .unwrap_or_else(|| existing.description.clone());
        let mut function = build(
            &registration,
            compiled,
            report,
            existing.id,
            description,
            existing.enabled,
            Utc::now(),
        );
        function.created_at = existing.created_at;
        self.store.upsert(&self.vault, &function)?;
        self.publish(|functions| {
            functions.insert(function.name.clone(), Arc::new(function.clone()));
        });
        info!(
            vault = %self.vault,
            function = %function.name,
            changed = existing.content_hash != function.content_hash,
            "updated function"
        );
        Ok(function)
    }

    /// Hard delete.  Executions already dispatched keep the namespace they
    /// captured.
    pub async fn remove(&self, name: &str) -> Result<bool, RegistryError> {
        let _writer = self.writer.lock().await;
        if self.snapshot().get(name).is_none() {
            return Ok(false);
        }
        self.store.delete(&self.vault, name)?;
        self.publish(|functions| {
            functions.remove(name);
        });
        info!(vault = %self.vault, function = %name, "removed function");
        Ok(true)
    }

    /// Enabling re-runs the security gate with the current rules and refuses
    /// a function that now fails it.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<CustomFunction, RegistryError> {
        let _writer = self.writer.lock().await;
        let existing = self
            .snapshot()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        let mut function = existing.as_ref().clone();
        if enabled {
            if !function.hash_matches() {
                return Err(RegistryError::Compile {
                    name: name.to_string(),
                    diagnostics: vec![
                        flint_script::Diagnostic::general(
                            "Compiled text does not match its recorded hash; update the function to recompile it.",
                        )
                        .with_code("integrity"),
                    ],
                });
            }
            let report = scan_function(&self.gate, &function.source_text, &function.compiled_text);
            if !report.passed {
                warn!(function = %name, result = %report.summary(), "refusing to enable function");
                return Err(RegistryError::SecurityViolation {
                    name: name.to_string(),
                    report,
                });
            }
            function.last_security_scan = report;
        }
        if existing.enabled == enabled {
            return Ok(function);
        }
        function.enabled = enabled;
        function.updated_at = Utc::now();
        self.store.upsert(&self.vault, &function)?;
        self.publish(|functions| {
            functions.insert(function.name.clone(), Arc::new(function.clone()));
        });
        info!(vault = %self.vault, function = %name, enabled, "function toggled");
        Ok(function)
    }

    /// The namespace over the enabled functions, rebuilt only when the
    /// enabled set changed since the last call.
    pub fn namespace(&self) -> Arc<Namespace> {
        let snapshot = self.snapshot();
        let key = crate::namespace::cache_key(snapshot.enabled());
        let mut cached = match self.namespace.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(ns) = cached.as_ref().filter(|ns| ns.key == key) {
            return Arc::clone(ns);
        }
        let ns = Arc::new(Namespace::synthesize(snapshot.iter()));
        debug!(
            vault = %self.vault,
            functions = ns.functions.len(),
            lines = ns.line_count,
            "namespace rebuilt"
        );
        *cached = Some(Arc::clone(&ns));
        ns
    }

    fn validate(&self, registration: &Registration) -> Result<(CompiledFunction, SecurityReport), RegistryError> {
        let name = &registration.name;
        let source_report = self.gate.scan(&registration.source, ScanTarget::Source);
        if !source_report.passed {
            warn!(function = %name, result = %source_report.summary(), "registration rejected by security scan");
            return Err(RegistryError::SecurityViolation {
                name: name.clone(),
                report: source_report,
            });
        }
        // Enabled siblings keep their signatures; the function itself is
        // visible untyped so it may recurse through the namespace.
        let snapshot = self.snapshot();
        let siblings: Vec<(&str, FunctionSignature)> = snapshot
            .enabled()
            .filter(|f| f.name != *name)
            .map(|f| (f.name.as_str(), f.signature()))
            .collect();
        let namespace = namespace_type_text(
            siblings
                .iter()
                .map(|(n, sig)| (*n, Some(sig)))
                .chain([(name.as_str(), None)]),
        );
        let compiled = compile_function(name, &registration.source, registration.schema.as_ref(), &namespace)
            .map_err(|diagnostics| {
                debug!(function = %name, errors = diagnostics.len(), "registration failed to compile");
                RegistryError::Compile {
                    name: name.clone(),
                    diagnostics,
                }
            })?;
        let compiled_report = self.gate.scan(&compiled.compiled_text, ScanTarget::Compiled);
        let report = source_report.merge(compiled_report);
        if !report.passed {
            warn!(function = %name, result = %report.summary(), "compiled text rejected by security scan");
            return Err(RegistryError::SecurityViolation {
                name: name.clone(),
                report,
            });
        }
        Ok((compiled, report))
    }

    /// Swap in a modified copy of the current snapshot and drop the cached
    /// namespace.
    fn publish(&self, mutate: impl FnOnce(&mut BTreeMap<String, Arc<CustomFunction>>)) {
        let mut current = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut functions = current.functions.clone();
        mutate(&mut functions);
        *current = Arc::new(RegistrySnapshot {
            functions,
            version: current.version + 1,
        });
        drop(current);
        match self.namespace.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

fn scan_function(gate: &SecurityGate, source: &str, compiled: &str) -> SecurityReport {
    gate.scan_all(&[(source, ScanTarget::Source), (compiled, ScanTarget::Compiled)])
}

fn build(
    registration: &Registration,
    compiled: CompiledFunction,
    report: SecurityReport,
    id: Uuid,
    description: String,
    enabled: bool,
    now: chrono::DateTime<Utc>,
) -> CustomFunction {
    CustomFunction {
        id,
        name: registration.name.clone(),
        source_text: registration.source.clone(),
        content_hash: content_hash(&compiled.compiled_text),
        compiled_text: compiled.compiled_text,
        parameter_schema: compiled.signature.params,
        return_type: compiled.signature.return_type,
        description,
        enabled,
        is_async: compiled.is_async,
        created_at: now,
        updated_at: now,
        last_security_scan: report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryFunctionStore, RedbFunctionStore};
    use flint_config::{RuleConfig, SecurityConfig};
    use flint_script::{FunctionSignature, ParamSchema};

    const FORMAT_MESSAGE: &str = r#"function formatMessage(message: string, prefix?: string): string {
  return (prefix ?? "Message") + ": " + message;
}"#;

    fn gate() -> Arc<SecurityGate> {
        Arc::new(SecurityGate::builtin().unwrap())
    }

    fn registry() -> FunctionRegistry {
        FunctionRegistry::open("main", Arc::new(MemoryFunctionStore::new()), gate()).unwrap()
    }

    fn simple(name: &str) -> Registration {
        Registration::new(name, format!("function {name}(x: number): number {{ return x + 1; }}"))
    }

    #[tokio::test]
    async fn register_compiles_and_persists() {
        let store = Arc::new(MemoryFunctionStore::new());
        let registry = FunctionRegistry::open("main", store.clone(), gate()).unwrap();
        let schema = FunctionSignature::new(
            vec![
                ParamSchema::new("message", "string"),
                ParamSchema::new("prefix", "string").optional(),
            ],
            "string",
        );
        let f = registry
            .register(
                Registration::new("formatMessage", FORMAT_MESSAGE)
                    .with_schema(schema)
                    .with_description("Prefix a message"),
            )
            .await
            .unwrap();
        assert!(f.enabled);
        assert!(f.last_security_scan.passed);
        assert_eq!(f.content_hash, content_hash(&f.compiled_text));
        assert_eq!(
            f.rendered_signature(),
            "formatMessage(message: string, prefix?: string): string"
        );
        assert_eq!(store.load("main").unwrap(), vec![f.clone()]);
        assert_eq!(registry.get("formatMessage"), Some(f));
        assert_eq!(registry.list()[0].description, "Prefix a message");
    }

    #[tokio::test]
    async fn filesystem_access_is_refused_and_never_stored() {
        let store = Arc::new(MemoryFunctionStore::new());
        let registry = FunctionRegistry::open("main", store.clone(), gate()).unwrap();
        let err = registry
            .register(Registration::new(
                "steal",
                "function steal(): string { return fs.readFileSync('/etc/passwd'); }",
            ))
            .await
            .unwrap_err();
        let RegistryError::SecurityViolation { report, .. } = &err else {
            panic!("expected a security violation, got {err:?}");
        };
        assert_eq!(report.findings[0].rule_id, "filesystem");
        assert_eq!(err.code(), "security_violation");
        assert!(registry.list().is_empty());
        assert!(store.load("main").unwrap().is_empty());
        assert!(!registry.namespace().contains("steal"));
    }

    #[tokio::test]
    async fn compile_errors_block_registration() {
        let registry = registry();
        let err = registry
            .register(Registration::new("bad", "function bad(): number { return 'x'; }"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Compile { .. }));
        assert_eq!(err.diagnostics()[0].code.as_deref(), Some("type"));
        assert!(registry.get("bad").is_none());
    }

    #[tokio::test]
    async fn sibling_calls_are_typed() {
        let registry = registry();
        let shout = "function shout(s: string): string { return customFunctions.formatMessage(s).toUpperCase(); }";
        let err = registry
            .register(Registration::new("shout", shout))
            .await
            .unwrap_err();
        assert!(
            err.diagnostics()[0]
                .message
                .starts_with("Property 'formatMessage' does not exist on type"),
            "{:?}",
            err.diagnostics()
        );

        registry
            .register(Registration::new("formatMessage", FORMAT_MESSAGE))
            .await
            .unwrap();
        registry.register(Registration::new("shout", shout)).await.unwrap();

        let err = registry
            .register(Registration::new(
                "twice",
                "function twice(n: number): string { return customFunctions.shout(n); }",
            ))
            .await
            .unwrap_err();
        assert_eq!(
            err.diagnostics()[0].message,
            "Argument of type 'number' is not assignable to parameter of type 'string'."
        );
    }

    #[tokio::test]
    async fn names_are_unique_and_checked() {
        let registry = registry();
        registry.register(simple("inc")).await.unwrap();
        assert!(matches!(
            registry.register(simple("inc")).await,
            Err(RegistryError::AlreadyExists(_))
        ));
        assert!(matches!(
            registry
                .register(Registration::new("list", "function list() { return 1; }"))
                .await,
            Err(RegistryError::ReservedName(_))
        ));
    }

    #[tokio::test]
    async fn update_keeps_identity() {
        let registry = registry();
        let first = registry.register(simple("inc").with_description("adds one")).await.unwrap();
        let updated = registry
            .update(Registration::new(
                "inc",
                "function inc(x: number): number { return x + 2; }",
            ))
            .await
            .unwrap();
        assert_eq!(updated.id, first.id);
        assert_eq!(updated.created_at, first.created_at);
        assert_eq!(updated.description, "adds one");
        assert_ne!(updated.content_hash, first.content_hash);
        assert!(updated.compiled_text.contains("x + 2"));

        let err = registry.update(simple("missing")).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
        let err = registry
            .update(Registration::new("inc", "function inc(x: number): number { return eval('x'); }"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::SecurityViolation { .. }));
        assert!(registry.get("inc").unwrap().compiled_text.contains("x + 2"));
    }

    #[tokio::test]
    async fn remove_and_toggle_invalidate_the_namespace() {
        let registry = registry();
        registry.register(simple("a")).await.unwrap();
        registry.register(simple("b")).await.unwrap();
        registry.register(simple("c").disabled()).await.unwrap();

        let ns = registry.namespace();
        assert_eq!(
            ns.functions.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(Arc::ptr_eq(&ns, &registry.namespace()));

        let version = registry.snapshot().version();
        registry.set_enabled("c", true).await.unwrap();
        assert!(registry.snapshot().version() > version);
        assert!(registry.namespace().contains("c"));

        assert!(registry.remove("a").await.unwrap());
        assert!(!registry.remove("a").await.unwrap());
        let after = registry.namespace();
        assert!(!after.contains("a"));
        // the earlier snapshot still holds what it captured
        assert!(ns.contains("a"));

        assert!(matches!(
            registry.set_enabled("nope", true).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stricter_rules_disable_stored_functions() {
        let store = Arc::new(MemoryFunctionStore::new());
        {
            let registry = FunctionRegistry::open("main", store.clone(), gate()).unwrap();
            registry
                .register(Registration::new(
                    "secret",
                    "function secret(): string { const secretNote = 'x'; return secretNote; }",
                ))
                .await
                .unwrap();
        }
        let strict = SecurityGate::from_config(&SecurityConfig {
            disabled_rules: vec![],
            extra_rules: vec![RuleConfig {
                id: "no-secrets".into(),
                pattern: r"\bsecretNote\b".into(),
                severity: "high".into(),
                message: "secret notes are off limits".into(),
            }],
        })
        .unwrap();
        let registry = FunctionRegistry::open("main", store.clone(), Arc::new(strict)).unwrap();
        let loaded = registry.get("secret").unwrap();
        assert!(!loaded.enabled);
        assert!(!loaded.last_security_scan.passed);
        assert!(registry.namespace().functions.is_empty());
        let err = registry.set_enabled("secret", true).await.unwrap_err();
        assert!(matches!(err, RegistryError::SecurityViolation { .. }));
        // the stored record is untouched
        assert!(store.load("main").unwrap()[0].enabled);
    }

    #[tokio::test]
    async fn registry_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("functions.redb");
        let id = {
            let store = Arc::new(RedbFunctionStore::open(&path).unwrap());
            let registry = FunctionRegistry::open("main", store, gate()).unwrap();
            registry.register(simple("inc")).await.unwrap().id
        };
        let store = Arc::new(RedbFunctionStore::open(&path).unwrap());
        let registry = FunctionRegistry::open("main", store, gate()).unwrap();
        let f = registry.get("inc").unwrap();
        assert_eq!(f.id, id);
        assert!(f.enabled);
        assert!(registry.namespace().contains("inc"));
    }

    #[tokio::test]
    async fn concurrent_registrations_are_serialised() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.register(simple(&format!("f{i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(registry.snapshot().len(), 8);
        assert_eq!(registry.snapshot().version(), 8);
        assert_eq!(registry.namespace().functions.len(), 8);
    }
}
