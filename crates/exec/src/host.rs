//! Per-evaluation VM threads.
//!
//! Every evaluation gets a fresh JavaScript runtime on a fresh OS thread: no
//! guest state survives a call and a runaway program never occupies a
//! runtime worker.  The caller waits on a oneshot channel and may flip the
//! cancel flag at any time; the engine's interrupt handler polls it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use flint_config::ExecConfig;

use crate::capability::Capabilities;
use crate::engine::{Engine, Limits, RunOutput, VmError};

/// One compiled program ready to run.
pub struct VmJob {
    pub source: Arc<str>,
    pub caps: Capabilities,
    pub limits: Limits,
    pub cancel: Arc<AtomicBool>,
    pub deadline: Instant,
}

#[derive(Debug, Clone)]
pub struct VmHost {
    stack_bytes: usize,
}

impl VmHost {
    pub fn new(stack_bytes: usize) -> Self {
        Self { stack_bytes }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(config.worker_stack_bytes)
    }

    /// Start `job` on its own thread.  The receiver yields the run's output;
    /// it reports a closed channel if the thread dies without one.
    pub fn spawn(&self, job: VmJob) -> Result<oneshot::Receiver<RunOutput>, VmError> {
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("flint-vm".into())
            .stack_size(self.stack_bytes)
            .spawn(move || {
                let started = Instant::now();
                let VmJob {
                    source,
                    caps,
                    limits,
                    cancel,
                    deadline,
                } = job;
                let run = catch_unwind(AssertUnwindSafe(|| {
                    Engine::new(limits, caps, cancel)
                        .with_deadline(deadline)
                        .run(&source)
                }));
                let output = match run {
                    Ok(output) => output,
                    Err(_) => {
                        warn!("VM thread panicked");
                        RunOutput {
                            result: Err(VmError::Worker("engine panicked".into())),
                            logs: Vec::new(),
                            operations: 0,
                        }
                    }
                };
                debug!(
                    operations = output.operations,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "VM thread finished"
                );
                // The caller may have given up already.
                let _ = tx.send(output);
            })
            .map_err(|err| VmError::Worker(format!("cannot start VM thread: {err}")))?;
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flint_notes::MemoryNoteStore;
    use flint_script::compile_program;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn job(src: &str, cancel: Arc<AtomicBool>, deadline: Instant) -> VmJob {
        let compiled = compile_program(src).unwrap();
        VmJob {
            source: compiled.compiled_text.into(),
            caps: Capabilities::new(Arc::new(MemoryNoteStore::new()), tokio::runtime::Handle::current()),
            limits: Limits::default(),
            cancel,
            deadline,
        }
    }

    #[tokio::test]
    async fn runs_a_program_off_the_runtime() {
        let host = VmHost::from_config(&ExecConfig::default());
        let deadline = Instant::now() + Duration::from_secs(5);
        let rx = host
            .spawn(job("const xs = [1, 2, 3];\nreturn xs.map((x) => x * 2);", Arc::default(), deadline))
            .unwrap();
        let output = rx.await.unwrap();
        assert_eq!(output.result, Ok(Some(serde_json::json!([2, 4, 6]))));
    }

    #[tokio::test]
    async fn cancel_flag_stops_a_spinning_program() {
        let host = VmHost::new(4 * 1024 * 1024);
        let cancel = Arc::new(AtomicBool::new(false));
        let deadline = Instant::now() + Duration::from_secs(60);
        let rx = host
            .spawn(job("let i = 0;\nwhile (true) { i = (i + 1) % 7; }", Arc::clone(&cancel), deadline))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.store(true, Ordering::Relaxed);
        let output = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        assert!(matches!(
            output.result,
            Err(VmError::Cancelled) | Err(VmError::OperationBudget(_))
        ));
    }

    #[tokio::test]
    async fn deadline_frees_the_thread_of_a_runaway_program() {
        let host = VmHost::from_config(&ExecConfig::default());
        let started = Instant::now();
        let rx = host
            .spawn(job(
                "const s = \"ab\".repeat(2000);\nwhile (true) { s.split(\"\"); }",
                Arc::default(),
                started + Duration::from_millis(100),
            ))
            .unwrap();
        let output = tokio::time::timeout(Duration::from_secs(10), rx).await.unwrap().unwrap();
        assert_eq!(output.result, Err(VmError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
