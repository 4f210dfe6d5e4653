//! Dependency scheduler
//!
//! Groups one iteration's directives into waves — topological-sort levels
//! in which no directive depends on another — and drives each wave's
//! execution concurrently. After a full pass an observation step
//! aggregates the results: failures produce a Reflexion correction pass
//! (corrected directives for the next pass, bounded by the workflow
//! iteration ceiling), and an all-success pass that fails the consistency
//! check produces supplementary directives instead.

use crate::directive::executor::{ExecutionOutcome, Executor, LOW_CONFIDENCE};
use crate::directive::Directive;
use sdk::SharedContext;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Group directives into executable waves.
///
/// A directive joins a wave once all of its declared dependencies have
/// been placed in earlier waves. Directives whose dependencies can never
/// be satisfied (cycles, or references to ids that do not exist) are
/// force-placed into one final wave rather than deadlocking.
pub fn schedule(directives: &[Directive]) -> Vec<Vec<Directive>> {
    let mut waves: Vec<Vec<Directive>> = Vec::new();
    let mut done: HashSet<String> = HashSet::new();
    let mut remaining: Vec<Directive> = directives.to_vec();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|d| d.depends_on.iter().all(|dep| done.contains(dep)));

        if ready.is_empty() {
            // Cycle or dangling reference: force the leftovers into a
            // final wave so the pass still terminates.
            warn!(
                "Unresolvable dependencies for {} directive(s), forcing final wave",
                blocked.len()
            );
            waves.push(blocked);
            break;
        }

        for d in &ready {
            done.insert(d.id.clone());
        }
        waves.push(ready);
        remaining = blocked;
    }

    waves
}

/// Report of one full scheduling pass
#[derive(Debug, Clone)]
pub struct PassReport {
    /// Outcome per directive, in completion order
    pub outcomes: Vec<ExecutionOutcome>,

    /// Corrected directives synthesized from failures (Reflexion)
    pub corrections: Vec<Directive>,

    /// Supplementary directives synthesized for low-quality results
    pub supplements: Vec<Directive>,
}

impl PassReport {
    /// Whether every directive succeeded
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.success)
    }

    /// Whether every directive produced a non-empty, quality-scored
    /// result at or above the confidence floor
    pub fn consistent(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.success && o.verified >= LOW_CONFIDENCE)
    }

    /// Names of the capabilities that ran, in completion order
    pub fn executed_kinds(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.kind.clone()).collect()
    }
}

/// Drives wave execution for one iteration's directives
pub struct WaveRunner {
    executor: Arc<Executor>,
}

impl WaveRunner {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    /// Execute all directives in dependency order.
    ///
    /// Directives within one wave run concurrently and join before the
    /// next wave starts; a failure does not cancel siblings already
    /// started. The returned report carries any synthesized correction
    /// or supplementary directives — running them is the caller's
    /// decision and is bounded by the workflow iteration ceiling.
    pub async fn run_pass(&self, directives: &[Directive], context: SharedContext) -> PassReport {
        let waves = schedule(directives);
        let mut outcomes = Vec::with_capacity(directives.len());

        for (i, wave) in waves.iter().enumerate() {
            debug!("Executing wave {}/{} ({} directives)", i + 1, waves.len(), wave.len());
            let futures: Vec<_> = wave
                .iter()
                .map(|d| self.executor.execute(d, Arc::clone(&context)))
                .collect();
            outcomes.extend(futures::future::join_all(futures).await);
        }

        self.observe(directives, outcomes)
    }

    /// Observation step: aggregate outcomes and synthesize follow-ups.
    fn observe(&self, directives: &[Directive], outcomes: Vec<ExecutionOutcome>) -> PassReport {
        let mut corrections = Vec::new();
        let mut supplements = Vec::new();

        for outcome in &outcomes {
            let Some(original) = directives.iter().find(|d| d.id == outcome.directive_id) else {
                continue;
            };

            if !outcome.success {
                // Reflexion: only failures with a derivable correction
                // get a corrected directive for the next pass.
                let error = outcome.error.as_deref().unwrap_or_default();
                let corrected_params =
                    super::executor::correct_params(&original.params, error);
                if corrected_params != original.params {
                    let mut corrected = original.clone();
                    corrected.params = corrected_params;
                    corrected.depends_on.clear();
                    info!(
                        "Synthesized correction for directive {} ({})",
                        original.id, original.kind
                    );
                    corrections.push(corrected);
                }
            } else if outcome.verified < LOW_CONFIDENCE {
                // Consistency gap: re-issue the directive to fill it
                let mut supplement = original.clone();
                supplement.depends_on.clear();
                debug!(
                    "Low-quality result for directive {} ({}), synthesizing supplement",
                    original.id, original.kind
                );
                supplements.push(supplement);
            }
        }

        PassReport {
            outcomes,
            corrections,
            supplements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityRegistry;
    use sdk::{CapabilityDef, FnHandler, Role};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn directive(id: &str, kind: &str, deps: &[&str]) -> Directive {
        Directive {
            id: id.to_string(),
            kind: kind.to_string(),
            params: serde_json::json!({}),
            order: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_schedule_independent_single_wave() {
        let dirs = vec![
            directive("a", "x", &[]),
            directive("b", "y", &[]),
            directive("c", "z", &[]),
        ];
        let waves = schedule(&dirs);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0].len(), 3);
    }

    #[test]
    fn test_schedule_chain_sequential_waves() {
        let dirs = vec![
            directive("c", "z", &["b"]),
            directive("a", "x", &[]),
            directive("b", "y", &["a"]),
        ];
        let waves = schedule(&dirs);
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0][0].id, "a");
        assert_eq!(waves[1][0].id, "b");
        assert_eq!(waves[2][0].id, "c");
    }

    #[test]
    fn test_schedule_diamond() {
        let dirs = vec![
            directive("a", "w", &[]),
            directive("b", "x", &["a"]),
            directive("c", "y", &["a"]),
            directive("d", "z", &["b", "c"]),
        ];
        let waves = schedule(&dirs);
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[1].len(), 2);
        assert_eq!(waves[2][0].id, "d");
    }

    #[test]
    fn test_schedule_cycle_forced_final_wave() {
        let dirs = vec![
            directive("a", "x", &["b"]),
            directive("b", "y", &["a"]),
            directive("c", "z", &[]),
        ];
        let waves = schedule(&dirs);
        // c runs first; the a<->b cycle lands in a forced final wave
        assert_eq!(waves.len(), 2);
        assert_eq!(waves[0][0].id, "c");
        assert_eq!(waves[1].len(), 2);
    }

    #[test]
    fn test_schedule_dangling_reference_terminates() {
        let dirs = vec![directive("a", "x", &["ghost"])];
        let waves = schedule(&dirs);
        assert_eq!(waves.len(), 1);
        assert_eq!(waves[0][0].id, "a");
    }

    fn tracking_registry(order: Arc<Mutex<Vec<String>>>) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new();
        for name in ["restart", "health_check", "report"] {
            let order = Arc::clone(&order);
            let name_owned = name.to_string();
            registry.register(CapabilityDef::new(
                name,
                "test capability",
                Arc::new(FnHandler(move |_p, _c| {
                    order
                        .lock()
                        .expect("lock poisoned")
                        .push(name_owned.clone());
                    async { Ok(serde_json::json!({"ok": true})) }
                })),
            ));
        }
        registry
    }

    #[tokio::test]
    async fn test_run_pass_respects_dependencies() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let registry = tracking_registry(Arc::clone(&order));
        let executor = Arc::new(Executor::new(Arc::new(registry), Role::Owner));
        let runner = WaveRunner::new(executor);

        let dirs = vec![
            directive("probe", "health_check", &["boot"]),
            directive("boot", "restart", &[]),
        ];
        let ctx: SharedContext = Arc::new(Mutex::new(HashMap::new()));
        let report = runner.run_pass(&dirs, ctx).await;

        assert!(report.all_succeeded());
        assert!(report.consistent());
        let seen = order.lock().expect("lock poisoned");
        assert_eq!(*seen, vec!["restart", "health_check"]);
    }

    #[tokio::test]
    async fn test_run_pass_wave_concurrency_join() {
        // Two independent directives share a wave; both must complete
        // before the dependent third runs.
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = CapabilityRegistry::new();
        for name in ["left", "right"] {
            let counter = Arc::clone(&counter);
            registry.register(CapabilityDef::new(
                name,
                "wave member",
                Arc::new(FnHandler(move |_p, _c| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Ok(serde_json::json!({"ok": true})) }
                })),
            ));
        }
        let gate = Arc::clone(&counter);
        registry.register(CapabilityDef::new(
            "after",
            "depends on the wave",
            Arc::new(FnHandler(move |_p, _c| {
                let seen = gate.load(Ordering::SeqCst);
                async move { Ok(serde_json::json!({"wave_size_seen": seen})) }
            })),
        ));

        let executor = Arc::new(Executor::new(Arc::new(registry), Role::Owner));
        let runner = WaveRunner::new(executor);
        let dirs = vec![
            directive("l", "left", &[]),
            directive("r", "right", &[]),
            directive("x", "after", &["l", "r"]),
        ];
        let ctx: SharedContext = Arc::new(Mutex::new(HashMap::new()));
        let report = runner.run_pass(&dirs, ctx).await;

        let after = report
            .outcomes
            .iter()
            .find(|o| o.kind == "after")
            .unwrap();
        assert_eq!(after.result["wave_size_seen"], 2);
    }

    #[tokio::test]
    async fn test_failed_directive_yields_correction() {
        let mut registry = CapabilityRegistry::new();
        registry.register(CapabilityDef::new(
            "read_file",
            "Read a file",
            Arc::new(FnHandler(|_p, _c| async {
                Err(sdk::ExecError::Unknown("file not found".to_string()))
            })),
        ));
        let executor = Arc::new(Executor::new(Arc::new(registry), Role::Owner));
        let runner = WaveRunner::new(executor);

        let mut d = directive("d1", "read_file", &[]);
        d.params = serde_json::json!({"path": "logs//today/"});
        let ctx: SharedContext = Arc::new(Mutex::new(HashMap::new()));
        let report = runner.run_pass(&[d], ctx).await;

        assert!(!report.all_succeeded());
        assert_eq!(report.corrections.len(), 1);
        assert_eq!(report.corrections[0].params["path"], "logs/today");
    }

    #[tokio::test]
    async fn test_low_quality_result_yields_supplement() {
        let mut registry = CapabilityRegistry::new();
        registry.register(
            CapabilityDef::new(
                "probe",
                "Probe",
                Arc::new(FnHandler(|_p, _c| async {
                    // Empty object with a text shape expected: 1/3,
                    // below the confidence floor
                    Ok(serde_json::json!({}))
                })),
            )
            .with_expected(sdk::ExpectedShape::Text),
        );
        let executor = Arc::new(Executor::new(Arc::new(registry), Role::Owner));
        let runner = WaveRunner::new(executor);

        let ctx: SharedContext = Arc::new(Mutex::new(HashMap::new()));
        let report = runner
            .run_pass(&[directive("d1", "probe", &[])], ctx)
            .await;

        assert!(report.all_succeeded());
        assert!(!report.consistent());
        assert_eq!(report.supplements.len(), 1);
    }
}
