/// Allocation race proof
///
/// Hammers the lazy allocator from many threads at once and checks the two
/// properties it must keep under contention: one installed record per node,
/// and no speculative record left unaccounted for.
use crate::compat::{PersonalityOptions, PersonalityRegistry};
use crate::config::config::RegistryConfig;
use crate::config::types::{NodeId, Result};
use std::sync::Barrier;
use std::thread;

/// Race proof configuration
#[derive(Debug, Clone)]
pub struct RaceProofConfig {
    /// Threads racing on the same container
    pub threads: usize,

    /// Number of fresh hierarchies to race on
    pub iterations: usize,

    /// Inheriting ancestors between the root and the contested container
    pub depth: usize,

    /// Stop at the first failing iteration
    pub strict_mode: bool,
}

impl Default for RaceProofConfig {
    fn default() -> Self {
        RaceProofConfig {
            threads: 8,
            iterations: 100,
            depth: 4,
            strict_mode: true,
        }
    }
}

/// Race proof result
#[derive(Debug, Clone)]
pub struct RaceProofResult {
    /// Iterations requested
    pub iterations: usize,

    /// Iterations that kept every invariant
    pub successes: usize,

    /// Iterations that broke at least one
    pub failures: usize,

    /// More than one record installed for a node
    pub race_conditions: Vec<String>,

    /// Accounting that does not add up
    pub accounting_violations: Vec<String>,

    /// Operations that returned an error
    pub errors: Vec<String>,
}

impl RaceProofResult {
    pub fn new(iterations: usize) -> Self {
        RaceProofResult {
            iterations,
            successes: 0,
            failures: 0,
            race_conditions: Vec::new(),
            accounting_violations: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_pass(&self) -> bool {
        self.failures == 0
            && self.race_conditions.is_empty()
            && self.accounting_violations.is_empty()
            && self.errors.is_empty()
    }
}

/// Check a quiescent registry's record bookkeeping
pub fn verify_accounting(registry: &PersonalityRegistry) -> Result<Vec<String>> {
    let mut violations = Vec::new();
    let metrics = registry.metrics();

    let unaccounted = metrics.unaccounted_records();
    if unaccounted != 0 {
        violations.push(format!("{} allocated records never installed or discarded", unaccounted));
    }

    let mut owned = 0usize;
    for id in registry.arena().ids() {
        if !id.is_root() && registry.owns_record(id)? {
            owned += 1;
        }
    }
    if owned != registry.live_records() {
        violations.push(format!(
            "{} owned slots but {} live records",
            owned,
            registry.live_records()
        ));
    }
    if metrics.live_records() != owned as u64 {
        violations.push(format!(
            "{} owned slots but {} installed minus freed",
            owned,
            metrics.live_records()
        ));
    }

    Ok(violations)
}

fn jitter() {
    for _ in 0..fastrand::usize(0..256) {
        std::hint::spin_loop();
    }
    if fastrand::bool() {
        thread::yield_now();
    }
}

/// Race `threads` setters on one deep container per iteration
pub fn run_allocation_race(config: &RaceProofConfig) -> Result<RaceProofResult> {
    let mut result = RaceProofResult::new(config.iterations);

    log::info!(
        "Starting allocation race proof: {} iterations, {} threads, depth {}",
        config.iterations,
        config.threads,
        config.depth
    );

    for iteration in 0..config.iterations {
        if iteration % 10 == 0 {
            log::debug!(
                "Race proof iteration {}/{}",
                iteration,
                config.iterations
            );
        }

        let registry = PersonalityRegistry::new(&RegistryConfig::default())?;
        let mut parent = NodeId::ROOT;
        for level in 0..config.depth {
            parent = registry.create_node(parent, &format!("level{}", level))?;
        }
        let contested = registry.create_node(parent, "contested")?;

        let barrier = Barrier::new(config.threads);
        let outcomes: Vec<_> = thread::scope(|scope| {
            let handles: Vec<_> = (0..config.threads)
                .map(|n| {
                    let registry = &registry;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        jitter();
                        let options = PersonalityOptions::new().with_osname(format!("racer{}", n));
                        registry.set(contested, &options)
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join()).collect()
        });

        let mut ok = true;
        for outcome in outcomes {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    ok = false;
                    result.errors.push(format!("iteration {}: {}", iteration, e));
                }
                Err(_) => {
                    ok = false;
                    result.errors.push(format!("iteration {}: racer panicked", iteration));
                }
            }
        }

        let installed = registry.metrics().records_installed.get();
        if installed != 1 {
            ok = false;
            result.race_conditions.push(format!(
                "iteration {}: {} records installed for {}",
                iteration, installed, contested
            ));
        }

        let violations = verify_accounting(&registry)?;
        if !violations.is_empty() {
            ok = false;
            result.accounting_violations.extend(
                violations
                    .into_iter()
                    .map(|v| format!("iteration {}: {}", iteration, v)),
            );
        }

        if ok {
            result.successes += 1;
        } else {
            result.failures += 1;
            if config.strict_mode {
                log::warn!("Race proof failed at iteration {}", iteration);
                break;
            }
        }
    }

    log::info!(
        "Race proof suite complete: {}/{} successes",
        result.successes,
        result.iterations
    );

    Ok(result)
}
