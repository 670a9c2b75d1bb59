//! Adaptation loops driving the roles against an [`Environment`].
//!
//! Every variant processes a sample the same way: a bounded
//! generate/execute/check loop, then evaluation, tallying, and task close.
//! Learning variants ([`OfflineAdapter`] training, [`OnlineAdapter`]) follow
//! up with reflection, curation, and delta application on a `&mut Playbook`.
//! Frozen passes ([`BaselineAdapter`], offline testing) only borrow the
//! playbook.

mod baseline;
mod offline;
mod online;

use std::collections::VecDeque;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::evaluation::{ScenarioTally, UnitTestCounts};
use crate::core::parse::extract_code;
use crate::core::playbook::Playbook;
use crate::core::trajectory::{ExecutionStatus, Step, Trajectory};
use crate::core::types::{
    AdapterStepResult, CuratorOutput, EnvironmentResult, GeneratorOutput, Phase, ReflectorOutput,
    Sample, TaskMetrics,
};
use crate::dedup::Deduplicator;
use crate::io::config::{AdapterConfig, RoleConfig};
use crate::io::environment::{EVALUATION_FAILED, Environment, evaluate_with_retry};
use crate::io::llm::LlmClient;
use crate::io::prompt::{CuratorPrompt, GeneratorPrompt, ReflectorPrompt};
use crate::roles::{Curator, Generator, Reflector, Role};

pub use baseline::BaselineAdapter;
pub use offline::{OfflineAdapter, OfflineRun};
pub use online::OnlineAdapter;

/// The three roles used by learning adapters.
pub struct Roles {
    pub generator: Generator,
    pub reflector: Reflector,
    pub curator: Curator,
}

impl Roles {
    /// All three roles over clones of one client, with retries from `config`.
    pub fn with_client<L: LlmClient + Clone + 'static>(llm: L, config: &RoleConfig) -> Self {
        Self {
            generator: Generator::new(llm.clone()).with_max_retries(config.max_retries),
            reflector: Reflector::new(llm.clone()).with_max_retries(config.max_retries),
            curator: Curator::new(llm).with_max_retries(config.max_retries),
        }
    }
}

/// Step results and scenario tally of one pass over samples.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub results: Vec<AdapterStepResult>,
    pub tally: ScenarioTally,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            results: Vec::new(),
            tally: ScenarioTally::default(),
        }
    }

    /// Mean `tgc` over processed tasks (0.0 when empty).
    pub fn task_goal_completion(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let total: f64 = self.results.iter().map(AdapterStepResult::tgc).sum();
        total / self.results.len() as f64
    }

    pub fn scenario_goal_completion(&self) -> f64 {
        self.tally.scenario_goal_completion()
    }
}

/// Which pass (and epoch within it) a learning step belongs to.
#[derive(Debug, Clone, Copy)]
struct Pass {
    phase: Phase,
    epoch: u32,
}

/// Interaction loop output for one sample.
struct TaskOutcome {
    trajectory: Trajectory,
    generator_output: Option<GeneratorOutput>,
    environment_result: EnvironmentResult,
}

/// Run one sample through the interaction loop and post-loop evaluation.
///
/// Never fails: generation, execution, or check errors end the loop as
/// [`ExecutionStatus::Crashed`], and evaluation falls back to a sentinel report.
#[instrument(skip_all, fields(task_id = %sample.task_id))]
fn run_task<E: Environment + ?Sized>(
    generator: &mut Generator,
    env: &E,
    playbook: &Playbook,
    sample: &Sample,
    config: &AdapterConfig,
    tally: &mut ScenarioTally,
) -> TaskOutcome {
    let task_id = sample.task_id.as_str();
    generator.set_task_context(task_id, None);
    let mut trajectory = Trajectory::new(sample.question.clone());
    let mut final_output = None;

    let status = match env.initialize_task(task_id, &config.experiment_name) {
        Ok(()) => interact(
            generator,
            env,
            playbook,
            sample,
            config,
            &mut trajectory,
            &mut final_output,
        ),
        Err(err) => {
            error!(error = %format!("{err:#}"), "initialize_task failed");
            ExecutionStatus::Crashed
        }
    };
    trajectory.finish(status);
    info!(status = status.as_str(), steps = trajectory.len(), "interaction finished");

    let report = evaluate_with_retry(env, task_id);
    let counts = UnitTestCounts::parse(&report);
    // The sentinel parses as 0/0; an unevaluated task must not score as complete.
    let tgc = if report == EVALUATION_FAILED {
        0.0
    } else {
        counts.tgc()
    };
    tally.record(task_id, tgc);
    info!(passed = counts.passed, total = counts.total, tgc, "task evaluated");

    if let Err(err) = env.close_task(task_id) {
        warn!(error = %format!("{err:#}"), "close_task failed");
    }

    let environment_result = EnvironmentResult {
        feedback: format!(
            "Task completed in {} steps. Status: {}",
            trajectory.len(),
            status
        ),
        ground_truth: sample.ground_truth.clone(),
        unit_test_report: report,
        metrics: TaskMetrics {
            execution_status: status,
            num_steps: trajectory.len(),
            tgc,
            unit_tests_passed: counts.passed,
            unit_tests_total: counts.total,
        },
    };
    TaskOutcome {
        trajectory,
        generator_output: final_output,
        environment_result,
    }
}

fn interact<E: Environment + ?Sized>(
    generator: &mut Generator,
    env: &E,
    playbook: &Playbook,
    sample: &Sample,
    config: &AdapterConfig,
    trajectory: &mut Trajectory,
    final_output: &mut Option<GeneratorOutput>,
) -> ExecutionStatus {
    let task_id = sample.task_id.as_str();
    let playbook_text = playbook.as_prompt();
    let max_steps = config.max_interaction_steps;

    for step in 1..=max_steps {
        debug!(step, max_steps, "generating");
        generator.set_task_context(task_id, Some(step));
        let history = trajectory.format_for_generator();
        let output = match generator.generate(&GeneratorPrompt {
            task: &sample.question,
            playbook: &playbook_text,
            metadata: &sample.metadata,
            history: &history,
        }) {
            Ok(output) => output,
            Err(err) => {
                error!(step, error = %err, "generator failed");
                return ExecutionStatus::Crashed;
            }
        };

        let code = extract_code(&output.final_answer);
        debug!(step, "executing");
        let execution = match env.execute_code(task_id, &code) {
            Ok(execution) => execution,
            Err(err) => {
                error!(step, error = %format!("{err:#}"), "execute_code failed");
                return ExecutionStatus::Crashed;
            }
        };
        trajectory.add_step(Step {
            reasoning: output.reasoning.clone(),
            bullet_ids: output.bullet_ids.clone(),
            code,
            observation: format!("Output: {}\n", execution.output),
        });

        debug!(step, "checking completion");
        match env.is_task_completed(task_id) {
            Ok(true) => {
                info!(step, "environment reported completion");
                *final_output = Some(output);
                return ExecutionStatus::Completed;
            }
            Ok(false) => *final_output = Some(output),
            Err(err) => {
                error!(step, error = %format!("{err:#}"), "is_task_completed failed");
                return ExecutionStatus::Crashed;
            }
        }
    }
    ExecutionStatus::MaxStepsReached
}

/// Process a sample without touching the playbook.
fn process_frozen<E: Environment + ?Sized>(
    generator: &mut Generator,
    env: &E,
    playbook: &Playbook,
    sample: &Sample,
    config: &AdapterConfig,
    phase: Phase,
    tally: &mut ScenarioTally,
) -> AdapterStepResult {
    let outcome = run_task(generator, env, playbook, sample, config, tally);
    AdapterStepResult {
        sample: sample.clone(),
        phase,
        epoch: 0,
        generator_output: outcome.generator_output,
        environment_result: outcome.environment_result,
        reflection: ReflectorOutput::empty(),
        curator_output: CuratorOutput::empty(),
        trajectory: outcome.trajectory,
        playbook_snapshot: playbook.as_prompt(),
    }
}

/// Reflection window and pending dedup ids shared by learning adapters.
struct Learner {
    config: AdapterConfig,
    recent_reflections: VecDeque<String>,
    dedup: DedupSchedule,
}

impl Learner {
    fn new(config: AdapterConfig, deduplicator: Option<Deduplicator>) -> Self {
        let frequency = config.dedup.frequency;
        Self {
            config,
            recent_reflections: VecDeque::new(),
            dedup: DedupSchedule::new(frequency, deduplicator),
        }
    }

    /// Run one sample, then reflect, curate, and apply the delta.
    ///
    /// Reflector or curator failure aborts with an error naming the task.
    fn process<E: Environment + ?Sized>(
        &mut self,
        roles: &mut Roles,
        playbook: &mut Playbook,
        env: &E,
        sample: &Sample,
        pass: Pass,
        tally: &mut ScenarioTally,
    ) -> Result<AdapterStepResult> {
        let outcome = run_task(
            &mut roles.generator,
            env,
            playbook,
            sample,
            &self.config,
            tally,
        );
        let task_id = sample.task_id.as_str();
        roles.reflector.set_task_context(task_id, None);
        roles.curator.set_task_context(task_id, None);

        let reflection = roles
            .reflector
            .reflect(
                &ReflectorPrompt {
                    trajectory: &outcome.trajectory.format_for_reflector(),
                    playbook: &playbook.as_prompt(),
                    ground_truth: sample.ground_truth.as_deref(),
                    unit_tests: Some(&outcome.environment_result.unit_test_report),
                },
                self.config.max_refinement_rounds,
            )
            .with_context(|| format!("reflect on task {task_id}"))?;

        for tag in &reflection.bullet_tags {
            if !playbook.record_feedback(&tag.id, &tag.tag) {
                debug!(tip_id = %tag.id, tag = %tag.tag, "ignored bullet tag");
            }
        }
        self.remember(&reflection);

        let guidebook = self
            .recent_reflections
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n---\n");
        let curator_output = roles
            .curator
            .curate(&CuratorPrompt {
                question_context: &sample.question_context(),
                playbook: &playbook.as_prompt(),
                reflections: &guidebook,
            })
            .with_context(|| format!("curate after task {task_id}"))?;

        let report = playbook.apply_delta(&curator_output.delta);
        info!(
            task_id,
            applied = report.applied().count(),
            skipped = report.skipped().count(),
            tips = playbook.len(),
            "applied curator delta"
        );
        self.dedup.record(report.added_ids());
        let playbook_snapshot = playbook.as_prompt();
        debug!(playbook = %playbook_snapshot, "updated playbook");

        Ok(AdapterStepResult {
            sample: sample.clone(),
            phase: pass.phase,
            epoch: pass.epoch,
            generator_output: outcome.generator_output,
            environment_result: outcome.environment_result,
            reflection,
            curator_output,
            trajectory: outcome.trajectory,
            playbook_snapshot,
        })
    }

    fn remember(&mut self, reflection: &ReflectorOutput) {
        let entry = serde_json::to_string(&reflection.raw).unwrap_or_default();
        self.recent_reflections.push_back(entry);
        while self.recent_reflections.len() > self.config.reflection_window {
            self.recent_reflections.pop_front();
        }
    }
}

/// Buffers ids of curated tips and deduplicates them on schedule.
struct DedupSchedule {
    frequency: u32,
    deduplicator: Option<Deduplicator>,
    pending: Vec<String>,
    samples_seen: u64,
}

impl DedupSchedule {
    fn new(frequency: u32, deduplicator: Option<Deduplicator>) -> Self {
        Self {
            frequency,
            deduplicator,
            pending: Vec::new(),
            samples_seen: 0,
        }
    }

    fn record(&mut self, ids: Vec<String>) {
        self.pending.extend(ids);
    }

    /// Count a finished sample; flush when the frequency is reached.
    fn sample_done(&mut self, playbook: &mut Playbook) {
        self.samples_seen += 1;
        if self.frequency > 0 && self.samples_seen % u64::from(self.frequency) == 0 {
            self.flush(playbook);
        }
    }

    /// Flush at an epoch or run boundary when no frequency is configured.
    fn boundary(&mut self, playbook: &mut Playbook) {
        if self.frequency == 0 {
            self.flush(playbook);
        }
    }

    fn flush(&mut self, playbook: &mut Playbook) {
        let pending = std::mem::take(&mut self.pending);
        let Some(deduplicator) = self.deduplicator.as_ref() else {
            return;
        };
        if pending.is_empty() {
            return;
        }
        let removed = playbook.deduplicate(deduplicator, &pending);
        info!(
            candidates = pending.len(),
            removed = removed.len(),
            tips = playbook.len(),
            "deduplicated playbook"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::evaluation::ScenarioCounts;
    use crate::test_support::{
        ScriptedEnvironment, ScriptedLlm, generator_response, sample, unit_test_report,
    };

    fn config(max_steps: u32) -> AdapterConfig {
        AdapterConfig {
            max_interaction_steps: max_steps,
            ..AdapterConfig::default()
        }
    }

    fn scripted_generator(steps: usize) -> (Generator, ScriptedLlm) {
        let llm = ScriptedLlm::new(
            (1..=steps).map(|n| generator_response("next step", &[], &format!("print({n})"))),
        );
        (Generator::new(llm.clone()), llm)
    }

    #[test]
    fn completes_on_third_check() {
        let (mut generator, _llm) = scripted_generator(5);
        let env = ScriptedEnvironment::new().completing_after(3);
        let mut tally = ScenarioTally::default();

        let outcome = run_task(
            &mut generator,
            &env,
            &Playbook::new(),
            &sample("abc_1", "q"),
            &config(5),
            &mut tally,
        );

        assert_eq!(outcome.trajectory.len(), 3);
        assert_eq!(outcome.trajectory.execution_status, Some(ExecutionStatus::Completed));
        assert_eq!(outcome.trajectory.steps[2].code, "print(3)");
        assert_eq!(outcome.trajectory.steps[0].observation, "Output: ran 1\n");
        assert_eq!(
            outcome.environment_result.feedback,
            "Task completed in 3 steps. Status: completed"
        );
        assert!(outcome.generator_output.is_some());
        assert!(env.closed("abc_1"));
    }

    #[test]
    fn execution_error_crashes_but_still_evaluates() {
        let (mut generator, _llm) = scripted_generator(2);
        let env = ScriptedEnvironment::new()
            .failing_execution()
            .with_report("abc_1", unit_test_report(0, 2));
        let mut tally = ScenarioTally::default();

        let outcome = run_task(
            &mut generator,
            &env,
            &Playbook::new(),
            &sample("abc_1", "q"),
            &config(5),
            &mut tally,
        );

        assert!(outcome.trajectory.is_empty());
        assert_eq!(outcome.environment_result.metrics.execution_status, ExecutionStatus::Crashed);
        assert_eq!(outcome.environment_result.metrics.tgc, 0.0);
        assert!(outcome.generator_output.is_none());
        assert_eq!(env.evaluations("abc_1"), 1);
        assert!(env.closed("abc_1"));
    }

    #[test]
    fn initialize_failure_skips_interaction() {
        let (mut generator, llm) = scripted_generator(1);
        let env = ScriptedEnvironment::new().failing_initialize();
        let mut tally = ScenarioTally::default();

        let outcome = run_task(
            &mut generator,
            &env,
            &Playbook::new(),
            &sample("abc_1", "q"),
            &config(3),
            &mut tally,
        );

        assert_eq!(outcome.environment_result.metrics.execution_status, ExecutionStatus::Crashed);
        assert_eq!(outcome.environment_result.metrics.num_steps, 0);
        assert_eq!(llm.calls(), 0);
        assert!(env.closed("abc_1"));
    }

    #[test]
    fn evaluation_retries_then_uses_sentinel() {
        let (mut generator, _llm) = scripted_generator(1);
        let env = ScriptedEnvironment::new()
            .completing_after(1)
            .failing_evaluations(3)
            .failing_close();
        let mut tally = ScenarioTally::default();

        let outcome = run_task(
            &mut generator,
            &env,
            &Playbook::new(),
            &sample("abc_1", "q"),
            &config(3),
            &mut tally,
        );

        assert_eq!(
            outcome.environment_result.unit_test_report,
            "Evaluation failed after 3 attempts."
        );
        assert_eq!(env.evaluations("abc_1"), 3);
        assert_eq!(outcome.environment_result.metrics.tgc, 0.0);
        assert_eq!(
            tally.get("abc"),
            Some(ScenarioCounts {
                passed: 0,
                attempted: 1
            })
        );
    }

    #[test]
    fn dedup_schedule_flushes_every_n_samples() {
        let mut playbook = Playbook::new();
        playbook.add_tip("api", "always paginate results", None, &[]);
        let mut schedule = DedupSchedule::new(2, Some(Deduplicator::substring_only()));

        let dup = playbook.add_tip("api", "Always paginate", None, &[]);
        schedule.record(vec![dup.clone()]);
        schedule.sample_done(&mut playbook);
        assert!(playbook.get_tip(&dup).is_some());

        schedule.sample_done(&mut playbook);
        assert!(playbook.get_tip(&dup).is_none());
        assert!(schedule.pending.is_empty());
    }

    #[test]
    fn dedup_schedule_with_zero_frequency_waits_for_boundary() {
        let mut playbook = Playbook::new();
        playbook.add_tip("api", "always paginate results", None, &[]);
        let mut schedule = DedupSchedule::new(0, Some(Deduplicator::substring_only()));

        let dup = playbook.add_tip("api", "Always paginate", None, &[]);
        schedule.record(vec![dup.clone()]);
        for _ in 0..5 {
            schedule.sample_done(&mut playbook);
        }
        assert!(playbook.get_tip(&dup).is_some());

        schedule.boundary(&mut playbook);
        assert!(playbook.get_tip(&dup).is_none());
    }
}
