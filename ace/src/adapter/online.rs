use anyhow::Result;
use tracing::info;

use super::{Learner, Pass, PhaseReport, Roles};
use crate::core::playbook::Playbook;
use crate::core::types::{AdapterStepResult, Phase, Sample};
use crate::dedup::Deduplicator;
use crate::io::config::AdapterConfig;
use crate::io::embedding::Embedder;
use crate::io::environment::Environment;

/// Single learning pass over a (possibly unbounded) sample stream.
pub struct OnlineAdapter<'p> {
    playbook: &'p mut Playbook,
    roles: Roles,
    learner: Learner,
    processed: usize,
}

impl<'p> OnlineAdapter<'p> {
    pub fn new(playbook: &'p mut Playbook, roles: Roles, config: AdapterConfig) -> Self {
        Self {
            playbook,
            roles,
            learner: Learner::new(config, None),
            processed: 0,
        }
    }

    pub fn with_deduplicator(mut self, deduplicator: Deduplicator) -> Self {
        self.learner.dedup.deduplicator = Some(deduplicator);
        self
    }

    /// Deduplicate with `embedder` at the configured `dedup.similarity_threshold`.
    pub fn with_embedder(self, embedder: impl Embedder + 'static) -> Self {
        let deduplicator = Deduplicator::from_config(embedder, &self.learner.config.dedup);
        self.with_deduplicator(deduplicator)
    }

    /// Process every sample, then flush pending deduplication.
    pub fn run<I, E>(&mut self, samples: I, env: &E) -> Result<PhaseReport>
    where
        I: IntoIterator<Item = Sample>,
        E: Environment + ?Sized,
    {
        let mut report = PhaseReport::new(Phase::Online);
        for sample in samples {
            let result = self.step(&sample, env, &mut report)?;
            report.results.push(result);
        }
        self.finish();
        info!(
            samples = report.results.len(),
            tgc = report.task_goal_completion(),
            sgc = report.scenario_goal_completion(),
            tips = self.playbook.len(),
            "finished online run"
        );
        Ok(report)
    }

    /// Learn from one sample, tallying it into `report` without storing the result.
    ///
    /// Callers streaming an unbounded source use this plus [`Self::finish`].
    pub fn step<E: Environment + ?Sized>(
        &mut self,
        sample: &Sample,
        env: &E,
        report: &mut PhaseReport,
    ) -> Result<AdapterStepResult> {
        self.processed += 1;
        info!(index = self.processed, task_id = %sample.task_id, "online sample");
        let result = self.learner.process(
            &mut self.roles,
            self.playbook,
            env,
            sample,
            Pass {
                phase: Phase::Online,
                epoch: 1,
            },
            &mut report.tally,
        )?;
        self.learner.dedup.sample_done(self.playbook);
        Ok(result)
    }

    /// Flush any ids still waiting for deduplication.
    pub fn finish(&mut self) {
        self.learner.dedup.boundary(self.playbook);
        self.learner.dedup.flush(self.playbook);
    }

    pub fn playbook(&self) -> &Playbook {
        self.playbook
    }
}
