use anyhow::Result;
use serde::Serialize;
use tracing::{info, info_span};

use super::{Learner, Pass, PhaseReport, Roles, process_frozen};
use crate::core::playbook::Playbook;
use crate::core::types::{Phase, Sample};
use crate::dedup::Deduplicator;
use crate::io::config::AdapterConfig;
use crate::io::embedding::Embedder;
use crate::io::environment::Environment;

/// Results of an offline run: every training epoch, then the frozen test pass.
#[derive(Debug, Clone, Serialize)]
pub struct OfflineRun {
    /// One report per epoch.
    pub train: Vec<PhaseReport>,
    pub test: PhaseReport,
}

/// Multi-epoch training over a fixed sample set, followed by evaluation.
pub struct OfflineAdapter<'p> {
    playbook: &'p mut Playbook,
    roles: Roles,
    learner: Learner,
}

impl<'p> OfflineAdapter<'p> {
    pub fn new(playbook: &'p mut Playbook, roles: Roles, config: AdapterConfig) -> Self {
        Self {
            playbook,
            roles,
            learner: Learner::new(config, None),
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

    /// Train for `epochs` passes over `train`, then evaluate `test` with the
    /// playbook frozen.
    ///
    /// Fails if a reflector or curator call exhausts its retries.
    pub fn run<E: Environment + ?Sized>(
        &mut self,
        train: &[Sample],
        test: &[Sample],
        env: &E,
    ) -> Result<OfflineRun> {
        let epochs = self.learner.config.epochs;
        let mut train_reports = Vec::with_capacity(epochs as usize);

        for epoch in 1..=epochs {
            let _span = info_span!("epoch", epoch, epochs).entered();
            info!(samples = train.len(), "starting training epoch");
            let mut report = PhaseReport::new(Phase::Train);
            for (index, sample) in train.iter().enumerate() {
                info!(index = index + 1, total = train.len(), task_id = %sample.task_id, "training sample");
                let result = self.learner.process(
                    &mut self.roles,
                    self.playbook,
                    env,
                    sample,
                    Pass {
                        phase: Phase::Train,
                        epoch,
                    },
                    &mut report.tally,
                )?;
                report.results.push(result);
                self.learner.dedup.sample_done(self.playbook);
            }
            self.learner.dedup.boundary(self.playbook);
            info!(
                tgc = report.task_goal_completion(),
                sgc = report.scenario_goal_completion(),
                tips = self.playbook.len(),
                "finished training epoch"
            );
            train_reports.push(report);
        }
        self.learner.dedup.flush(self.playbook);

        let _span = info_span!("test").entered();
        info!(samples = test.len(), "starting evaluation");
        let mut test_report = PhaseReport::new(Phase::Test);
        for (index, sample) in test.iter().enumerate() {
            info!(index = index + 1, total = test.len(), task_id = %sample.task_id, "test sample");
            let result = process_frozen(
                &mut self.roles.generator,
                env,
                self.playbook,
                sample,
                &self.learner.config,
                Phase::Test,
                &mut test_report.tally,
            );
            test_report.results.push(result);
        }
        info!(
            tgc = test_report.task_goal_completion(),
            sgc = test_report.scenario_goal_completion(),
            "finished evaluation"
        );

        Ok(OfflineRun {
            train: train_reports,
            test: test_report,
        })
    }
}
