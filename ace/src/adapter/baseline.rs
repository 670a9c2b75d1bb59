use tracing::info;

use super::{PhaseReport, process_frozen};
use crate::core::playbook::Playbook;
use crate::core::types::{Phase, Sample};
use crate::io::config::AdapterConfig;
use crate::io::environment::Environment;
use crate::roles::Generator;

/// Generator-only evaluation against a read-only playbook.
pub struct BaselineAdapter<'p> {
    playbook: &'p Playbook,
    generator: Generator,
    config: AdapterConfig,
}

impl<'p> BaselineAdapter<'p> {
    pub fn new(playbook: &'p Playbook, generator: Generator, config: AdapterConfig) -> Self {
        Self {
            playbook,
            generator,
            config,
        }
    }

    pub fn run<E: Environment + ?Sized>(&mut self, samples: &[Sample], env: &E) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::Baseline);
        for (index, sample) in samples.iter().enumerate() {
            info!(index = index + 1, total = samples.len(), task_id = %sample.task_id, "baseline sample");
            let result = process_frozen(
                &mut self.generator,
                env,
                self.playbook,
                sample,
                &self.config,
                Phase::Baseline,
                &mut report.tally,
            );
            report.results.push(result);
        }
        info!(
            tgc = report.task_goal_completion(),
            sgc = report.scenario_goal_completion(),
            "finished baseline run"
        );
        report
    }
}
