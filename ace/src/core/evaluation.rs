//! Unit-test report parsing and goal-completion bookkeeping.
//!
//! `tgc` (task goal completion) is 1.0 when every unit test of a task passed.
//! `sgc` (scenario goal completion) is the fraction of scenarios whose tasks
//! all reached `tgc == 1.0`. A scenario is the task id prefix before the first
//! `_`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static PASSED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Num Passed Tests\s*:\s*(\d+)").unwrap());
static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Num Total\s+Tests\s*:\s*(\d+)").unwrap());

/// Passed/total counts extracted from an evaluation report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestCounts {
    pub passed: u32,
    pub total: u32,
}

impl UnitTestCounts {
    /// Parse `Num Passed Tests : N` and `Num Total  Tests : N`. Missing fields are 0.
    pub fn parse(report: &str) -> Self {
        Self {
            passed: capture_count(&PASSED_RE, report),
            total: capture_count(&TOTAL_RE, report),
        }
    }

    /// 1.0 iff `passed == total`; a report with zero tests counts as complete.
    pub fn tgc(self) -> f64 {
        if self.passed == self.total { 1.0 } else { 0.0 }
    }
}

fn capture_count(re: &Regex, report: &str) -> u32 {
    re.captures(report)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Scenario a task belongs to.
pub fn scenario_key(task_id: &str) -> &str {
    task_id.split('_').next().unwrap_or(task_id)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioCounts {
    /// Tasks of this scenario that reached `tgc == 1.0`.
    pub passed: u32,
    /// Tasks of this scenario processed so far.
    pub attempted: u32,
}

/// Running per-scenario pass counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioTally {
    scenarios: BTreeMap<String, ScenarioCounts>,
}

impl ScenarioTally {
    pub fn record(&mut self, task_id: &str, tgc: f64) {
        let counts = self
            .scenarios
            .entry(scenario_key(task_id).to_string())
            .or_default();
        counts.attempted += 1;
        if tgc >= 1.0 {
            counts.passed += 1;
        }
    }

    pub fn get(&self, scenario: &str) -> Option<ScenarioCounts> {
        self.scenarios.get(scenario).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ScenarioCounts)> {
        self.scenarios.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Fraction of scenarios in which every attempted task passed.
    pub fn scenario_goal_completion(&self) -> f64 {
        if self.scenarios.is_empty() {
            return 0.0;
        }
        let complete = self
            .scenarios
            .values()
            .filter(|c| c.attempted > 0 && c.passed == c.attempted)
            .count();
        complete as f64 / self.scenarios.len() as f64
    }
}
