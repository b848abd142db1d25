//! SWE-bench harness semantics layered on top of [`crate::environment::Environment`]:
//! fail-to-pass / pass-to-pass test sets and the "resolved" determination
//! derived from running both against a patched checkout.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::container::ExecOutcome;
use crate::environment::{Environment, Result};

/// The test-set split a SWE-bench task instance specifies: tests that
/// must flip from failing to passing once the patch is applied, and
/// tests that must keep passing throughout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    pub fail_to_pass: Vec<String>,
    pub pass_to_pass: Vec<String>,
}

/// The full result of evaluating a task instance's patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessReport {
    pub fail_to_pass_results: Vec<(String, bool)>,
    pub pass_to_pass_results: Vec<(String, bool)>,
    pub resolved: bool,
}

/// Run `spec`'s two test sets against `env` (expected to already be in
/// `PatchApplied` state) and determine whether the instance is resolved:
/// every fail-to-pass test now passes, and every pass-to-pass test still
/// passes.
pub async fn evaluate(env: &mut Environment<'_>, spec: &TestSpec) -> Result<HarnessReport> {
    let fail_to_pass_node_ids: Vec<&str> = spec.fail_to_pass.iter().map(String::as_str).collect();
    let outcome = env.run_pytest(&fail_to_pass_node_ids).await?;
    let fail_to_pass_results = score_nodes(&spec.fail_to_pass, &outcome);

    let pass_to_pass_node_ids: Vec<&str> = spec.pass_to_pass.iter().map(String::as_str).collect();
    let outcome = env.run_pytest(&pass_to_pass_node_ids).await?;
    let pass_to_pass_results = score_nodes(&spec.pass_to_pass, &outcome);

    let resolved = fail_to_pass_results.iter().all(|(_, passed)| *passed)
        && pass_to_pass_results.iter().all(|(_, passed)| *passed);

    Ok(HarnessReport {
        fail_to_pass_results,
        pass_to_pass_results,
        resolved,
    })
}

/// Parse pytest's short summary line (`PASSED tests/foo.py::test_bar`)
/// out of the combined stdout to determine per-node-id pass/fail. A node
/// id absent from the summary entirely (e.g. a collection error) counts
/// as failed.
fn score_nodes(node_ids: &[String], outcome: &ExecOutcome) -> Vec<(String, bool)> {
    let stdout = String::from_utf8_lossy(&outcome.stdout);
    let passed: HashSet<&str> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("PASSED "))
        .map(str::trim)
        .collect();
    let failed: HashSet<&str> = stdout
        .lines()
        .filter_map(|line| line.strip_prefix("FAILED "))
        .map(str::trim)
        .collect();

    node_ids
        .iter()
        .map(|id| {
            let passed = passed.contains(id.as_str()) || (!failed.contains(id.as_str()) && outcome.exit_code == 0);
            (id.clone(), passed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_with_stdout(stdout: &str, exit_code: i32) -> ExecOutcome {
        ExecOutcome {
            exit_code,
            stdout: stdout.as_bytes().to_vec(),
            stderr: vec![],
            merged: vec![],
            stdout_truncated: false,
            stderr_truncated: false,
            merged_truncated: false,
            discarded_bytes: 0,
        }
    }

    #[test]
    fn test_score_nodes_honors_explicit_pass_fail_lines() {
        let outcome = outcome_with_stdout(
            "PASSED tests/a.py::test_one\nFAILED tests/b.py::test_two\n",
            1,
        );
        let node_ids = vec!["tests/a.py::test_one".to_string(), "tests/b.py::test_two".to_string()];
        let results = score_nodes(&node_ids, &outcome);
        assert_eq!(results[0], ("tests/a.py::test_one".to_string(), true));
        assert_eq!(results[1], ("tests/b.py::test_two".to_string(), false));
    }

    #[test]
    fn test_score_nodes_defaults_to_exit_code_when_unlisted() {
        let outcome = outcome_with_stdout("no per-test lines here\n", 0);
        let node_ids = vec!["tests/a.py::test_one".to_string()];
        let results = score_nodes(&node_ids, &outcome);
        assert_eq!(results[0], ("tests/a.py::test_one".to_string(), true));
    }

    #[test]
    fn test_resolved_requires_both_sets_to_pass() {
        let report = HarnessReport {
            fail_to_pass_results: vec![("t1".to_string(), true)],
            pass_to_pass_results: vec![("t2".to_string(), false)],
            resolved: false,
        };
        assert!(!report.resolved);
        assert!(!report.pass_to_pass_results[0].1);
    }
}
