//! Collecting the results of a remote batch.
//!
//! ```text
//!   initialize ──► start_batch ──┬── immediate: every result at once
//!                                └── deferred:  batch_info until num_units is known
//!   poll ──► batch_results?start=<collected> ──► append new unit results
//! ```
//!
//! Results arrive per unit; they are split into one [`RemoteOutcome`] per
//! test method so that each synthesized method can look up its own.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info};

use super::{ClientError, ClientResult, RemoteOutcome, RestClient};
use crate::models::{BatchInfo, ErrorEntry, StartBatchResponse, UnitResult};

/// Per-method outcomes of one remote batch.
pub struct ResultUpdater {
    client: RestClient,
    fullname: String,
    poll_interval: Duration,
    batch_id: Option<String>,
    batch_info: Option<BatchInfo>,
    num_results: usize,
    outcomes: HashMap<String, RemoteOutcome>,
    load_errors: Vec<ErrorEntry>,
}

impl ResultUpdater {
    /// An updater for the tests under `fullname` (empty for everything).
    pub fn new(client: RestClient, fullname: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            client,
            fullname: fullname.into(),
            poll_interval,
            batch_id: None,
            batch_info: None,
            num_results: 0,
            outcomes: HashMap::new(),
            load_errors: Vec::new(),
        }
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Batch metadata, once [`initialize`](Self::initialize) has returned.
    pub fn batch_info(&self) -> Option<&BatchInfo> {
        self.batch_info.as_ref()
    }

    /// Number of unit results collected so far.
    pub fn num_results(&self) -> usize {
        self.num_results
    }

    /// Load errors reported by the batch and by its units.
    pub fn load_errors(&self) -> &[ErrorEntry] {
        &self.load_errors
    }

    /// True once every unit result has been collected.
    pub fn is_done(&self) -> bool {
        self.batch_info
            .as_ref()
            .and_then(|info| info.num_units)
            .is_some_and(|num_units| self.num_results >= num_units)
    }

    /// Outcome of `method_fullname`, if its unit has finished.
    pub fn outcome(&self, method_fullname: &str) -> Option<&RemoteOutcome> {
        self.outcomes.get(method_fullname)
    }

    /// Starts the batch and waits until its units are known.
    ///
    /// Calling it again returns the known batch info.
    ///
    /// # Errors
    ///
    /// Returns the [`ClientError`] of the first failed request; a fullname
    /// that does not resolve gives [`ClientError::NotFound`].
    pub async fn initialize(&mut self) -> ClientResult<&BatchInfo> {
        if self.batch_info.is_none() {
            match self.client.start_batch(&self.fullname).await? {
                StartBatchResponse::Immediate {
                    batch_info,
                    results,
                } => {
                    debug!("Batch for '{}' ran immediately", self.fullname);
                    self.set_batch_info(batch_info);
                    self.absorb(results);
                }
                StartBatchResponse::Deferred { batch_id } => {
                    info!("Started batch {} for '{}'", batch_id, self.fullname);
                    self.batch_id = Some(batch_id.clone());
                    let batch_info = self.wait_for_units(&batch_id).await?;
                    self.set_batch_info(batch_info);
                }
            }
        }
        self.batch_info
            .as_ref()
            .ok_or_else(|| ClientError::NotFound(self.fullname.clone()))
    }

    async fn wait_for_units(&self, batch_id: &str) -> ClientResult<BatchInfo> {
        loop {
            let info = self.client.batch_info(batch_id).await?;
            if info.num_units.is_some() {
                return Ok(info);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn set_batch_info(&mut self, info: BatchInfo) {
        self.load_errors.extend(info.load_errors.iter().cloned());
        for ErrorEntry(module, traceback) in &info.load_errors {
            self.outcomes.insert(
                super::load_error_method_name(module),
                RemoteOutcome::Error {
                    traceback: traceback.clone(),
                },
            );
        }
        self.batch_info = Some(info);
    }

    /// Fetches the unit results finished since the last poll.
    ///
    /// Returns how many new units were collected.
    pub async fn poll(&mut self) -> ClientResult<usize> {
        if self.is_done() {
            return Ok(0);
        }
        let Some(batch_id) = self.batch_id.clone() else {
            return Ok(0);
        };
        let results = self.client.batch_results(&batch_id, self.num_results).await?;
        let added = results.len();
        self.absorb(results);
        Ok(added)
    }

    /// Polls until the outcome of `method_fullname` is known.
    ///
    /// A method the batch never reports on once it is done counts as an
    /// error.
    pub async fn wait_for(&mut self, method_fullname: &str) -> ClientResult<RemoteOutcome> {
        self.initialize().await?;
        loop {
            if let Some(outcome) = self.outcomes.get(method_fullname) {
                return Ok(outcome.clone());
            }
            if self.is_done() || self.batch_id.is_none() {
                return Ok(RemoteOutcome::Error {
                    traceback: format!("No result for '{}' was reported", method_fullname),
                });
            }
            if self.poll().await? == 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// Polls until every unit has finished, reporting progress as
    /// `(collected, total)`.
    pub async fn wait_all<F>(&mut self, mut on_progress: F) -> ClientResult<()>
    where
        F: FnMut(usize, usize),
    {
        self.initialize().await?;
        let total = self
            .batch_info
            .as_ref()
            .and_then(|info| info.num_units)
            .unwrap_or(0);
        on_progress(self.num_results, total);
        while !self.is_done() && self.batch_id.is_some() {
            if self.poll().await? == 0 {
                tokio::time::sleep(self.poll_interval).await;
            } else {
                on_progress(self.num_results, total);
            }
        }
        Ok(())
    }

    fn absorb(&mut self, results: Vec<UnitResult>) {
        for unit in results {
            self.num_results += 1;
            self.absorb_unit(unit);
        }
    }

    fn absorb_unit(&mut self, unit: UnitResult) {
        let methods = self
            .batch_info
            .as_ref()
            .and_then(|info| info.test_unit_methods.get(&unit.fullname))
            .cloned()
            .unwrap_or_default();

        // Entries not named after a listed method come from fixtures of the
        // unit (tearDownClass, tearDownModule) and error every method that
        // would otherwise pass.
        let mut fixture_errors = Vec::new();
        for ErrorEntry(name, traceback) in unit.failures {
            if methods.contains(&name) {
                self.outcomes
                    .insert(name, RemoteOutcome::Fail { traceback });
            } else {
                fixture_errors.push(format!("{}: {}", name, traceback));
            }
        }
        // An error outranks a failure of the same method.
        for ErrorEntry(name, traceback) in unit.errors {
            if methods.contains(&name) {
                self.outcomes
                    .insert(name, RemoteOutcome::Error { traceback });
            } else {
                fixture_errors.push(format!("{}: {}", name, traceback));
            }
        }

        fixture_errors.extend(
            unit.load_errors
                .iter()
                .map(|entry| format!("{}: {}", entry.name(), entry.detail())),
        );
        let unit_error = fixture_errors.join("\n");
        self.load_errors.extend(unit.load_errors);

        for method in methods {
            let outcome = self
                .outcomes
                .entry(method)
                .or_insert_with(|| RemoteOutcome::Pass {
                    output: unit.output.clone(),
                });
            if outcome.is_pass() && !unit_error.is_empty() {
                *outcome = RemoteOutcome::Error {
                    traceback: unit_error.clone(),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{FakeServer, unit_json};
    use super::*;

    fn batch_info_json(num_units: Option<usize>) -> String {
        let num_units = num_units.map_or("null".to_string(), |n| n.to_string());
        format!(
            r#"{{"num_units": {}, "test_unit_methods": {{
                "pkg.test_a.Case": ["pkg.test_a.Case.test_ok", "pkg.test_a.Case.test_bad"],
                "pkg.test_b.Other": ["pkg.test_b.Other.test_err"]
            }}, "load_errors": [["pkg.test_broken", "SyntaxError"]]}}"#,
            num_units
        )
    }

    fn updater(server: &FakeServer) -> ResultUpdater {
        ResultUpdater::new(server.client(), "pkg", Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_deferred_batch_is_polled_incrementally() {
        let server = FakeServer::new();
        server.reply("POST", "start_batch/pkg", 200, r#"{"batch_id": "b1"}"#);
        server.replies(
            "GET",
            "batch_info/b1",
            vec![(200, batch_info_json(None)), (200, batch_info_json(Some(2)))],
        );
        server.replies(
            "GET",
            "batch_results/b1?start=0",
            vec![
                (200, "[]".to_string()),
                (
                    200,
                    format!(
                        "[{}]",
                        unit_json(
                            "pkg.test_a.Case",
                            &[],
                            &[("pkg.test_a.Case.test_bad", "assert failed")],
                            "out\n"
                        )
                    ),
                ),
            ],
        );
        server.reply(
            "GET",
            "batch_results/b1?start=1",
            200,
            &format!(
                "[{}]",
                unit_json("pkg.test_b.Other", &[("pkg.test_b.Other.test_err", "boom")], &[], "")
            ),
        );

        let mut updater = updater(&server);
        let info = updater.initialize().await.unwrap();
        assert_eq!(info.num_units, Some(2));
        assert!(!updater.is_done());

        let outcome = updater.wait_for("pkg.test_a.Case.test_ok").await.unwrap();
        assert_eq!(
            outcome,
            RemoteOutcome::Pass {
                output: "out\n".to_string()
            }
        );
        assert!(matches!(
            updater.outcome("pkg.test_a.Case.test_bad"),
            Some(RemoteOutcome::Fail { .. })
        ));
        assert_eq!(updater.num_results(), 1);

        let outcome = updater.wait_for("pkg.test_b.Other.test_err").await.unwrap();
        assert_eq!(
            outcome,
            RemoteOutcome::Error {
                traceback: "boom".to_string()
            }
        );
        assert!(updater.is_done());
        assert_eq!(server.count("GET", "batch_results/b1?start=0"), 2);
    }

    #[tokio::test]
    async fn test_immediate_batch_needs_no_polling() {
        let server = FakeServer::new();
        server.reply(
            "POST",
            "start_batch/pkg",
            200,
            &format!(
                r#"{{"batch_info": {}, "results": [{}, {}]}}"#,
                batch_info_json(Some(2)),
                unit_json("pkg.test_a.Case", &[], &[], ""),
                unit_json("pkg.test_b.Other", &[], &[], "")
            ),
        );

        let mut updater = updater(&server);
        updater.initialize().await.unwrap();
        assert!(updater.is_done());
        assert_eq!(updater.poll().await.unwrap(), 0);
        assert!(matches!(
            updater.wait_for("pkg.test_b.Other.test_err").await.unwrap(),
            RemoteOutcome::Pass { .. }
        ));
        assert_eq!(server.count("GET", "batch_info/b1"), 0);
    }

    #[tokio::test]
    async fn test_load_errors_become_error_outcomes() {
        let server = FakeServer::new();
        server.reply(
            "POST",
            "start_batch/pkg",
            200,
            &format!(
                r#"{{"batch_info": {}, "results": []}}"#,
                batch_info_json(Some(0))
            ),
        );

        let mut updater = updater(&server);
        updater.initialize().await.unwrap();
        assert_eq!(updater.load_errors().len(), 1);
        assert_eq!(
            updater.outcome("pkg.test_broken.ModuleLoadTest.testModuleLoadedSuccessfully"),
            Some(&RemoteOutcome::Error {
                traceback: "SyntaxError".to_string()
            })
        );
        let missing = updater.wait_for("pkg.test_a.Case.test_ok").await.unwrap();
        assert!(matches!(missing, RemoteOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn test_fixture_errors_error_passing_methods() {
        let server = FakeServer::new();
        server.reply(
            "POST",
            "start_batch/pkg",
            200,
            &format!(
                r#"{{"batch_info": {}, "results": [{}, {}]}}"#,
                batch_info_json(Some(2)),
                unit_json(
                    "pkg.test_a.Case",
                    &[("tearDownModule (pkg.test_a)", "db still open")],
                    &[("pkg.test_a.Case.test_bad", "assert failed")],
                    ""
                ),
                unit_json("pkg.test_b.Other", &[], &[], "")
            ),
        );

        let mut updater = updater(&server);
        updater.initialize().await.unwrap();
        assert_eq!(
            updater.outcome("pkg.test_a.Case.test_ok"),
            Some(&RemoteOutcome::Error {
                traceback: "tearDownModule (pkg.test_a): db still open".to_string()
            })
        );
        assert!(matches!(
            updater.outcome("pkg.test_a.Case.test_bad"),
            Some(RemoteOutcome::Fail { .. })
        ));
        assert!(updater.outcome("tearDownModule (pkg.test_a)").is_none());
        assert!(
            updater
                .outcome("pkg.test_b.Other.test_err")
                .is_some_and(RemoteOutcome::is_pass)
        );
    }

    #[tokio::test]
    async fn test_wait_all_reports_progress() {
        let server = FakeServer::new();
        server.reply("POST", "start_batch/pkg", 200, r#"{"batch_id": "b1"}"#);
        server.reply("GET", "batch_info/b1", 200, &batch_info_json(Some(2)));
        server.reply(
            "GET",
            "batch_results/b1?start=0",
            200,
            &format!(
                "[{}, {}]",
                unit_json("pkg.test_a.Case", &[], &[], ""),
                unit_json("pkg.test_b.Other", &[], &[], "")
            ),
        );

        let mut updater = updater(&server);
        let mut seen = Vec::new();
        updater
            .wait_all(|done, total| seen.push((done, total)))
            .await
            .unwrap();
        assert_eq!(seen, vec![(0, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn test_unknown_name_is_not_found() {
        let server = FakeServer::new();
        server.reply("POST", "start_batch/pkg", 404, r#"{"error": "no such"}"#);
        let mut updater = updater(&server);
        let err = updater.initialize().await.unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }
}
