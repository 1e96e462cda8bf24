//! Local execution of test units.
//!
//! The [`LocalExecutor`] runs a [`TestSuite`] in the calling thread and
//! turns every outcome into data:
//!
//! | Test body ends with | Recorded as |
//! |---------------------|-------------|
//! | `Ok(())` | pass |
//! | `Err(Failure::Assertion)` | failure |
//! | `Err(Failure::Error)` | error |
//! | panic from `assert!`/`assert_eq!` | failure |
//! | any other panic | error |
//!
//! Module and class fixtures wrap their scope. When a setup hook fails,
//! every method in its scope is recorded as an error carrying the hook's
//! message, so callers that look results up per method still see them.
//!
//! Output is captured through the [`TestContext`] handed to every body and
//! hook; the context belongs to one run, so nothing leaks between units.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::debug;

use crate::catalog::{Failure, TestContext, TestFn, TestOutcome};
use crate::discovery::{Discovery, ModuleSuite, SuiteMethod, TestObject, TestSuite};
use crate::models::{ErrorEntry, UnitResult};

/// Result type for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Errors for inputs the executor cannot run.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The object is a bad test and has nothing to run.
    #[error("'{0}' is not a runnable test object")]
    NotRunnable(String),
}

/// Result of running one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResult {
    pub fullname: String,
    pub errors: Vec<ErrorEntry>,
    pub failures: Vec<ErrorEntry>,
    pub tests_run: usize,
    pub output: String,
}

impl TestResult {
    pub fn new(fullname: impl Into<String>) -> Self {
        Self {
            fullname: fullname.into(),
            ..Default::default()
        }
    }

    /// True when nothing errored or failed.
    pub fn passed(&self) -> bool {
        self.errors.is_empty() && self.failures.is_empty()
    }

    /// Converts to the stored wire shape, attaching `load_errors`.
    pub fn into_unit_result(self, load_errors: Vec<ErrorEntry>) -> UnitResult {
        UnitResult {
            fullname: self.fullname,
            errors: self.errors,
            failures: self.failures,
            output: self.output,
            load_errors,
        }
    }

    fn record(&mut self, name: &str, outcome: TestOutcome) {
        match outcome {
            Ok(()) => {}
            Err(Failure::Assertion(message)) => {
                self.failures.push(ErrorEntry::new(name, message));
            }
            Err(Failure::Error(message)) => {
                self.errors.push(ErrorEntry::new(name, message));
            }
        }
    }
}

/// Runs units in the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Runs `unit`, appending load errors met while building its suite.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::NotRunnable`] for bad tests.
    pub fn run(
        &self,
        discovery: &Discovery,
        unit: &TestObject,
        errors: &mut Vec<ErrorEntry>,
    ) -> ExecutorResult<TestResult> {
        if !unit.exists() {
            return Err(ExecutorError::NotRunnable(unit.fullname().to_string()));
        }
        let suite = discovery.get_suite(unit, errors);
        Ok(self.run_suite(unit.fullname(), &suite))
    }

    /// Resolves `fullname` and runs it, producing the stored unit result.
    ///
    /// A name that no longer resolves yields a result with no tests and
    /// the resolution failure in `load_errors`.
    pub fn run_unit(&self, discovery: &Discovery, fullname: &str) -> UnitResult {
        let unit = discovery.resolve(fullname);
        let mut load_errors = Vec::new();
        let result = match self.run(discovery, &unit, &mut load_errors) {
            Ok(result) => result,
            Err(_) => {
                load_errors.extend(unit.load_errors().iter().cloned());
                TestResult::new(fullname)
            }
        };
        result.into_unit_result(load_errors)
    }

    /// Runs every method of `suite` inside its fixtures.
    pub fn run_suite(&self, fullname: &str, suite: &TestSuite) -> TestResult {
        let mut ctx = TestContext::new();
        let mut result = TestResult::new(fullname);

        for module in &suite.modules {
            run_module(module, &mut ctx, &mut result);
        }

        result.output = ctx.into_output();
        debug!(
            "Ran {}: {} tests, {} errors, {} failures",
            fullname,
            result.tests_run,
            result.errors.len(),
            result.failures.len()
        );
        result
    }
}

fn run_module(module: &ModuleSuite, ctx: &mut TestContext, result: &mut TestResult) {
    let fixture = module.module.fixture();

    if let Err(failure) = run_hook(fixture.set_up.as_ref(), ctx) {
        let message = format!("setUpModule ({}) failed: {}", module.fullname, failure_text(&failure));
        fail_all(module.methods(), &message, result);
        return;
    }

    for class_suite in &module.classes {
        let Some(class) = module.class(class_suite) else {
            let message = format!("class {} disappeared from its module", class_suite.fullname);
            fail_all(class_suite.methods.iter(), &message, result);
            continue;
        };

        if let Err(failure) = run_hook(class.fixture().set_up.as_ref(), ctx) {
            let message = format!(
                "setUpClass ({}) failed: {}",
                class_suite.fullname,
                failure_text(&failure)
            );
            fail_all(class_suite.methods.iter(), &message, result);
            continue;
        }

        for method in &class_suite.methods {
            result.tests_run += 1;
            let outcome = match class.get_method(&method.name) {
                Some(test) => run_guarded(test.body(), ctx),
                None => Err(Failure::error(format!("method {} not found", method.fullname))),
            };
            result.record(&method.fullname, outcome);
        }

        if let Err(failure) = run_hook(class.fixture().tear_down.as_ref(), ctx) {
            result.record(
                &format!("tearDownClass ({})", class_suite.fullname),
                Err(Failure::Error(failure_text(&failure))),
            );
        }
    }

    if let Err(failure) = run_hook(fixture.tear_down.as_ref(), ctx) {
        result.record(
            &format!("tearDownModule ({})", module.fullname),
            Err(Failure::Error(failure_text(&failure))),
        );
    }
}

fn fail_all<'a>(
    methods: impl Iterator<Item = &'a SuiteMethod>,
    message: &str,
    result: &mut TestResult,
) {
    for method in methods {
        result.tests_run += 1;
        result.record(&method.fullname, Err(Failure::error(message)));
    }
}

fn run_hook(hook: Option<&TestFn>, ctx: &mut TestContext) -> TestOutcome {
    match hook {
        Some(hook) => run_guarded(hook, ctx),
        None => Ok(()),
    }
}

/// Runs a body, turning panics into failures or errors.
fn run_guarded(body: &TestFn, ctx: &mut TestContext) -> TestOutcome {
    match catch_unwind(AssertUnwindSafe(|| body(ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => Err(panic_failure(payload.as_ref())),
    }
}

fn panic_failure(payload: &(dyn Any + Send)) -> Failure {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_string()
    };

    if message.starts_with("assertion") {
        Failure::Assertion(message)
    } else {
        Failure::Error(format!("panicked: {}", message))
    }
}

fn failure_text(failure: &Failure) -> String {
    match failure {
        Failure::Assertion(message) | Failure::Error(message) => message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, TestClass, TestModule, ensure, ensure_eq};
    use crate::config::Config;
    use crate::sample::{SAMPLE_PACKAGE, sample_catalog};
    use std::sync::Arc;

    fn discovery_over(catalog: Catalog, packages: &[&str]) -> Discovery {
        let mut config = Config::default();
        config.tests.package_names = packages.iter().map(|p| p.to_string()).collect();
        Discovery::from_config(Arc::new(catalog), &config).unwrap()
    }

    fn sample() -> Discovery {
        discovery_over(sample_catalog(), &[SAMPLE_PACKAGE])
    }

    fn run(discovery: &Discovery, fullname: &str) -> TestResult {
        let unit = discovery.resolve(fullname);
        LocalExecutor::new()
            .run(discovery, &unit, &mut Vec::new())
            .unwrap()
    }

    #[test]
    fn test_one_pass_one_failure() {
        let result = run(&sample(), "sample_package.test_one_testcase");
        assert_eq!(result.tests_run, 2);
        assert!(result.errors.is_empty());
        assert_eq!(result.failures.len(), 1);
        assert_eq!(
            result.failures[0].name(),
            "sample_package.test_one_testcase.SimpleTestCase.test_fail"
        );
        assert!(!result.passed());
        assert!(result.output.contains("test_pass ran"));
    }

    #[test]
    fn test_single_passing_method() {
        let result = run(
            &sample(),
            "sample_package.test_one_testcase.SimpleTestCase.test_pass",
        );
        assert_eq!(result.tests_run, 1);
        assert!(result.passed());
        assert_eq!(result.output, "test_pass ran\n");
    }

    #[test]
    fn test_module_fixture_runs() {
        let result = run(&sample(), "sample_package.test_module_fixture");
        assert_eq!(result.tests_run, 2);
        assert!(result.passed(), "{:?}", result);
    }

    #[test]
    fn test_class_fixture_runs_for_single_method() {
        let discovery = sample();
        let result = run(
            &discovery,
            "sample_package.test_class_fixture.HasClassFixture.test_has_class_value",
        );
        assert!(result.passed(), "{:?}", result);

        let result = run(&discovery, "sample_package.test_class_fixture.HasClassFixture");
        assert_eq!(result.tests_run, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(
            result.failures[0].name(),
            "sample_package.test_class_fixture.HasClassFixture.test_has_bad_class_value"
        );
    }

    #[test]
    fn test_bad_object_is_not_runnable() {
        let discovery = sample();
        let unit = discovery.resolve("does.not.exist");
        let err = LocalExecutor::new()
            .run(&discovery, &unit, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NotRunnable(_)));
    }

    #[test]
    fn test_run_unit_reports_load_errors() {
        let result = LocalExecutor::new().run_unit(&sample(), "sample_package.test_brokenmodule");
        assert!(result.errors.is_empty());
        assert_eq!(result.load_errors.len(), 1);
        assert_eq!(result.load_errors[0].name(), "sample_package.test_brokenmodule");
    }

    fn panicking_catalog() -> Catalog {
        let mut catalog = Catalog::new();
        catalog.add_package("pkg").unwrap();
        catalog
            .add_module(
                "pkg.test_panics",
                Arc::new(|| {
                    Ok(TestModule::new().class(
                        "Case",
                        TestClass::new()
                            .method("test_assert_macro", |_| {
                                assert_eq!(1, 2);
                                Ok(())
                            })
                            .method("test_error", |_| Err(Failure::error("went wrong")))
                            .method("test_unwrap", |_| {
                                let value: Option<u8> = None;
                                ensure_eq(value.unwrap(), 0)
                            }),
                    ))
                }),
            )
            .unwrap();
        catalog
            .add_module(
                "pkg.test_setup_fails",
                Arc::new(|| {
                    Ok(TestModule::new()
                        .with_set_up(|_| ensure(false, "no database"))
                        .class(
                            "Case",
                            TestClass::new()
                                .method("test_a", |_| Ok(()))
                                .method("test_b", |_| Ok(())),
                        ))
                }),
            )
            .unwrap();
        catalog
    }

    #[test]
    fn test_panics_become_failures_or_errors() {
        let discovery = discovery_over(panicking_catalog(), &["pkg"]);
        let result = run(&discovery, "pkg.test_panics");
        assert_eq!(result.tests_run, 3);

        let failures: Vec<&str> = result.failures.iter().map(|f| f.name()).collect();
        assert_eq!(failures, vec!["pkg.test_panics.Case.test_assert_macro"]);

        let errors: Vec<&str> = result.errors.iter().map(|e| e.name()).collect();
        assert_eq!(
            errors,
            vec!["pkg.test_panics.Case.test_error", "pkg.test_panics.Case.test_unwrap"]
        );
        assert_eq!(result.errors[0].detail(), "went wrong");
        assert!(result.errors[1].detail().starts_with("panicked:"));
    }

    #[test]
    fn test_failed_module_setup_errors_every_method() {
        let discovery = discovery_over(panicking_catalog(), &["pkg"]);
        let result = run(&discovery, "pkg.test_setup_fails");
        assert_eq!(result.tests_run, 2);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].detail().contains("no database"));
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_only_context_output_is_captured() {
        let mut catalog = Catalog::new();
        catalog.add_package("pkg").unwrap();
        catalog
            .add_module(
                "pkg.test_output",
                Arc::new(|| {
                    Ok(TestModule::new().class(
                        "Case",
                        TestClass::new().method("test_print", |ctx| {
                            println!("to the server terminal");
                            ctx.println("to the client");
                            Ok(())
                        }),
                    ))
                }),
            )
            .unwrap();
        let discovery = discovery_over(catalog, &["pkg"]);
        let result = run(&discovery, "pkg.test_output");
        assert!(result.passed());
        assert_eq!(result.output, "to the client\n");
    }

    #[test]
    fn test_into_unit_result() {
        let mut result = TestResult::new("pkg.mod");
        result.output = "out".to_string();
        result.failures.push(ErrorEntry::new("pkg.mod.C.test_x", "tb"));
        let unit = result.into_unit_result(vec![ErrorEntry::new("pkg.other", "load")]);
        assert_eq!(unit.fullname, "pkg.mod");
        assert_eq!(unit.output, "out");
        assert_eq!(unit.failures.len(), 1);
        assert_eq!(unit.load_errors[0].name(), "pkg.other");
    }
}
