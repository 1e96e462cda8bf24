//! Remote client for aeta servers.
//!
//! Runs the tests of a remote server as local test cases:
//!
//! 1. [`RestClient`] talks to the REST surface through an injected
//!    [`Authenticator`].
//! 2. [`ResultUpdater`] starts a batch and collects unit results as they
//!    finish.
//! 3. [`create_test_cases`] turns the batch's methods into one
//!    [`RemoteTestCase`] per class; running a [`RemoteTestMethod`] replays
//!    the remote [`RemoteOutcome`] of that method.
//!
//! Modules that failed to load on the server show up as a synthetic
//! `<module>.ModuleLoadTest.testModuleLoadedSuccessfully` method that
//! errors with the load traceback.

pub mod auth;
pub mod updater;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

pub use auth::{Authenticator, HttpAuthenticator, HttpReply, TokenSource};
pub use updater::ResultUpdater;

use crate::discovery::split_last;
use crate::models::{BatchInfo, ErrorEntry, MethodsInfo, StartBatchResponse, UnitResult};
use crate::report::{MethodReport, RunSummary};

/// Class name of the synthetic test reporting a module load error.
pub const MODULE_LOAD_ERROR_CLASS_NAME: &str = "ModuleLoadTest";

/// Method name of the synthetic test reporting a module load error.
pub const MODULE_LOAD_ERROR_METHOD_NAME: &str = "testModuleLoadedSuccessfully";

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by the remote client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server answered 400 or 404.
    #[error("No data for \"{0}\" found")]
    NotFound(String),

    #[error(
        "The server returned a 500 while accessing \"{url}\". Please check the server logs for more details. Error message:\n{body}"
    )]
    Server { url: String, body: String },

    #[error("An error occurred while fetching \"{url}\" (HTTP {status}):\n{body}")]
    Http { url: String, status: u16, body: String },

    #[error("Could not decode the response of \"{url}\": {message}")]
    Decode { url: String, message: String },

    #[error("Authentication for \"{url}\" failed after {attempts} attempts (HTTP {status})")]
    Auth {
        url: String,
        status: u16,
        attempts: u32,
    },

    #[error("Request to \"{url}\" failed: {message}")]
    Transport { url: String, message: String },

    /// A synthesized class or method clashes with an existing one.
    #[error("\"{0}\" already exists")]
    NameConflict(String),

    /// A remote test failed an assertion.
    #[error("{0}")]
    AssertionFailed(String),

    /// A remote test raised an error.
    #[error("{0}")]
    TestError(String),
}

/// Typed access to the REST endpoints of one server.
#[derive(Clone)]
pub struct RestClient {
    rest_url: String,
    auth: Arc<dyn Authenticator>,
}

impl RestClient {
    /// A client for the server whose aeta routes live at `base_url`
    /// (e.g. `http://localhost:8080/tests`).
    pub fn new(base_url: &str, auth: Arc<dyn Authenticator>) -> Self {
        Self {
            rest_url: format!("{}/rest/", base_url.trim_end_matches('/')),
            auth,
        }
    }

    pub fn rest_url(&self) -> &str {
        &self.rest_url
    }

    pub async fn get_methods(&self, fullname: &str) -> ClientResult<MethodsInfo> {
        self.request(Method::GET, &format!("get_methods/{}", fullname), fullname)
            .await
    }

    /// `root`, `package`, `module`, `class`, `method` or `bad`.
    pub async fn object_type(&self, fullname: &str) -> ClientResult<String> {
        #[derive(serde::Deserialize)]
        struct ObjectType {
            object_type: String,
        }
        let reply: ObjectType = self
            .request(Method::GET, &format!("object_type/{}", fullname), fullname)
            .await?;
        Ok(reply.object_type)
    }

    pub async fn start_batch(&self, fullname: &str) -> ClientResult<StartBatchResponse> {
        self.request(Method::POST, &format!("start_batch/{}", fullname), fullname)
            .await
    }

    pub async fn batch_info(&self, batch_id: &str) -> ClientResult<BatchInfo> {
        self.request(Method::GET, &format!("batch_info/{}", batch_id), batch_id)
            .await
    }

    pub async fn batch_results(&self, batch_id: &str, start: usize) -> ClientResult<Vec<UnitResult>> {
        self.request(
            Method::GET,
            &format!("batch_results/{}?start={}", batch_id, start),
            batch_id,
        )
        .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        name: &str,
    ) -> ClientResult<T> {
        let url = format!("{}{}", self.rest_url, path);
        let reply = self.auth.fetch(method, &url).await?;
        debug!("{} -> {}", url, reply.status);
        match reply.status {
            200..=299 => serde_json::from_str(&reply.body).map_err(|e| ClientError::Decode {
                url,
                message: format!("{}\n{}", e, reply.body),
            }),
            400 | 404 => Err(ClientError::NotFound(name.to_string())),
            500 => Err(ClientError::Server {
                url,
                body: reply.body,
            }),
            status => Err(ClientError::Http {
                url,
                status,
                body: reply.body,
            }),
        }
    }
}

/// What happened to one remote test method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Passed; `output` is what its unit printed.
    Pass { output: String },
    Fail { traceback: String },
    Error { traceback: String },
}

impl RemoteOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, RemoteOutcome::Pass { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RemoteOutcome::Pass { .. } => "ok",
            RemoteOutcome::Fail { .. } => "FAIL",
            RemoteOutcome::Error { .. } => "ERROR",
        }
    }

    /// Replays the outcome locally: a pass returns the captured output, a
    /// failure or an error is raised with the remote traceback.
    pub fn replay(&self) -> ClientResult<&str> {
        match self {
            RemoteOutcome::Pass { output } => Ok(output),
            RemoteOutcome::Fail { traceback } => {
                Err(ClientError::AssertionFailed(traceback.clone()))
            }
            RemoteOutcome::Error { traceback } => Err(ClientError::TestError(traceback.clone())),
        }
    }
}

/// Fullname of the synthetic method reporting that `module` failed to load.
pub fn load_error_method_name(module: &str) -> String {
    format!(
        "{}.{}.{}",
        module, MODULE_LOAD_ERROR_CLASS_NAME, MODULE_LOAD_ERROR_METHOD_NAME
    )
}

/// A local stand-in for one remote test method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTestMethod {
    /// Fullname on the server.
    pub fullname: String,
    /// Last component of the fullname.
    pub name: String,
}

impl RemoteTestMethod {
    fn new(fullname: &str) -> Self {
        let name = split_last(fullname).map_or(fullname, |(_, name)| name);
        Self {
            fullname: fullname.to_string(),
            name: name.to_string(),
        }
    }

    /// Waits for the remote outcome of this method.
    pub async fn run(&self, updater: &mut ResultUpdater) -> ClientResult<RemoteOutcome> {
        updater.wait_for(&self.fullname).await
    }
}

/// A local stand-in for one remote test class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTestCase {
    /// Fullname of the class on the server.
    pub name: String,
    pub methods: Vec<RemoteTestMethod>,
}

impl RemoteTestCase {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    fn add_method(&mut self, method: RemoteTestMethod) -> ClientResult<()> {
        if self.methods.iter().any(|m| m.name == method.name) {
            return Err(ClientError::NameConflict(method.fullname));
        }
        self.methods.push(method);
        Ok(())
    }
}

/// Builds one test case per remote class of `updater`'s batch.
///
/// Starts the batch if needed. Module load errors become a
/// `ModuleLoadTest` case each.
pub async fn create_test_cases(updater: &mut ResultUpdater) -> ClientResult<Vec<RemoteTestCase>> {
    let info = updater.initialize().await?.clone();

    let mut cases: BTreeMap<String, RemoteTestCase> = BTreeMap::new();
    for method in info.test_unit_methods.values().flatten() {
        let class = split_last(method).map_or("", |(class, _)| class);
        cases
            .entry(class.to_string())
            .or_insert_with(|| RemoteTestCase::new(class))
            .add_method(RemoteTestMethod::new(method))?;
    }

    for ErrorEntry(module, _) in &info.load_errors {
        let class = format!("{}.{}", module, MODULE_LOAD_ERROR_CLASS_NAME);
        if cases.contains_key(&class) {
            return Err(ClientError::NameConflict(class));
        }
        let mut case = RemoteTestCase::new(class.clone());
        case.add_method(RemoteTestMethod::new(&load_error_method_name(module)))?;
        cases.insert(class, case);
    }

    Ok(cases.into_values().collect())
}

/// An ordered set of remote test cases with unique names.
#[derive(Debug, Default)]
pub struct RemoteSuite {
    cases: Vec<RemoteTestCase>,
}

impl RemoteSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `cases`, or none of them if any name is already taken.
    pub fn add_test_cases(&mut self, cases: Vec<RemoteTestCase>) -> ClientResult<()> {
        for (i, case) in cases.iter().enumerate() {
            let taken = self.cases.iter().any(|c| c.name == case.name)
                || cases[..i].iter().any(|c| c.name == case.name);
            if taken {
                return Err(ClientError::NameConflict(case.name.clone()));
            }
        }
        self.cases.extend(cases);
        Ok(())
    }

    pub fn cases(&self) -> &[RemoteTestCase] {
        &self.cases
    }

    /// Number of test methods in the suite.
    pub fn count_test_cases(&self) -> usize {
        self.cases.iter().map(|case| case.methods.len()).sum()
    }

    /// Runs every method in order, calling `on_result` as each one
    /// completes.
    pub async fn run<F>(&self, updater: &mut ResultUpdater, mut on_result: F) -> ClientResult<RunSummary>
    where
        F: FnMut(&MethodReport),
    {
        let start = Instant::now();
        let mut results = Vec::with_capacity(self.count_test_cases());
        for case in &self.cases {
            for method in &case.methods {
                let report = MethodReport {
                    fullname: method.fullname.clone(),
                    outcome: method.run(updater).await?,
                };
                on_result(&report);
                results.push(report);
            }
        }
        Ok(RunSummary {
            results,
            duration: start.elapsed(),
        })
    }
}
