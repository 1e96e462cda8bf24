//! Test objects and their discovery.
//!
//! A dotted fullname resolves to a [`TestObject`]: the root of all configured
//! packages, a package, a module, a class, a method, or a bad test that
//! records why nothing usable was found. Discovery then expands objects into
//! units (the granularity tests are scheduled at), methods, and runnable
//! suites.
//!
//! ```text
//!   fullname ──► Discovery::resolve ──► TestObject
//!                                          │
//!            ┌─────────────────────────────┼─────────────────────────┐
//!            ▼                             ▼                         ▼
//!   get_units(policy)               get_methods()               get_suite()
//!   Vec<TestObject>                 Vec<TestObject>             TestSuite
//!   (scheduling units)              (every test method)         (for the executor)
//! ```
//!
//! Load failures never surface as `Err`. They are collected as
//! [`ErrorEntry`] values, attached to bad test objects and appended to the
//! `errors` list every expansion takes.

mod expander;
mod resolver;

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::catalog::{ModuleLoader, TestClass, TestModule};
use crate::config::{Config, ParallelizeConfig};
use crate::models::ErrorEntry;

pub use expander::{ClassSuite, ModuleSuite, SuiteMethod, TestSuite};

/// True if `prefix` is `name` itself, an ancestor of it, or empty.
///
/// # Example
///
/// ```
/// use aeta::discovery::is_prefix;
///
/// assert!(is_prefix("package.module", "package.module.Class.method"));
/// assert!(is_prefix("", "anything"));
/// assert!(!is_prefix("package.module", "package.module1"));
/// assert!(!is_prefix("a", ""));
/// ```
pub fn is_prefix(prefix: &str, name: &str) -> bool {
    if prefix.is_empty() || prefix == name {
        return true;
    }
    name.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// True if `name` is, or is inside, one of `package_names`.
pub fn is_in_test_package(name: &str, package_names: &[String]) -> bool {
    !name.is_empty()
        && package_names
            .iter()
            .any(|package| !package.is_empty() && is_prefix(package, name))
}

/// Splits off the last dotted segment: `"a.b.c"` gives `("a.b", "c")`.
pub fn split_last(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once('.')
}

/// Discovery settings, computed once from [`Config`].
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub package_names: Vec<String>,
    pub module_pattern: Regex,
    pub include_test_functions: bool,
    pub method_prefix: String,
    pub package_scan_depth: usize,
    pub parallelize: ParallelizeConfig,
}

impl DiscoveryOptions {
    /// # Errors
    ///
    /// Returns an error if `tests.module_pattern` is not a valid regex.
    pub fn from_config(config: &Config) -> Result<Self, regex::Error> {
        Ok(Self {
            package_names: config.tests.package_names.clone(),
            module_pattern: Regex::new(&config.tests.module_pattern)?,
            include_test_functions: config.tests.include_test_functions,
            method_prefix: config.tests.test_method_prefix.clone(),
            package_scan_depth: config.tests.package_scan_depth,
            parallelize: config.parallelize,
        })
    }
}

/// Why a name did not resolve to a usable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadTestReason {
    /// Nothing with that name exists inside the configured packages.
    NotFound,
    /// The name's module exists but failed to load.
    LoadFailed,
}

/// What a [`TestObject`] refers to.
#[derive(Clone)]
pub enum TestObjectKind {
    Root,
    Package {
        subpackages: Vec<String>,
    },
    Module {
        module: Arc<TestModule>,
    },
    Class {
        module_name: String,
        module: Arc<TestModule>,
        class_name: String,
    },
    Method {
        module_name: String,
        module: Arc<TestModule>,
        class_name: String,
        method_name: String,
    },
    Bad {
        reason: BadTestReason,
    },
}

/// A resolved test object.
///
/// Its kind depends only on how its fullname resolves against the
/// configured packages.
#[derive(Clone)]
pub struct TestObject {
    fullname: String,
    load_errors: Vec<ErrorEntry>,
    kind: TestObjectKind,
}

impl TestObject {
    pub fn root() -> Self {
        Self::new("", TestObjectKind::Root)
    }

    pub(crate) fn new(fullname: impl Into<String>, kind: TestObjectKind) -> Self {
        Self {
            fullname: fullname.into(),
            load_errors: Vec::new(),
            kind,
        }
    }

    /// A bad test carrying exactly one load error named after `fullname`.
    pub fn bad(fullname: &str, reason: BadTestReason, detail: impl Into<String>) -> Self {
        Self {
            fullname: fullname.to_string(),
            load_errors: vec![ErrorEntry::new(fullname, detail)],
            kind: TestObjectKind::Bad { reason },
        }
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn load_errors(&self) -> &[ErrorEntry] {
        &self.load_errors
    }

    pub fn kind(&self) -> &TestObjectKind {
        &self.kind
    }

    /// False only for bad tests.
    pub fn exists(&self) -> bool {
        !matches!(self.kind, TestObjectKind::Bad { .. })
    }

    pub fn bad_reason(&self) -> Option<BadTestReason> {
        match self.kind {
            TestObjectKind::Bad { reason } => Some(reason),
            _ => None,
        }
    }

    /// Lowercase name of the kind, as served by `object_type`.
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            TestObjectKind::Root => "root",
            TestObjectKind::Package { .. } => "package",
            TestObjectKind::Module { .. } => "module",
            TestObjectKind::Class { .. } => "class",
            TestObjectKind::Method { .. } => "method",
            TestObjectKind::Bad { .. } => "bad",
        }
    }

    /// The class a class or method object refers to.
    pub fn class(&self) -> Option<&TestClass> {
        match &self.kind {
            TestObjectKind::Class {
                module, class_name, ..
            }
            | TestObjectKind::Method {
                module, class_name, ..
            } => module.get_class(class_name),
            _ => None,
        }
    }
}

impl fmt::Debug for TestObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestObject")
            .field("type", &self.type_name())
            .field("fullname", &self.fullname)
            .field("load_errors", &self.load_errors)
            .finish()
    }
}

/// Resolution and expansion of test objects over a [`ModuleLoader`].
///
/// Cheap to clone; the loader and options are shared.
#[derive(Clone)]
pub struct Discovery {
    loader: Arc<dyn ModuleLoader>,
    options: Arc<DiscoveryOptions>,
}

impl Discovery {
    pub fn new(loader: Arc<dyn ModuleLoader>, options: DiscoveryOptions) -> Self {
        Self {
            loader,
            options: Arc::new(options),
        }
    }

    /// # Errors
    ///
    /// Returns an error if `tests.module_pattern` is not a valid regex.
    pub fn from_config(
        loader: Arc<dyn ModuleLoader>,
        config: &Config,
    ) -> Result<Self, regex::Error> {
        Ok(Self::new(loader, DiscoveryOptions::from_config(config)?))
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    pub(crate) fn loader(&self) -> &dyn ModuleLoader {
        self.loader.as_ref()
    }
}
