//! Explicit test registry.
//!
//! Tests are not found by importing code at runtime. Instead an application
//! registers its test packages and modules in a [`Catalog`] during an
//! initialization pass, and discovery looks names up in it.
//!
//! # Structure
//!
//! ```text
//! Catalog
//! ├── packages             "sample_package", "sample_package.subpackage"
//! └── modules              dotted name -> ModuleFactory
//!         │
//!         │ load (called on every resolution)
//!         ▼
//!     TestModule
//!     ├── fixture          setUpModule / tearDownModule
//!     ├── classes          attribute name -> TestClass
//!     │     ├── fixture    setUpClass / tearDownClass
//!     │     └── methods    attribute name -> TestMethod
//!     └── functions        free test functions
//! ```
//!
//! A module factory runs every time the module is resolved, so each
//! resolution sees freshly built test state. A factory returning `Err`
//! models a module that fails to load; the error text becomes the load
//! error's traceback.
//!
//! Registration conflicts (a package or module registered twice) are
//! rejected with [`CatalogError::Conflict`]. Conflicts inside a module
//! (two classes with one attribute name) are reported when the module is
//! loaded, as a load error of that module.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use aeta::catalog::{Catalog, TestClass, TestModule, ensure};
//!
//! let mut catalog = Catalog::new();
//! catalog.add_package("tests")?;
//! catalog.add_module(
//!     "tests.test_math",
//!     Arc::new(|| {
//!         Ok(TestModule::new().class(
//!             "MathTest",
//!             TestClass::new()
//!                 .method("test_add", |_| ensure(1 + 1 == 2, "1 + 1 != 2"))
//!                 .method("test_output", |ctx| {
//!                     ctx.println("printed while testing");
//!                     Ok(())
//!                 }),
//!         ))
//!     }),
//! )?;
//! # Ok::<(), aeta::catalog::CatalogError>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Result type for catalog registration.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors raised while registering packages and modules.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The name is already registered as a package or module.
    #[error("'{0}' is already registered")]
    Conflict(String),

    /// A dotted name whose parent package was never registered.
    #[error("parent package of '{0}' is not registered")]
    MissingParent(String),

    /// Empty names and names with empty segments.
    #[error("invalid name: '{0}'")]
    InvalidName(String),
}

/// How a test body or fixture ends when it does not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// An explicit assertion did not hold.
    Assertion(String),
    /// Anything else went wrong.
    Error(String),
}

impl Failure {
    pub fn assertion(message: impl Into<String>) -> Self {
        Failure::Assertion(message.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        Failure::Error(message.into())
    }
}

/// Outcome of a test body or fixture.
pub type TestOutcome = Result<(), Failure>;

/// Fails with an assertion failure unless `condition` holds.
pub fn ensure(condition: bool, message: impl Into<String>) -> TestOutcome {
    if condition {
        Ok(())
    } else {
        Err(Failure::Assertion(message.into()))
    }
}

/// Fails with an assertion failure unless `left == right`.
pub fn ensure_eq<T: PartialEq + fmt::Debug>(left: T, right: T) -> TestOutcome {
    if left == right {
        Ok(())
    } else {
        Err(Failure::Assertion(format!("{:?} != {:?}", left, right)))
    }
}

/// Output sink handed to test bodies and fixtures.
///
/// Everything written here, through [`TestContext::println`] or
/// `write!`, is captured into the unit's output. Process stdout and stderr
/// are not captured: a `println!` inside a test body goes to the server's
/// terminal and never reaches the client.
#[derive(Debug, Default)]
pub struct TestContext {
    output: String,
}

impl TestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `text` and a newline to the captured output.
    pub fn println(&mut self, text: impl AsRef<str>) {
        self.output.push_str(text.as_ref());
        self.output.push('\n');
    }

    /// Output captured so far. Only text written to this context counts,
    /// not what the test printed to stdout.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }
}

impl fmt::Write for TestContext {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.output.push_str(s);
        Ok(())
    }
}

/// A test body or fixture.
pub type TestFn = Arc<dyn Fn(&mut TestContext) -> TestOutcome + Send + Sync>;

/// Builds a fresh [`TestModule`] each time the module is loaded.
pub type ModuleFactory = Arc<dyn Fn() -> Result<TestModule, String> + Send + Sync>;

/// Setup and teardown hooks of a module or class.
#[derive(Clone, Default)]
pub struct Fixture {
    pub set_up: Option<TestFn>,
    pub tear_down: Option<TestFn>,
}

impl Fixture {
    /// True if either hook is present.
    pub fn is_defined(&self) -> bool {
        self.set_up.is_some() || self.tear_down.is_some()
    }
}

impl fmt::Debug for Fixture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fixture")
            .field("set_up", &self.set_up.is_some())
            .field("tear_down", &self.tear_down.is_some())
            .finish()
    }
}

/// A method registered on a [`TestClass`].
#[derive(Clone)]
pub struct TestMethod {
    body: TestFn,
    reported_name: Option<String>,
}

impl TestMethod {
    pub fn body(&self) -> &TestFn {
        &self.body
    }

    /// Name the method claims for itself, if it differs from its attribute name.
    pub fn reported_name(&self) -> Option<&str> {
        self.reported_name.as_deref()
    }
}

impl fmt::Debug for TestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestMethod")
            .field("reported_name", &self.reported_name)
            .finish_non_exhaustive()
    }
}

/// A class of tests, keyed in its module by attribute name.
#[derive(Clone, Debug)]
pub struct TestClass {
    is_test_case: bool,
    reported_name: Option<String>,
    fixture: Fixture,
    methods: BTreeMap<String, TestMethod>,
    conflicts: Vec<String>,
}

impl Default for TestClass {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClass {
    /// A test case class: its prefixed methods are tests.
    pub fn new() -> Self {
        Self {
            is_test_case: true,
            reported_name: None,
            fixture: Fixture::default(),
            methods: BTreeMap::new(),
            conflicts: Vec::new(),
        }
    }

    /// A plain class: resolvable by name, but never collected as tests.
    pub fn plain() -> Self {
        Self {
            is_test_case: false,
            ..Self::new()
        }
    }

    pub fn method<F>(self, name: &str, body: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        self.insert_method(name, Arc::new(body), None)
    }

    /// Registers a method whose self-reported name differs from `name`.
    pub fn renamed_method<F>(self, name: &str, reported_name: &str, body: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        self.insert_method(name, Arc::new(body), Some(reported_name.to_string()))
    }

    fn insert_method(mut self, name: &str, body: TestFn, reported_name: Option<String>) -> Self {
        if self.methods.contains_key(name) {
            self.conflicts.push(format!("method '{}'", name));
        } else {
            self.methods.insert(
                name.to_string(),
                TestMethod {
                    body,
                    reported_name,
                },
            );
        }
        self
    }

    pub fn with_reported_name(mut self, name: &str) -> Self {
        self.reported_name = Some(name.to_string());
        self
    }

    pub fn with_set_up<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        self.fixture.set_up = Some(Arc::new(hook));
        self
    }

    pub fn with_tear_down<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        self.fixture.tear_down = Some(Arc::new(hook));
        self
    }

    pub fn is_test_case(&self) -> bool {
        self.is_test_case
    }

    pub fn reported_name(&self) -> Option<&str> {
        self.reported_name.as_deref()
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    pub fn has_fixture(&self) -> bool {
        self.fixture.is_defined()
    }

    pub fn get_method(&self, name: &str) -> Option<&TestMethod> {
        self.methods.get(name)
    }

    /// Attribute names of the test methods, sorted.
    pub fn test_method_names<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.methods
            .keys()
            .filter(move |name| name.starts_with(prefix))
            .map(String::as_str)
    }
}

/// A loaded test module.
#[derive(Clone, Default)]
pub struct TestModule {
    reported_name: Option<String>,
    fixture: Fixture,
    classes: BTreeMap<String, TestClass>,
    functions: BTreeMap<String, TestFn>,
    conflicts: Vec<String>,
}

impl fmt::Debug for TestModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModule")
            .field("reported_name", &self.reported_name)
            .field("fixture", &self.fixture)
            .field("classes", &self.classes)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TestModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the module claims for itself. Discovery ignores it.
    pub fn with_reported_name(mut self, name: &str) -> Self {
        self.reported_name = Some(name.to_string());
        self
    }

    pub fn with_set_up<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        self.fixture.set_up = Some(Arc::new(hook));
        self
    }

    pub fn with_tear_down<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        self.fixture.tear_down = Some(Arc::new(hook));
        self
    }

    pub fn class(mut self, name: &str, class: TestClass) -> Self {
        if self.classes.contains_key(name) {
            self.conflicts.push(format!("class '{}'", name));
        } else {
            self.conflicts.extend(
                class
                    .conflicts
                    .iter()
                    .map(|conflict| format!("{} of class '{}'", conflict, name)),
            );
            self.classes.insert(name.to_string(), class);
        }
        self
    }

    /// Registers a free function. Test functions are wrapped in a
    /// synthetic class when the module is prepared for discovery.
    pub fn function<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&mut TestContext) -> TestOutcome + Send + Sync + 'static,
    {
        if self.functions.contains_key(name) {
            self.conflicts.push(format!("function '{}'", name));
        } else {
            self.functions.insert(name.to_string(), Arc::new(body));
        }
        self
    }

    pub fn reported_name(&self) -> Option<&str> {
        self.reported_name.as_deref()
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    pub fn has_fixture(&self) -> bool {
        self.fixture.is_defined()
    }

    pub fn get_class(&self, name: &str) -> Option<&TestClass> {
        self.classes.get(name)
    }

    /// All classes by attribute name, sorted.
    pub fn classes(&self) -> impl Iterator<Item = (&str, &TestClass)> {
        self.classes.iter().map(|(name, class)| (name.as_str(), class))
    }

    /// Validates the module and wraps its free test functions.
    ///
    /// `short_name` is the last segment of the module's import path. When
    /// `include_test_functions` is set, functions starting with `prefix`
    /// become methods of a class named `<CamelShortName>WrappedTestFunctions`.
    ///
    /// # Errors
    ///
    /// Returns the text of a load error if the module registered a name twice
    /// or the synthetic class name is already taken.
    pub fn prepare(
        mut self,
        short_name: &str,
        include_test_functions: bool,
        prefix: &str,
    ) -> Result<TestModule, String> {
        if !self.conflicts.is_empty() {
            return Err(format!(
                "duplicate definitions in module: {}",
                self.conflicts.join(", ")
            ));
        }

        if !include_test_functions {
            return Ok(self);
        }

        let functions: Vec<(String, TestFn)> = self
            .functions
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, body)| (name.clone(), body.clone()))
            .collect();
        if functions.is_empty() {
            return Ok(self);
        }

        let wrapper_name = wrapped_functions_class_name(short_name);
        if self.classes.contains_key(&wrapper_name) {
            return Err(format!(
                "cannot wrap test functions: class '{}' already exists",
                wrapper_name
            ));
        }

        debug!(
            "Wrapping {} test functions of {} in {}",
            functions.len(),
            short_name,
            wrapper_name
        );
        let mut wrapper = TestClass::new();
        for (name, body) in functions {
            wrapper = wrapper.insert_method(&name, body, None);
        }
        self.classes.insert(wrapper_name, wrapper);
        Ok(self)
    }
}

/// Name of the synthetic class holding a module's free test functions.
///
/// # Example
///
/// ```
/// use aeta::catalog::wrapped_functions_class_name;
///
/// assert_eq!(
///     wrapped_functions_class_name("test_test_functions"),
///     "TestTestFunctionsWrappedTestFunctions"
/// );
/// ```
pub fn wrapped_functions_class_name(module_short_name: &str) -> String {
    let camel: String = module_short_name
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect();
    format!("{}WrappedTestFunctions", camel)
}

/// Code loading as seen by discovery.
///
/// [`Catalog`] is the production implementation; tests substitute their own.
pub trait ModuleLoader: Send + Sync {
    /// True if `name` is a registered package.
    fn is_package(&self, name: &str) -> bool;

    /// Full names of the immediate subpackages of `package`, sorted.
    fn subpackages(&self, package: &str) -> Vec<String>;

    /// Short names of the modules directly inside `package`, sorted.
    fn package_modules(&self, package: &str) -> Vec<String>;

    /// True if `name` is a registered module.
    fn has_module(&self, name: &str) -> bool;

    /// Loads `name` afresh. `None` if there is no such module.
    fn load_module(&self, name: &str) -> Option<Result<TestModule, String>>;
}

/// Registry of test packages and modules.
#[derive(Default)]
pub struct Catalog {
    packages: BTreeSet<String>,
    modules: BTreeMap<String, ModuleFactory>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a package. Its parent package must already be registered.
    pub fn add_package(&mut self, name: &str) -> CatalogResult<&mut Self> {
        self.check_new_name(name)?;
        self.packages.insert(name.to_string());
        Ok(self)
    }

    /// Registers a module built by `factory` on every load.
    pub fn add_module(&mut self, name: &str, factory: ModuleFactory) -> CatalogResult<&mut Self> {
        self.check_new_name(name)?;
        self.modules.insert(name.to_string(), factory);
        Ok(self)
    }

    /// Registers a module that always fails to load with `error`.
    pub fn add_broken_module(&mut self, name: &str, error: &str) -> CatalogResult<&mut Self> {
        let error = error.to_string();
        self.add_module(name, Arc::new(move || Err(error.clone())))
    }

    fn check_new_name(&self, name: &str) -> CatalogResult<()> {
        if name.is_empty() || name.split('.').any(str::is_empty) {
            return Err(CatalogError::InvalidName(name.to_string()));
        }
        if self.packages.contains(name) || self.modules.contains_key(name) {
            return Err(CatalogError::Conflict(name.to_string()));
        }
        if let Some((parent, _)) = name.rsplit_once('.')
            && !self.packages.contains(parent)
        {
            return Err(CatalogError::MissingParent(name.to_string()));
        }
        Ok(())
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}

fn parent_of(name: &str) -> &str {
    name.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("")
}

impl ModuleLoader for Catalog {
    fn is_package(&self, name: &str) -> bool {
        self.packages.contains(name)
    }

    fn subpackages(&self, package: &str) -> Vec<String> {
        self.packages
            .iter()
            .filter(|name| parent_of(name) == package && name.as_str() != package)
            .cloned()
            .collect()
    }

    fn package_modules(&self, package: &str) -> Vec<String> {
        self.modules
            .keys()
            .filter(|name| parent_of(name) == package)
            .filter_map(|name| name.rsplit_once('.').map(|(_, short)| short.to_string()))
            .collect()
    }

    fn has_module(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    fn load_module(&self, name: &str) -> Option<Result<TestModule, String>> {
        let factory = self.modules.get(name)?;
        debug!("Loading module {}", name);
        Some(factory())
    }
}
