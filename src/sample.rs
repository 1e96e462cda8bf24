//! The `sample_package` catalog.
//!
//! A small but awkward set of test modules: fixtures at module and class
//! level, free test functions, classes and methods whose self-reported
//! names disagree with their attribute names, a module that fails to load
//! and a module that does not match the default module pattern. `aeta
//! serve` exposes it, and the test suite runs against it.
//!
//! ```text
//! sample_package
//! ├── helpers                      (not collected: name does not match)
//! ├── test_badnames                renamed module, classes and methods
//! ├── test_brokenmodule            fails to load
//! ├── test_class_teardown          LeakyTestCase: passes, tearDownClass fails
//! ├── test_class_fixture           HasClassFixture (setUpClass), HasNoClassFixture
//! ├── test_goodmodule              plain class Foo, no tests
//! ├── test_module_fixture          setUpModule
//! ├── test_one_testcase            SimpleTestCase: test_pass, test_fail
//! ├── test_test_functions          free functions test_pass, test_fail
//! └── subpackage
//!     └── test_ham                 FooTest: test_pass, test_fail
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::catalog::{Catalog, CatalogResult, Failure, TestClass, TestModule, ensure, ensure_eq};

pub const SAMPLE_PACKAGE: &str = "sample_package";

/// Builds the sample catalog.
pub fn sample_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    // Names below are fixed and distinct.
    if let Err(e) = register(&mut catalog) {
        tracing::error!("Failed to register sample catalog: {}", e);
    }
    catalog
}

fn register(catalog: &mut Catalog) -> CatalogResult<()> {
    catalog
        .add_package(SAMPLE_PACKAGE)?
        .add_package("sample_package.subpackage")?
        .add_module("sample_package.helpers", Arc::new(helpers))?
        .add_module("sample_package.test_badnames", Arc::new(test_badnames))?
        .add_broken_module(
            "sample_package.test_brokenmodule",
            "error: expected item, found `{`\n --> sample_package/test_brokenmodule:3:1",
        )?
        .add_module("sample_package.test_class_fixture", Arc::new(test_class_fixture))?
        .add_module("sample_package.test_class_teardown", Arc::new(test_class_teardown))?
        .add_module("sample_package.test_goodmodule", Arc::new(test_goodmodule))?
        .add_module("sample_package.test_module_fixture", Arc::new(test_module_fixture))?
        .add_module("sample_package.test_one_testcase", Arc::new(test_one_testcase))?
        .add_module("sample_package.test_test_functions", Arc::new(test_test_functions))?
        .add_module("sample_package.subpackage.test_ham", Arc::new(test_ham))?;
    Ok(())
}

fn pass_and_fail(class: TestClass) -> TestClass {
    class
        .method("test_pass", |ctx| {
            ctx.println("test_pass ran");
            ensure(true, "true is true")
        })
        .method("test_fail", |_| ensure(false, "False is not true"))
}

fn helpers() -> Result<TestModule, String> {
    Ok(TestModule::new().class("HelperTest", pass_and_fail(TestClass::new())))
}

fn test_one_testcase() -> Result<TestModule, String> {
    Ok(TestModule::new().class("SimpleTestCase", pass_and_fail(TestClass::new())))
}

fn test_ham() -> Result<TestModule, String> {
    Ok(TestModule::new().class("FooTest", pass_and_fail(TestClass::new())))
}

fn test_module_fixture() -> Result<TestModule, String> {
    let set_up_called = Arc::new(AtomicBool::new(false));
    let flag = set_up_called.clone();
    Ok(TestModule::new()
        .with_set_up(move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .class(
            "ModuleFixtureTestCase",
            TestClass::new()
                .method("test_setup_module_called", move |_| {
                    ensure(
                        set_up_called.load(Ordering::SeqCst),
                        "setUpModule was not called",
                    )
                })
                .method("test_pass", |_| Ok(())),
        ))
}

fn test_class_fixture() -> Result<TestModule, String> {
    let class_value: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let set_value = class_value.clone();
    let good_read = class_value.clone();
    let bad_read = class_value;

    let read = |value: &Mutex<Option<String>>| {
        value
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| Failure::error("class value lock poisoned"))
    };

    Ok(TestModule::new()
        .class(
            "HasClassFixture",
            TestClass::new()
                .with_set_up(move |_| {
                    let mut guard = set_value
                        .lock()
                        .map_err(|_| Failure::error("class value lock poisoned"))?;
                    *guard = Some("value".to_string());
                    Ok(())
                })
                .method("test_has_class_value", move |_| {
                    ensure_eq(read(good_read.as_ref())?, Some("value".to_string()))
                })
                .method("test_has_bad_class_value", move |_| {
                    ensure_eq(read(bad_read.as_ref())?, Some("bad value".to_string()))
                }),
        )
        .class("HasNoClassFixture", pass_and_fail(TestClass::new())))
}

fn test_class_teardown() -> Result<TestModule, String> {
    Ok(TestModule::new().class(
        "LeakyTestCase",
        TestClass::new()
            .method("test_pass", |_| Ok(()))
            .with_tear_down(|_| Err(Failure::error("connection pool still has 1 open handle"))),
    ))
}

fn test_badnames() -> Result<TestModule, String> {
    let simple = || TestClass::new().method("test_method", |_| Ok(()));
    Ok(TestModule::new()
        .with_reported_name("not.the.import.path")
        .class(
            "ClassWithDifferentModule",
            simple().with_reported_name("other_module.ClassWithDifferentModule"),
        )
        .class("ClassWithDifferentName1", simple().with_reported_name("ClassName"))
        .class("ClassWithDifferentName2", simple().with_reported_name("ClassName"))
        .class(
            "ClassWithDifferentMethodNames",
            TestClass::new()
                .renamed_method("test_method1", "method_name", |_| Ok(()))
                .renamed_method("test_method2", "method_name", |_| Ok(())),
        ))
}

fn test_test_functions() -> Result<TestModule, String> {
    Ok(TestModule::new()
        .function("test_pass", |_| Ok(()))
        .function("test_fail", |_| ensure(false, "test_fail always fails")))
}

fn test_goodmodule() -> Result<TestModule, String> {
    Ok(TestModule::new()
        .class("Foo", TestClass::plain().method("bar", |_| Ok(())))
        .function("baz", |_| Ok(())))
}
