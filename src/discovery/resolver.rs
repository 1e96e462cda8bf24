//! Name resolution: dotted fullname to [`TestObject`].
//!
//! Names are tried from the longest candidate module boundary down:
//!
//! | Candidate | Result |
//! |-----------|--------|
//! | `""` | root |
//! | registered package | package |
//! | registered module | module, or bad test if loading fails |
//! | `<module>.<Class>` | class |
//! | `<module>.<Class>.<method>` | method |
//! | anything else | bad test |
//!
//! Every module lookup loads the module afresh through the loader.

use std::sync::Arc;

use tracing::debug;

use super::{BadTestReason, Discovery, TestObject, TestObjectKind, is_in_test_package, split_last};
use crate::catalog::TestModule;

impl Discovery {
    /// Resolves `fullname` against the configured test packages.
    ///
    /// Never fails: names that do not resolve, or resolve outside every
    /// configured package, become bad tests with exactly one load error
    /// named `fullname`.
    pub fn resolve(&self, fullname: &str) -> TestObject {
        if fullname.is_empty() {
            return TestObject::root();
        }

        if fullname.split('.').any(str::is_empty) {
            return TestObject::bad(
                fullname,
                BadTestReason::NotFound,
                format!("'{}' is not a valid dotted name", fullname),
            );
        }

        if !is_in_test_package(fullname, &self.options().package_names) {
            return TestObject::bad(
                fullname,
                BadTestReason::NotFound,
                format!("'{}' is not in any configured test package", fullname),
            );
        }

        let loader = self.loader();

        if loader.is_package(fullname) {
            debug!("Resolved {} as package", fullname);
            return TestObject::new(
                fullname,
                TestObjectKind::Package {
                    subpackages: loader.subpackages(fullname),
                },
            );
        }

        if loader.has_module(fullname) {
            return match self.load_module(fullname) {
                Ok(module) => {
                    debug!("Resolved {} as module", fullname);
                    TestObject::new(fullname, TestObjectKind::Module { module })
                }
                Err(detail) => TestObject::bad(fullname, BadTestReason::LoadFailed, detail),
            };
        }

        if let Some((module_name, class_name)) = split_last(fullname)
            && loader.has_module(module_name)
        {
            match self.load_module(module_name) {
                Ok(module) => {
                    if module.get_class(class_name).is_some() {
                        debug!("Resolved {} as class", fullname);
                        return TestObject::new(
                            fullname,
                            TestObjectKind::Class {
                                module_name: module_name.to_string(),
                                module,
                                class_name: class_name.to_string(),
                            },
                        );
                    }
                }
                Err(detail) => {
                    return TestObject::bad(
                        fullname,
                        BadTestReason::LoadFailed,
                        module_load_detail(module_name, &detail),
                    );
                }
            }
        }

        if let Some((class_path, method_name)) = split_last(fullname)
            && let Some((module_name, class_name)) = split_last(class_path)
            && loader.has_module(module_name)
        {
            match self.load_module(module_name) {
                Ok(module) => {
                    let found = module
                        .get_class(class_name)
                        .is_some_and(|class| class.get_method(method_name).is_some());
                    if found {
                        debug!("Resolved {} as method", fullname);
                        return TestObject::new(
                            fullname,
                            TestObjectKind::Method {
                                module_name: module_name.to_string(),
                                module,
                                class_name: class_name.to_string(),
                                method_name: method_name.to_string(),
                            },
                        );
                    }
                }
                Err(detail) => {
                    return TestObject::bad(
                        fullname,
                        BadTestReason::LoadFailed,
                        module_load_detail(module_name, &detail),
                    );
                }
            }
        }

        debug!("Nothing named {} was found", fullname);
        TestObject::bad(
            fullname,
            BadTestReason::NotFound,
            format!("No test object named '{}' was found", fullname),
        )
    }

    /// Loads and prepares a module, returning the load error text on failure.
    fn load_module(&self, module_name: &str) -> Result<Arc<TestModule>, String> {
        let options = self.options();
        let short_name = split_last(module_name)
            .map(|(_, short)| short)
            .unwrap_or(module_name);
        match self.loader().load_module(module_name) {
            None => Err(format!("No module named '{}'", module_name)),
            Some(Err(detail)) => Err(detail),
            Some(Ok(module)) => module
                .prepare(
                    short_name,
                    options.include_test_functions,
                    &options.method_prefix,
                )
                .map(Arc::new),
        }
    }
}

fn module_load_detail(module_name: &str, detail: &str) -> String {
    format!("Failed to load module {}:\n{}", module_name, detail)
}
