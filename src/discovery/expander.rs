//! Expansion of test objects into units, methods and suites.
//!
//! Units follow the parallelization policy, descending
//! root → packages → modules → classes → methods and stopping at the
//! finest enabled level:
//!
//! | Object | Split into children when |
//! |--------|--------------------------|
//! | root | always (one child per configured name) |
//! | package | `parallelize.modules` |
//! | module | `parallelize.classes` and no module fixture |
//! | class | `parallelize.methods` and no class fixture |
//!
//! A coarser flag dominates: a module that is not split never yields class
//! or method units. Methods and suites ignore the policy.

use std::collections::HashSet;
use std::sync::Arc;

use super::{Discovery, TestObject, TestObjectKind};
use crate::catalog::{TestClass, TestModule};
use crate::models::ErrorEntry;

/// Everything a unit runs, grouped so fixtures wrap their scope.
#[derive(Clone, Debug, Default)]
pub struct TestSuite {
    pub modules: Vec<ModuleSuite>,
}

/// The methods of one module, grouped by class.
#[derive(Clone, Debug)]
pub struct ModuleSuite {
    pub fullname: String,
    pub module: Arc<TestModule>,
    pub classes: Vec<ClassSuite>,
}

#[derive(Clone, Debug)]
pub struct ClassSuite {
    pub fullname: String,
    pub class_name: String,
    pub methods: Vec<SuiteMethod>,
}

#[derive(Clone, Debug)]
pub struct SuiteMethod {
    pub fullname: String,
    pub name: String,
}

impl TestSuite {
    fn from_methods(methods: &[TestObject]) -> Self {
        let mut suite = TestSuite::default();
        for method in methods {
            let TestObjectKind::Method {
                module_name,
                module,
                class_name,
                method_name,
            } = method.kind()
            else {
                continue;
            };

            if suite
                .modules
                .last()
                .is_none_or(|last| last.fullname != *module_name)
            {
                suite.modules.push(ModuleSuite {
                    fullname: module_name.clone(),
                    module: module.clone(),
                    classes: Vec::new(),
                });
            }
            let module_index = suite.modules.len() - 1;
            let module_suite = &mut suite.modules[module_index];

            if module_suite
                .classes
                .last()
                .is_none_or(|last| last.class_name != *class_name)
            {
                module_suite.classes.push(ClassSuite {
                    fullname: format!("{}.{}", module_name, class_name),
                    class_name: class_name.clone(),
                    methods: Vec::new(),
                });
            }
            let class_index = module_suite.classes.len() - 1;
            module_suite.classes[class_index].methods.push(SuiteMethod {
                fullname: method.fullname().to_string(),
                name: method_name.clone(),
            });
        }
        suite
    }

    /// Number of test methods in the suite.
    pub fn count_tests(&self) -> usize {
        self.modules
            .iter()
            .flat_map(|module| &module.classes)
            .map(|class| class.methods.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.count_tests() == 0
    }

    /// Fullnames of every method, in run order.
    pub fn method_fullnames(&self) -> Vec<String> {
        self.modules
            .iter()
            .flat_map(|module| &module.classes)
            .flat_map(|class| &class.methods)
            .map(|method| method.fullname.clone())
            .collect()
    }
}

impl ModuleSuite {
    pub fn class(&self, class_suite: &ClassSuite) -> Option<&TestClass> {
        self.module.get_class(&class_suite.class_name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &SuiteMethod> {
        self.classes.iter().flat_map(|class| &class.methods)
    }
}

impl Discovery {
    /// Expands `obj` into independently runnable units.
    ///
    /// Load errors met on the way are appended to `errors`, and the
    /// branch that failed contributes no units.
    pub fn get_units(&self, obj: &TestObject, errors: &mut Vec<ErrorEntry>) -> Vec<TestObject> {
        let mut units = Vec::new();
        self.collect_units(obj, 0, errors, &mut units);
        dedup_by_fullname(units)
    }

    /// Expands `obj` into every test method it contains.
    pub fn get_methods(&self, obj: &TestObject, errors: &mut Vec<ErrorEntry>) -> Vec<TestObject> {
        let mut methods = Vec::new();
        self.collect_methods(obj, 0, errors, &mut methods);
        dedup_by_fullname(methods)
    }

    /// Builds the runnable suite of `obj`.
    pub fn get_suite(&self, obj: &TestObject, errors: &mut Vec<ErrorEntry>) -> TestSuite {
        TestSuite::from_methods(&self.get_methods(obj, errors))
    }

    fn collect_units(
        &self,
        obj: &TestObject,
        depth: usize,
        errors: &mut Vec<ErrorEntry>,
        units: &mut Vec<TestObject>,
    ) {
        errors.extend(obj.load_errors().iter().cloned());
        let policy = self.options().parallelize;

        match obj.kind() {
            TestObjectKind::Root => {
                for child in self.root_children() {
                    self.collect_units(&child, 0, errors, units);
                }
            }
            TestObjectKind::Package { .. } => {
                if !policy.modules {
                    units.push(obj.clone());
                    return;
                }
                for (child, child_depth) in self.package_children(obj.fullname(), depth) {
                    self.collect_units(&child, child_depth, errors, units);
                }
            }
            TestObjectKind::Module { module } => {
                if !policy.classes || module.has_fixture() {
                    units.push(obj.clone());
                    return;
                }
                for child in module_classes(obj.fullname(), module) {
                    self.collect_units(&child, depth, errors, units);
                }
            }
            TestObjectKind::Class { .. } => {
                let Some(class) = obj.class() else {
                    return;
                };
                if !class.is_test_case() {
                    return;
                }
                if !policy.methods || class.has_fixture() {
                    units.push(obj.clone());
                    return;
                }
                units.extend(self.class_methods(obj));
            }
            TestObjectKind::Method { .. } => units.push(obj.clone()),
            TestObjectKind::Bad { .. } => {}
        }
    }

    fn collect_methods(
        &self,
        obj: &TestObject,
        depth: usize,
        errors: &mut Vec<ErrorEntry>,
        methods: &mut Vec<TestObject>,
    ) {
        errors.extend(obj.load_errors().iter().cloned());

        match obj.kind() {
            TestObjectKind::Root => {
                for child in self.root_children() {
                    self.collect_methods(&child, 0, errors, methods);
                }
            }
            TestObjectKind::Package { .. } => {
                for (child, child_depth) in self.package_children(obj.fullname(), depth) {
                    self.collect_methods(&child, child_depth, errors, methods);
                }
            }
            TestObjectKind::Module { module } => {
                for child in module_classes(obj.fullname(), module) {
                    self.collect_methods(&child, depth, errors, methods);
                }
            }
            TestObjectKind::Class { .. } => {
                if obj.class().is_some_and(TestClass::is_test_case) {
                    methods.extend(self.class_methods(obj));
                }
            }
            TestObjectKind::Method { .. } => methods.push(obj.clone()),
            TestObjectKind::Bad { .. } => {}
        }
    }

    fn root_children(&self) -> Vec<TestObject> {
        self.options()
            .package_names
            .iter()
            .map(|name| self.resolve(name))
            .collect()
    }

    /// Matching modules, then subpackages within the scan depth.
    fn package_children(&self, package: &str, depth: usize) -> Vec<(TestObject, usize)> {
        let options = self.options();
        let loader = self.loader();
        let mut children: Vec<(TestObject, usize)> = loader
            .package_modules(package)
            .into_iter()
            .filter(|short_name| options.module_pattern.is_match(short_name))
            .map(|short_name| (self.resolve(&format!("{}.{}", package, short_name)), depth))
            .collect();

        if options.package_scan_depth == 0 || depth < options.package_scan_depth {
            children.extend(
                loader
                    .subpackages(package)
                    .into_iter()
                    .map(|subpackage| (self.resolve(&subpackage), depth + 1)),
            );
        }
        children
    }

    fn class_methods(&self, class_obj: &TestObject) -> Vec<TestObject> {
        let TestObjectKind::Class {
            module_name,
            module,
            class_name,
        } = class_obj.kind()
        else {
            return Vec::new();
        };
        let Some(class) = module.get_class(class_name) else {
            return Vec::new();
        };
        class
            .test_method_names(&self.options().method_prefix)
            .map(|method_name| {
                TestObject::new(
                    format!("{}.{}", class_obj.fullname(), method_name),
                    TestObjectKind::Method {
                        module_name: module_name.clone(),
                        module: module.clone(),
                        class_name: class_name.clone(),
                        method_name: method_name.to_string(),
                    },
                )
            })
            .collect()
    }
}

/// Test case classes of a loaded module, by attribute name.
fn module_classes(module_name: &str, module: &Arc<TestModule>) -> Vec<TestObject> {
    module
        .classes()
        .filter(|(_, class)| class.is_test_case())
        .map(|(class_name, _)| {
            TestObject::new(
                format!("{}.{}", module_name, class_name),
                TestObjectKind::Class {
                    module_name: module_name.to_string(),
                    module: module.clone(),
                    class_name: class_name.to_string(),
                },
            )
        })
        .collect()
}

fn dedup_by_fullname(objects: Vec<TestObject>) -> Vec<TestObject> {
    let mut seen = HashSet::new();
    objects
        .into_iter()
        .filter(|obj| seen.insert(obj.fullname().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ParallelizeConfig};
    use crate::sample::{SAMPLE_PACKAGE, sample_catalog};

    const MODULE_FIXTURE: &str = "sample_package.test_module_fixture";
    const CLASS_FIXTURE: &str = "sample_package.test_class_fixture";
    const BADNAMES: &str = "sample_package.test_badnames";

    fn discovery(packages: &[&str], policy: (bool, bool, bool)) -> Discovery {
        let mut config = Config::default();
        config.tests.package_names = packages.iter().map(|p| p.to_string()).collect();
        config.parallelize = ParallelizeConfig {
            modules: policy.0,
            classes: policy.1,
            methods: policy.2,
        };
        Discovery::from_config(Arc::new(sample_catalog()), &config).unwrap()
    }

    const ALL: (bool, bool, bool) = (true, true, true);

    fn sorted(mut names: Vec<String>) -> Vec<String> {
        names.sort();
        names
    }

    /// Returns (unit names, load error names), both sorted.
    fn units(d: &Discovery, fullname: &str) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let units = d.get_units(&d.resolve(fullname), &mut errors);
        (
            sorted(units.iter().map(|u| u.fullname().to_string()).collect()),
            sorted(errors.iter().map(|e| e.name().to_string()).collect()),
        )
    }

    fn methods(d: &Discovery, fullname: &str) -> (Vec<String>, Vec<String>) {
        let mut errors = Vec::new();
        let methods = d.get_methods(&d.resolve(fullname), &mut errors);
        (
            sorted(methods.iter().map(|m| m.fullname().to_string()).collect()),
            sorted(errors.iter().map(|e| e.name().to_string()).collect()),
        )
    }

    fn expected(prefix: &str, suffixes: &[&str]) -> Vec<String> {
        sorted(suffixes.iter().map(|s| format!("{}{}", prefix, s)).collect())
    }

    #[test]
    fn test_units_invalid_object() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        assert_eq!(units(&d, "bad"), (vec![], vec!["bad".to_string()]));
    }

    #[test]
    fn test_units_root() {
        let subpackage = "sample_package.subpackage";
        let d = discovery(&[subpackage], ALL);
        let (names, errors) = units(&d, "");
        assert_eq!(
            names,
            expected(
                subpackage,
                &[".test_ham.FooTest.test_fail", ".test_ham.FooTest.test_pass"]
            )
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_units_package() {
        let subpackage = "sample_package.subpackage";
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let (names, _) = units(&d, subpackage);
        assert_eq!(
            names,
            expected(
                subpackage,
                &[".test_ham.FooTest.test_fail", ".test_ham.FooTest.test_pass"]
            )
        );
    }

    #[test]
    fn test_units_module_with_fixture() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        assert_eq!(units(&d, MODULE_FIXTURE).0, vec![MODULE_FIXTURE.to_string()]);
    }

    #[test]
    fn test_units_module_without_fixture() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        assert_eq!(
            units(&d, CLASS_FIXTURE).0,
            expected(
                CLASS_FIXTURE,
                &[
                    ".HasClassFixture",
                    ".HasNoClassFixture.test_fail",
                    ".HasNoClassFixture.test_pass"
                ]
            )
        );
    }

    #[test]
    fn test_units_no_parallel_classes() {
        let d = discovery(&[SAMPLE_PACKAGE], (true, false, true));
        assert_eq!(units(&d, CLASS_FIXTURE).0, vec![CLASS_FIXTURE.to_string()]);
    }

    #[test]
    fn test_units_no_parallel_methods() {
        let d = discovery(&[SAMPLE_PACKAGE], (true, true, false));
        assert_eq!(
            units(&d, CLASS_FIXTURE).0,
            expected(CLASS_FIXTURE, &[".HasClassFixture", ".HasNoClassFixture"])
        );
    }

    #[test]
    fn test_units_no_parallel_modules() {
        let d = discovery(&[SAMPLE_PACKAGE], (false, true, true));
        assert_eq!(units(&d, "").0, vec![SAMPLE_PACKAGE.to_string()]);
    }

    #[test]
    fn test_units_class_with_and_without_fixture() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let with_fixture = format!("{}.HasClassFixture", CLASS_FIXTURE);
        assert_eq!(units(&d, &with_fixture).0, vec![with_fixture.clone()]);

        let without = format!("{}.HasNoClassFixture", CLASS_FIXTURE);
        assert_eq!(
            units(&d, &without).0,
            expected(&without, &[".test_fail", ".test_pass"])
        );
    }

    #[test]
    fn test_units_load_error() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let broken = "sample_package.test_brokenmodule";
        assert_eq!(units(&d, broken), (vec![], vec![broken.to_string()]));
    }

    #[test]
    fn test_units_package_with_broken_module() {
        let d = discovery(&[SAMPLE_PACKAGE], (true, false, false));
        let (names, errors) = units(&d, "");
        assert_eq!(errors, vec!["sample_package.test_brokenmodule".to_string()]);
        assert!(names.contains(&"sample_package.test_one_testcase".to_string()));
        assert!(names.contains(&"sample_package.subpackage.test_ham".to_string()));
        assert!(!names.contains(&"sample_package.test_brokenmodule".to_string()));
        assert!(!names.iter().any(|n| n.ends_with("helpers")));
    }

    #[test]
    fn test_units_module_bad_name() {
        let d = discovery(&[SAMPLE_PACKAGE], (true, false, false));
        assert!(units(&d, SAMPLE_PACKAGE).0.contains(&BADNAMES.to_string()));
    }

    #[test]
    fn test_units_class_bad_names() {
        let d = discovery(&[SAMPLE_PACKAGE], (true, true, false));
        assert_eq!(
            units(&d, BADNAMES).0,
            expected(
                BADNAMES,
                &[
                    ".ClassWithDifferentMethodNames",
                    ".ClassWithDifferentModule",
                    ".ClassWithDifferentName1",
                    ".ClassWithDifferentName2"
                ]
            )
        );
    }

    #[test]
    fn test_units_method_bad_names() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let class = format!("{}.ClassWithDifferentMethodNames", BADNAMES);
        assert_eq!(
            units(&d, &class).0,
            expected(&class, &[".test_method1", ".test_method2"])
        );
    }

    #[test]
    fn test_units_plain_class_has_none() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        assert!(units(&d, "sample_package.test_goodmodule.Foo").0.is_empty());
    }

    #[test]
    fn test_units_cover_every_method_once() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let (method_names, _) = methods(&d, SAMPLE_PACKAGE);

        let mut errors = Vec::new();
        let mut from_units = Vec::new();
        for unit in d.get_units(&d.resolve(SAMPLE_PACKAGE), &mut errors) {
            from_units.extend(
                d.get_methods(&unit, &mut Vec::new())
                    .iter()
                    .map(|m| m.fullname().to_string()),
            );
        }
        assert_eq!(sorted(from_units), method_names);
    }

    #[test]
    fn test_scan_depth_limits_subpackages() {
        let nested = || {
            let mut catalog = sample_catalog();
            catalog
                .add_package("sample_package.subpackage.deeper")
                .unwrap()
                .add_module(
                    "sample_package.subpackage.deeper.test_x",
                    Arc::new(|| {
                        Ok(TestModule::new()
                            .class("Deep", TestClass::new().method("test_deep", |_| Ok(()))))
                    }),
                )
                .unwrap();
            Arc::new(catalog)
        };
        let deep = "sample_package.subpackage.deeper.test_x.Deep.test_deep".to_string();
        let ham = "sample_package.subpackage.test_ham.FooTest.test_pass".to_string();

        let mut config = Config::default();
        config.tests.package_names = vec![SAMPLE_PACKAGE.to_string()];
        config.tests.package_scan_depth = 0;
        let unlimited = Discovery::from_config(nested(), &config).unwrap();
        let found = methods(&unlimited, SAMPLE_PACKAGE).0;
        assert!(found.contains(&deep));
        assert!(found.contains(&ham));
        assert!(units(&unlimited, SAMPLE_PACKAGE).0.contains(&deep));

        config.tests.package_scan_depth = 1;
        let one_level = Discovery::from_config(nested(), &config).unwrap();
        let found = methods(&one_level, SAMPLE_PACKAGE).0;
        assert!(!found.contains(&deep));
        assert!(found.contains(&ham));
        assert!(!units(&one_level, SAMPLE_PACKAGE).0.contains(&deep));

        // The limit counts from the package being expanded.
        let found = methods(&one_level, "sample_package.subpackage").0;
        assert!(found.contains(&deep));
    }

    #[test]
    fn test_methods_root_module() {
        let module = "sample_package.test_one_testcase";
        let d = discovery(&[module], ALL);
        assert_eq!(
            methods(&d, "").0,
            expected(module, &[".SimpleTestCase.test_fail", ".SimpleTestCase.test_pass"])
        );
    }

    #[test]
    fn test_methods_root_bad_module() {
        let module = "sample_package.test_badmodule";
        let d = discovery(&[module], ALL);
        assert_eq!(methods(&d, ""), (vec![], vec![module.to_string()]));
    }

    #[test]
    fn test_methods_module_class_method() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        assert_eq!(
            methods(&d, CLASS_FIXTURE).0,
            expected(
                CLASS_FIXTURE,
                &[
                    ".HasClassFixture.test_has_bad_class_value",
                    ".HasClassFixture.test_has_class_value",
                    ".HasNoClassFixture.test_fail",
                    ".HasNoClassFixture.test_pass"
                ]
            )
        );

        let class = format!("{}.HasClassFixture", CLASS_FIXTURE);
        assert_eq!(
            methods(&d, &class).0,
            expected(&class, &[".test_has_bad_class_value", ".test_has_class_value"])
        );

        let method = format!("{}.test_has_class_value", class);
        assert_eq!(methods(&d, &method).0, vec![method.clone()]);
    }

    #[test]
    fn test_methods_bad_names() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        assert_eq!(
            methods(&d, BADNAMES).0,
            expected(
                BADNAMES,
                &[
                    ".ClassWithDifferentMethodNames.test_method1",
                    ".ClassWithDifferentMethodNames.test_method2",
                    ".ClassWithDifferentModule.test_method",
                    ".ClassWithDifferentName1.test_method",
                    ".ClassWithDifferentName2.test_method"
                ]
            )
        );
    }

    #[test]
    fn test_methods_wrapped_functions() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let module = "sample_package.test_test_functions";
        assert_eq!(
            methods(&d, module).0,
            expected(
                module,
                &[
                    ".TestTestFunctionsWrappedTestFunctions.test_fail",
                    ".TestTestFunctionsWrappedTestFunctions.test_pass"
                ]
            )
        );
    }

    #[test]
    fn test_suite_groups_by_module_and_class() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let mut errors = Vec::new();
        let suite = d.get_suite(&d.resolve(CLASS_FIXTURE), &mut errors);
        assert!(errors.is_empty());
        assert_eq!(suite.modules.len(), 1);
        assert_eq!(suite.modules[0].classes.len(), 2);
        assert_eq!(suite.count_tests(), 4);
        assert_eq!(
            suite.modules[0].classes[0].fullname,
            format!("{}.HasClassFixture", CLASS_FIXTURE)
        );
    }

    #[test]
    fn test_suite_invalid_name() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let mut errors = Vec::new();
        let suite = d.get_suite(&d.resolve("bad"), &mut errors);
        assert!(suite.is_empty());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].name(), "bad");
    }

    #[test]
    fn test_suite_bad_names() {
        let d = discovery(&[SAMPLE_PACKAGE], ALL);
        let suite = d.get_suite(&d.resolve(BADNAMES), &mut Vec::new());
        assert_eq!(suite.method_fullnames().len(), 5);
    }
}
