//! JUnit XML for remote runs.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="3" failures="1" errors="1" time="0.412">
//!   <testsuite name="aeta" tests="3" failures="1" errors="1" time="0.412">
//!     <testcase classname="sample_package.test_one_testcase.SimpleTestCase" name="test_pass"/>
//!     <testcase classname="sample_package.test_one_testcase.SimpleTestCase" name="test_fail">
//!       <failure message="False is not true" type="AssertionError">...</failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```
//!
//! The classname is everything before the last dot of the method fullname.

use std::path::Path;

use anyhow::Context;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use super::{MethodReport, RunSummary};
use crate::client::RemoteOutcome;
use crate::discovery::split_last;

/// Renders `summary` as JUnit XML.
pub fn to_junit_xml(summary: &RunSummary, suite_name: &str) -> anyhow::Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let tests = summary.total().to_string();
    let failures = summary.failed().to_string();
    let errors = summary.errors().to_string();
    let time = format!("{:.3}", summary.duration.as_secs_f64());

    let mut testsuites = BytesStart::new("testsuites");
    testsuites.push_attribute(("tests", tests.as_str()));
    testsuites.push_attribute(("failures", failures.as_str()));
    testsuites.push_attribute(("errors", errors.as_str()));
    testsuites.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(testsuites))?;

    let mut testsuite = BytesStart::new("testsuite");
    testsuite.push_attribute(("name", suite_name));
    testsuite.push_attribute(("tests", tests.as_str()));
    testsuite.push_attribute(("failures", failures.as_str()));
    testsuite.push_attribute(("errors", errors.as_str()));
    testsuite.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(testsuite))?;

    for report in &summary.results {
        write_testcase(&mut writer, report)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    Ok(String::from_utf8(writer.into_inner())?)
}

fn write_testcase<W: std::io::Write>(
    writer: &mut Writer<W>,
    report: &MethodReport,
) -> anyhow::Result<()> {
    let (classname, name) =
        split_last(&report.fullname).unwrap_or(("", report.fullname.as_str()));

    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", classname));
    testcase.push_attribute(("name", name));

    let (tag, kind, traceback) = match &report.outcome {
        RemoteOutcome::Pass { .. } => {
            writer.write_event(Event::Empty(testcase))?;
            return Ok(());
        }
        RemoteOutcome::Fail { traceback } => ("failure", "AssertionError", traceback),
        RemoteOutcome::Error { traceback } => ("error", "Error", traceback),
    };

    writer.write_event(Event::Start(testcase))?;
    let mut element = BytesStart::new(tag);
    let message = clean(last_line(traceback));
    element.push_attribute(("message", message.as_str()));
    element.push_attribute(("type", kind));
    writer.write_event(Event::Start(element))?;
    writer.write_event(Event::Text(BytesText::new(&clean(traceback))))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))?;
    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

fn last_line(text: &str) -> &str {
    text.trim_end().lines().last().unwrap_or("")
}

/// Drops characters XML 1.0 cannot carry; quick-xml escapes the rest.
fn clean(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}'))
        .collect()
}

/// Writes the JUnit report of `summary` to `path`, creating parent
/// directories.
pub fn write_junit(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let xml = to_junit_xml(summary, "aeta")?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, xml).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("JUnit XML written to: {}", path.display());
    Ok(())
}
