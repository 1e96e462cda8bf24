//! Wire types shared by the REST surface and the remote client.
//!
//! Every type here serializes to the JSON shapes served under the REST
//! path. Named errors travel as two-element arrays (`[name, traceback]`),
//! so [`ErrorEntry`] is a tuple struct.
//!
//! | Endpoint | Response type |
//! |----------|---------------|
//! | `get_methods/<fullname>` | [`MethodsInfo`] |
//! | `start_batch/<fullname>` | [`StartBatchResponse`] |
//! | `batch_info/<batch_id>` | [`BatchInfo`] |
//! | `batch_results/<batch_id>` | `Vec<`[`UnitResult`]`>` |
//! | `object_type/<fullname>` | [`ObjectTypeInfo`] |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A `(name, detail)` pair, serialized as `[name, detail]`.
///
/// Used for load errors (`name` is the object that failed to load) and for
/// test errors and failures (`name` is the method fullname, `detail` the
/// traceback text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorEntry(pub String, pub String);

impl ErrorEntry {
    pub fn new(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self(name.into(), detail.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn detail(&self) -> &str {
        &self.1
    }
}

/// Result of running one unit, as stored and as served by `batch_results`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitResult {
    /// Fullname of the unit that was run.
    pub fullname: String,
    /// Unexpected errors, keyed by method fullname.
    pub errors: Vec<ErrorEntry>,
    /// Assertion failures, keyed by method fullname.
    pub failures: Vec<ErrorEntry>,
    /// Output captured while the unit ran.
    pub output: String,
    /// Objects that could not be loaded while building the unit.
    pub load_errors: Vec<ErrorEntry>,
}

/// Batch metadata served by `batch_info`.
///
/// `num_units` is `None` while the batch is still being discovered, which
/// is distinct from a discovered batch with zero units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub num_units: Option<usize>,
    #[serde(default)]
    pub test_unit_methods: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub load_errors: Vec<ErrorEntry>,
}

/// Response of `start_batch`.
///
/// The immediate variant carries every result; the deferred variant only
/// carries the id to poll with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartBatchResponse {
    Immediate {
        batch_info: BatchInfo,
        results: Vec<UnitResult>,
    },
    Deferred {
        batch_id: String,
    },
}

/// Response of `get_methods`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodsInfo {
    pub method_names: Vec<String>,
    pub load_errors: Vec<ErrorEntry>,
}

/// Response of `object_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectTypeInfo {
    pub object_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_entry_serializes_as_pair() {
        let entry = ErrorEntry::new("pkg.mod", "boom");
        assert_eq!(serde_json::to_string(&entry).unwrap(), r#"["pkg.mod","boom"]"#);
    }

    #[test]
    fn test_unit_result_preserves_order() {
        let json = r#"{
            "fullname": "pkg.test_a.Case",
            "errors": [["pkg.test_a.Case.test_2", "e2"], ["pkg.test_a.Case.test_1", "e1"]],
            "failures": [["pkg.test_a.Case.test_3", "f3"]],
            "output": "line one\nline two\n",
            "load_errors": []
        }"#;
        let result: UnitResult = serde_json::from_str(json).unwrap();
        assert_eq!(result.errors[0].name(), "pkg.test_a.Case.test_2");
        assert_eq!(result.errors[1].detail(), "e1");
        assert_eq!(result.output, "line one\nline two\n");

        let reparsed: UnitResult =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
        assert_eq!(reparsed, result);
    }

    #[test]
    fn test_start_batch_response_variants() {
        let deferred: StartBatchResponse =
            serde_json::from_str(r#"{"batch_id": "abc"}"#).unwrap();
        assert_eq!(
            deferred,
            StartBatchResponse::Deferred {
                batch_id: "abc".to_string()
            }
        );

        let immediate: StartBatchResponse = serde_json::from_str(
            r#"{"batch_info": {"num_units": 0, "test_unit_methods": {}, "load_errors": []},
                "results": []}"#,
        )
        .unwrap();
        match immediate {
            StartBatchResponse::Immediate {
                batch_info,
                results,
            } => {
                assert_eq!(batch_info.num_units, Some(0));
                assert!(results.is_empty());
            }
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_batch_info_unknown_units_is_null() {
        let info = BatchInfo::default();
        let value = serde_json::to_value(&info).unwrap();
        assert!(value["num_units"].is_null());
    }
}
