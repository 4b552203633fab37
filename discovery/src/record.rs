use std::collections::BTreeMap;
use std::fmt;

/// Key used for JSON overrides that apply to every status code.
pub const GLOBAL_JSON_RESPONSE: &str = "global";

/// Identifies a destination service by name and namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationId {
    pub name: String,
    pub namespace: String,
}

impl DestinationId {
    pub fn new<N, S>(name: N, namespace: S) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        DestinationId {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.namespace)
    }
}

/// Per-destination configuration derived from service annotations.
///
/// Ordered maps keep two records built from the same annotations equal,
/// which lets the snapshot builder reuse unchanged records across cycles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigurationRecord {
    pub annotations: BTreeMap<String, String>,
    pub template: String,
    pub deployment: String,
    pub template_source: Option<String>,
    pub json_responses: BTreeMap<String, String>,
    pub custom_fields: BTreeMap<String, String>,
    pub desired_replicas: i32,
    pub current_replicas: i32,
}

impl ConfigurationRecord {
    /// JSON override configured for exactly this status code. Empty bodies
    /// count as not configured.
    pub fn json_response(&self, code: &str) -> Option<&str> {
        self.json_responses
            .get(code)
            .map(String::as_str)
            .filter(|body| !body.is_empty())
    }

    pub fn global_json_response(&self) -> Option<&str> {
        self.json_response(GLOBAL_JSON_RESPONSE)
    }
}
