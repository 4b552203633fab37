//! Parsing of service annotations into configuration records.
//!
//! Recognized keys, all under the `cniep` namespace:
//!
//! - `cniep/template`: template-set name
//! - `cniep/deployment`: backing deployment name
//! - `cniep/s3-templatedir`: `s3://bucket/prefix/` holding template bundles
//! - `cniep/customjsonresponse-<code>`: raw JSON body returned for `<code>`
//!   (`global` applies to every code)
//! - `cniep/customfield-<name>`: free-form value exposed to templates

use crate::record::ConfigurationRecord;
use std::collections::BTreeMap;

pub const ANNOTATION_NAMESPACE: &str = "cniep";

const TEMPLATE_KEY: &str = "cniep/template";
const DEPLOYMENT_KEY: &str = "cniep/deployment";
const TEMPLATE_SOURCE_KEY: &str = "cniep/s3-templatedir";
const JSON_RESPONSE_PREFIX: &str = "cniep/customjsonresponse-";
const CUSTOM_FIELD_PREFIX: &str = "cniep/customfield-";

/// Selector labels used to infer the deployment, in priority order.
const WORKLOAD_SELECTOR_KEYS: &[&str] = &["app", "app.kubernetes.io/name"];

pub const UNKNOWN_WORKLOAD: &str = "unknown";

/// Whether any annotation belongs to the recognized namespace.
pub fn is_recognized(annotations: &BTreeMap<String, String>) -> bool {
    annotations
        .keys()
        .any(|key| key.starts_with(ANNOTATION_NAMESPACE))
}

/// Builds a record from annotations and the service selector. Replica counts
/// are left at zero; the scanner fills them in.
pub fn parse(
    annotations: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
) -> ConfigurationRecord {
    let mut record = ConfigurationRecord {
        annotations: annotations.clone(),
        ..Default::default()
    };

    for (key, value) in annotations {
        match key.as_str() {
            TEMPLATE_SOURCE_KEY => record.template_source = Some(value.clone()),
            DEPLOYMENT_KEY => record.deployment = value.clone(),
            TEMPLATE_KEY => record.template = value.clone(),
            _ => {
                if let Some(code) = non_empty_suffix(key, JSON_RESPONSE_PREFIX) {
                    record
                        .json_responses
                        .insert(code.to_string(), value.clone());
                } else if let Some(field) = non_empty_suffix(key, CUSTOM_FIELD_PREFIX) {
                    record
                        .custom_fields
                        .insert(field.to_string(), value.clone());
                }
            }
        }
    }

    if record.deployment.is_empty() {
        record.deployment = infer_workload(selector);
    }

    record
}

fn non_empty_suffix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix).filter(|suffix| !suffix.is_empty())
}

fn infer_workload(selector: &BTreeMap<String, String>) -> String {
    WORKLOAD_SELECTOR_KEYS
        .iter()
        .find_map(|key| selector.get(*key))
        .cloned()
        .unwrap_or_else(|| UNKNOWN_WORKLOAD.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_is_recognized() {
        assert!(is_recognized(&map(&[("cniep/template", "checkout")])));
        assert!(is_recognized(&map(&[
            ("kubectl.kubernetes.io/last-applied-configuration", "{}"),
            ("cniep/customfield-team", "payments"),
        ])));
        assert!(!is_recognized(&map(&[("prometheus.io/scrape", "true")])));
        assert!(!is_recognized(&BTreeMap::new()));
    }

    #[test]
    fn test_parse_all_keys() {
        let annotations = map(&[
            ("cniep/template", "checkout"),
            ("cniep/deployment", "checkout-api"),
            ("cniep/s3-templatedir", "s3://bucket/templates/"),
            ("cniep/customjsonresponse-503", r#"{"error":"down"}"#),
            ("cniep/customjsonresponse-global", r#"{"error":"any"}"#),
            ("cniep/customfield-team", "payments"),
            ("cniep/customfield-", "ignored"),
            ("other/annotation", "kept raw"),
        ]);

        let record = parse(&annotations, &map(&[("app", "from-selector")]));

        assert_eq!(record.template, "checkout");
        assert_eq!(record.deployment, "checkout-api");
        assert_eq!(
            record.template_source.as_deref(),
            Some("s3://bucket/templates/")
        );
        assert_eq!(
            record.json_responses,
            map(&[
                ("503", r#"{"error":"down"}"#),
                ("global", r#"{"error":"any"}"#)
            ])
        );
        assert_eq!(record.custom_fields, map(&[("team", "payments")]));
        assert_eq!(record.annotations, annotations);
        assert_eq!(record.desired_replicas, 0);
        assert_eq!(record.current_replicas, 0);
    }

    #[test]
    fn test_workload_inference() {
        let annotations = map(&[("cniep/template", "checkout")]);

        let record = parse(
            &annotations,
            &map(&[("app.kubernetes.io/name", "named"), ("app", "app-label")]),
        );
        assert_eq!(record.deployment, "app-label");

        let record = parse(&annotations, &map(&[("app.kubernetes.io/name", "named")]));
        assert_eq!(record.deployment, "named");

        let record = parse(&annotations, &map(&[("tier", "web")]));
        assert_eq!(record.deployment, UNKNOWN_WORKLOAD);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let annotations = map(&[
            ("cniep/template", "checkout"),
            ("cniep/customfield-a", "1"),
            ("cniep/customfield-b", "2"),
        ]);
        let selector = map(&[("app", "checkout")]);
        assert_eq!(parse(&annotations, &selector), parse(&annotations, &selector));
    }
}
