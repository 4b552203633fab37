use crate::render::Value;
use discovery::record::{ConfigurationRecord, DestinationId};
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;

pub const CODE_HEADER: &str = "x-code";
pub const ORIGINAL_URI_HEADER: &str = "x-original-uri";
pub const NAMESPACE_HEADER: &str = "x-namespace";
pub const INGRESS_NAME_HEADER: &str = "x-ingress-name";
pub const SERVICE_NAME_HEADER: &str = "x-service-name";
pub const SERVICE_PORT_HEADER: &str = "x-service-port";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything a template or the introspection endpoint can see about one
/// request.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PageContext {
    pub code: String,
    pub title: String,
    pub details: Details,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Details {
    #[serde(rename = "originalURI")]
    pub original_uri: String,
    pub content_type: String,
    pub namespace: String,
    pub ingress_name: String,
    pub service_name: String,
    #[serde(rename = "deployName")]
    pub deployment_name: String,
    pub desired_deployment_replicas: i32,
    pub current_deployment_replicas: i32,
    pub service_port: String,
    pub request_id: String,
    pub custom_error_template: String,
    pub custom_json_response: BTreeMap<String, String>,
    pub custom_fields: BTreeMap<String, String>,
}

pub(crate) fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

impl PageContext {
    /// Destination the request was originally sent to.
    pub fn destination(headers: &HeaderMap) -> DestinationId {
        DestinationId::new(
            header(headers, SERVICE_NAME_HEADER),
            header(headers, NAMESPACE_HEADER),
        )
    }

    /// Builds the context from the proxy headers. A missing record leaves
    /// every configured field at its default.
    pub fn new(headers: &HeaderMap, record: Option<&ConfigurationRecord>) -> Self {
        let code = header(headers, CODE_HEADER);
        let title = code
            .parse::<u16>()
            .ok()
            .and_then(|n| StatusCode::from_u16(n).ok())
            .and_then(|status| status.canonical_reason())
            .unwrap_or_default();

        let mut details = Details {
            original_uri: header(headers, ORIGINAL_URI_HEADER).to_string(),
            content_type: header(headers, http::header::CONTENT_TYPE.as_str()).to_string(),
            namespace: header(headers, NAMESPACE_HEADER).to_string(),
            ingress_name: header(headers, INGRESS_NAME_HEADER).to_string(),
            service_name: header(headers, SERVICE_NAME_HEADER).to_string(),
            service_port: header(headers, SERVICE_PORT_HEADER).to_string(),
            request_id: header(headers, REQUEST_ID_HEADER).to_string(),
            ..Default::default()
        };

        if let Some(record) = record {
            details.deployment_name = record.deployment.clone();
            details.desired_deployment_replicas = record.desired_replicas;
            details.current_deployment_replicas = record.current_replicas;
            details.custom_error_template = record.template.clone();
            details.custom_json_response = record.json_responses.clone();
            details.custom_fields = record.custom_fields.clone();
        }

        PageContext {
            code: code.to_string(),
            title: title.to_string(),
            details,
        }
    }

    /// Looks up a dotted field path such as `["Details", "ServiceName"]` or
    /// `["Details", "CustomFields", "team"]`. Unknown paths yield `None`,
    /// missing map keys an empty string.
    pub fn field(&self, path: &[&str]) -> Option<Value> {
        let d = &self.details;
        let text = |s: &String| Some(Value::Str(s.clone()));
        match path {
            ["Code"] => text(&self.code),
            ["Title"] => text(&self.title),
            ["Details", "OriginalURI"] => text(&d.original_uri),
            ["Details", "ContentType"] => text(&d.content_type),
            ["Details", "Namespace"] => text(&d.namespace),
            ["Details", "IngressName"] => text(&d.ingress_name),
            ["Details", "ServiceName"] => text(&d.service_name),
            ["Details", "DeploymentName"] => text(&d.deployment_name),
            ["Details", "DesiredDeploymentReplicas"] => {
                Some(Value::Int(d.desired_deployment_replicas.into()))
            }
            ["Details", "CurrentDeploymentReplicas"] => {
                Some(Value::Int(d.current_deployment_replicas.into()))
            }
            ["Details", "ServicePort"] => text(&d.service_port),
            ["Details", "RequestID"] => text(&d.request_id),
            ["Details", "CustomErrorTemplate"] => text(&d.custom_error_template),
            ["Details", "CustomFields", rest @ ..] => map_field(&d.custom_fields, rest),
            ["Details", "CustomJsonResponse", rest @ ..] => map_field(&d.custom_json_response, rest),
            _ => None,
        }
    }
}

fn map_field(map: &BTreeMap<String, String>, rest: &[&str]) -> Option<Value> {
    match rest {
        [] => Some(Value::Map(map.clone())),
        [key] => Some(Value::Str(map.get(*key).cloned().unwrap_or_default())),
        _ => None,
    }
}
