use crate::RendererError;
use crate::config::Config;
use crate::context::{CODE_HEADER, ORIGINAL_URI_HEADER, PageContext, header};
use crate::metrics_defs::{RENDER_DURATION, REQUESTS};
use crate::render::{Stylesheet, render};
use crate::resolver::TemplateResolver;
use crate::statics::{FAVICON, STATICS_MARKER, StaticFiles};
use bytes::Bytes;
use discovery::record::ConfigurationRecord;
use discovery::store::ConfigStore;
use http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use http::request::Parts;
use http::{HeaderName, HeaderValue};
use http_body_util::combinators::BoxBody;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::http::{empty_response, full_body};
use shared::{counter, histogram};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

pub const HEALTH_PATH: &str = "/healthz";
pub const INTROSPECTION_MARKER: &str = "cniep-svc-info";
const RESPONSE_MARKER_HEADER: HeaderName = HeaderName::from_static("cniep-response");
const JSON: &str = "application/json";
const HTML: &str = "text/html";

type HandlerResponse = Response<BoxBody<Bytes, RendererError>>;

/// Answers the requests an ingress forwards when an upstream fails.
#[derive(Clone)]
pub struct ErrorPageService {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<ConfigStore>,
    resolver: TemplateResolver,
    statics: StaticFiles,
}

impl ErrorPageService {
    pub fn new(config: &Config, template_root: PathBuf, store: Arc<ConfigStore>) -> Self {
        ErrorPageService {
            inner: Arc::new(Inner {
                store,
                resolver: TemplateResolver::new(template_root),
                statics: StaticFiles::new(config.static_dir.clone()),
            }),
        }
    }
}

impl<B> Service<Request<B>> for ErrorPageService {
    type Response = HandlerResponse;
    type Error = RendererError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let inner = self.inner.clone();
        let (parts, _body) = req.into_parts();

        Box::pin(async move {
            inner.handle(&parts).await.inspect_err(|e| {
                counter!(REQUESTS, "outcome" => "aborted").increment(1);
                tracing::error!(
                    uri = %parts.uri,
                    error = %e,
                    "Aborting error page response"
                );
            })
        })
    }
}

impl Inner {
    async fn handle(&self, parts: &Parts) -> Result<HandlerResponse, RendererError> {
        if parts.uri.path() == HEALTH_PATH {
            return Ok(empty_response(StatusCode::OK));
        }

        let headers = &parts.headers;
        let original_uri = header(headers, ORIGINAL_URI_HEADER);

        if original_uri.ends_with(FAVICON) {
            counter!(REQUESTS, "outcome" => "static").increment(1);
            return Ok(self.statics.serve(FAVICON).await);
        }
        if let Some((_, relative)) = original_uri.split_once(STATICS_MARKER) {
            counter!(REQUESTS, "outcome" => "static").increment(1);
            return Ok(self.statics.serve(relative).await);
        }

        let Some(code) = parse_code(header(headers, CODE_HEADER)) else {
            counter!(REQUESTS, "outcome" => "probe").increment(1);
            return Ok(empty_response(StatusCode::OK));
        };

        let record = self.store.lookup(&PageContext::destination(headers));

        if let Some((status, body)) = record.as_deref().and_then(|r| json_override(r, code)) {
            counter!(REQUESTS, "outcome" => "json").increment(1);
            return Ok(json_response(status, body.to_string()));
        }

        let context = PageContext::new(headers, record.as_deref());

        let request_uri = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_default();
        if original_uri.contains(INTROSPECTION_MARKER) || request_uri.contains(INTROSPECTION_MARKER) {
            counter!(REQUESTS, "outcome" => "introspection").increment(1);
            let mut response = json_response(StatusCode::OK, serde_json::to_vec(&context)?);
            let headers = response.headers_mut();
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
            headers.insert(RESPONSE_MARKER_HEADER, HeaderValue::from_static("true"));
            return Ok(response);
        }

        let start = Instant::now();
        let location = self
            .resolver
            .locate(&context.details.custom_error_template, code)
            .await?;
        let html = read_asset(&location.html).await?;
        let css = read_asset(&location.css).await?;

        let stylesheet = Stylesheet {
            name: location
                .css
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default(),
            contents: &css,
        };
        let page = render(&html, &stylesheet, &context)?;
        histogram!(RENDER_DURATION).record(start.elapsed().as_secs_f64());
        counter!(REQUESTS, "outcome" => "html").increment(1);

        let mut response = Response::new(full_body(page));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(HTML));
        Ok(response)
    }
}

/// Anything but a positive integer is treated like a missing code.
fn parse_code(code: &str) -> Option<u32> {
    code.parse::<u32>().ok().filter(|&n| n > 0)
}

/// Overrides only apply to codes that fit in a status line.
fn json_override(record: &ConfigurationRecord, code: u32) -> Option<(StatusCode, &str)> {
    let status = u16::try_from(code)
        .ok()
        .and_then(|n| StatusCode::from_u16(n).ok())?;
    let body = record
        .json_response(&code.to_string())
        .or_else(|| record.global_json_response())?;
    Some((status, body))
}

fn json_response(status: StatusCode, body: impl Into<Bytes>) -> HandlerResponse {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    response
}

async fn read_asset(path: &Path) -> Result<String, RendererError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RendererError::Asset {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::TemplateError;
    use crate::resolver::ResolveError;
    use discovery::record::DestinationId;
    use discovery::store::Snapshot;
    use http_body_util::BodyExt;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        templates: TempDir,
        statics: TempDir,
        service: ErrorPageService,
    }

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fixture() -> Fixture {
        let templates = tempfile::tempdir().unwrap();
        let statics = tempfile::tempdir().unwrap();

        write(
            templates.path(),
            "default/index.html",
            r#"<style>{{ template "style.css" . }}</style><h1>{{ .Code }} {{ .Title }}</h1>"#,
        );
        write(templates.path(), "default/style.css", "body{}");
        write(
            templates.path(),
            "checkout/index-503.html",
            "<h1>{{ .Details.ServiceName }} has {{ .Details.CurrentDeploymentReplicas }}/{{ .Details.DesiredDeploymentReplicas }} ready, ask {{ .Details.CustomFields.team }}</h1>",
        );
        write(statics.path(), "favicon.ico", "icon");
        write(statics.path(), "img/logo.svg", "<svg/>");

        let checkout = ConfigurationRecord {
            template: "checkout".into(),
            deployment: "checkout-api".into(),
            desired_replicas: 3,
            current_replicas: 1,
            custom_fields: BTreeMap::from([("team".into(), "payments".into())]),
            json_responses: BTreeMap::from([
                ("502".into(), r#"{"error":"bad gateway"}"#.into()),
                ("504".into(), "".into()),
            ]),
            ..Default::default()
        };
        let api = ConfigurationRecord {
            template: "checkout".into(),
            json_responses: BTreeMap::from([("global".into(), r#"{"error":"api"}"#.into())]),
            ..Default::default()
        };
        let store = Arc::new(ConfigStore::from_snapshot(Snapshot::from_iter([
            (DestinationId::new("checkout", "shop"), checkout),
            (DestinationId::new("api", "shop"), api),
        ])));

        let config = Config {
            static_dir: statics.path().to_path_buf(),
        };
        let service = ErrorPageService::new(&config, templates.path().to_path_buf(), store);

        Fixture {
            templates,
            statics,
            service,
        }
    }

    fn request(uri: &str, headers: &[(&'static str, &'static str)]) -> Request<()> {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap()
    }

    async fn body_of(response: HandlerResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_healthz() {
        let f = fixture();
        let response = f.service.call(request("/healthz", &[])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_of(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_static_assets() {
        let f = fixture();

        let response = f
            .service
            .call(request("/", &[("x-original-uri", "/shop/favicon.ico"), ("x-code", "404")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "icon");

        let response = f
            .service
            .call(request("/", &[("x-original-uri", "/cniep-statics/img/logo.svg")]))
            .await
            .unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "image/svg+xml");
        assert_eq!(body_of(response).await, "<svg/>");

        let response = f
            .service
            .call(request("/", &[("x-original-uri", "/cniep-statics/missing.png")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        fs::remove_file(f.statics.path().join("favicon.ico")).unwrap();
        let response = f
            .service
            .call(request("/", &[("x-original-uri", "/favicon.ico")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_code_is_empty_ok() {
        let f = fixture();
        for code in ["abc", "", "0", "-1", "5.0", "99999999999"] {
            let response = f
                .service
                .call(request("/", &[("x-code", code)]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "code {code:?}");
            assert!(body_of(response).await.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unusual_codes_still_render() {
        let f = fixture();
        for (code, title) in [("42", ""), ("1000", ""), ("599", "")] {
            let response = f
                .service
                .call(request("/", &[("x-code", code)]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[CONTENT_TYPE], HTML);
            assert_eq!(
                body_of(response).await,
                format!("<style>body{{}}</style><h1>{code} {title}</h1>")
            );
        }

        // A code that cannot be a status line skips the global override
        let response = f
            .service
            .call(request(
                "/",
                &[("x-service-name", "api"), ("x-namespace", "shop"), ("x-code", "1000")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], HTML);
    }

    #[tokio::test]
    async fn test_json_overrides() {
        let f = fixture();
        let checkout = [("x-service-name", "checkout"), ("x-namespace", "shop")];

        let response = f
            .service
            .call(request("/", &[checkout[0], checkout[1], ("x-code", "502")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON);
        assert_eq!(body_of(response).await, r#"{"error":"bad gateway"}"#);

        // Empty override bodies count as unset
        let response = f
            .service
            .call(request("/", &[checkout[0], checkout[1], ("x-code", "504")]))
            .await
            .unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], HTML);

        let response = f
            .service
            .call(request(
                "/",
                &[("x-service-name", "api"), ("x-namespace", "shop"), ("x-code", "503")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_of(response).await, r#"{"error":"api"}"#);
    }

    #[tokio::test]
    async fn test_introspection() {
        let f = fixture();
        let response = f
            .service
            .call(request(
                "/?cniep-svc-info",
                &[
                    ("x-service-name", "checkout"),
                    ("x-namespace", "shop"),
                    ("x-code", "503"),
                    ("x-service-port", "8080"),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(response.headers()["cniep-response"], "true");

        let json: serde_json::Value = serde_json::from_str(&body_of(response).await).unwrap();
        assert_eq!(json["code"], "503");
        assert_eq!(json["details"]["deployName"], "checkout-api");
        assert_eq!(json["details"]["servicePort"], "8080");
        assert_eq!(json["details"]["customFields"]["team"], "payments");
    }

    #[tokio::test]
    async fn test_renders_resolved_template() {
        let f = fixture();

        let response = f
            .service
            .call(request(
                "/",
                &[("x-service-name", "checkout"), ("x-namespace", "shop"), ("x-code", "503")],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], HTML);
        assert_eq!(
            body_of(response).await,
            "<h1>checkout has 1/3 ready, ask payments</h1>"
        );

        // Unknown destination falls back to the default set
        let response = f
            .service
            .call(request(
                "/",
                &[("x-service-name", "other"), ("x-namespace", "shop"), ("x-code", "500")],
            ))
            .await
            .unwrap();
        assert_eq!(
            body_of(response).await,
            "<style>body{}</style><h1>500 Internal Server Error</h1>"
        );
    }

    #[tokio::test]
    async fn test_branching_template() {
        let f = fixture();
        write(
            f.templates.path(),
            "checkout/index.html",
            "{{ if eq .Details.CurrentDeploymentReplicas 0 }}down{{ else }}{{ .Details.CurrentDeploymentReplicas }} of {{ .Details.DesiredDeploymentReplicas }} up{{ end }}",
        );

        let response = f
            .service
            .call(request(
                "/",
                &[("x-service-name", "checkout"), ("x-namespace", "shop"), ("x-code", "500")],
            ))
            .await
            .unwrap();
        assert_eq!(body_of(response).await, "1 of 3 up");
    }

    #[tokio::test]
    async fn test_broken_template_aborts_response() {
        let f = fixture();
        write(f.templates.path(), "default/index.html", "{{ if .Code }}open");

        let result = f.service.call(request("/", &[("x-code", "500")])).await;
        assert!(matches!(
            result,
            Err(RendererError::Template(TemplateError::Unclosed("if")))
        ));
    }

    #[tokio::test]
    async fn test_missing_templates_abort_response() {
        let f = fixture();
        fs::remove_file(f.templates.path().join("default/style.css")).unwrap();

        let result = f.service.call(request("/", &[("x-code", "500")])).await;
        assert!(matches!(
            result,
            Err(RendererError::Resolve(ResolveError { .. }))
        ));
    }
}
