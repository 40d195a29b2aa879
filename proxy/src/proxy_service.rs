use crate::analytics::track_token_usage;
use crate::config::{Config, UpstreamConfig};
use crate::credentials::CredentialPool;
use crate::errors::ProxyError;
use crate::metrics_defs::{REPLICA_ROUTING, REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::target::{ReplicaHint, TargetRequest};
use bytes::Bytes;
use http::header::{
    ACCEPT, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, HOST,
};
use http::uri::Scheme;
use http::{HeaderMap, HeaderName, HeaderValue};
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Body, Incoming};
use hyper::service::Service as HyperService;
use hyper::{Request, Response};
use replica_resolver::ReplicaResolver;
use shared::http::{add_via_header, filter_hop_by_hop, make_boxed_error_response};
use shared::{counter, gauge, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

#[derive(Clone)]
pub struct ProxyService {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    client: reqwest::Client,
    upstream: UpstreamConfig,
    credentials: CredentialPool,
    resolver: Option<ReplicaResolver>,
}

impl ProxyService {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Self::with_client(config, client)
    }

    pub fn with_client(config: &Config, client: reqwest::Client) -> Result<Self, ProxyError> {
        let resolver = match config.replica_resolution.enabled {
            true => Some(ReplicaResolver::new(config.replica_resolution.clone())?),
            false => None,
        };

        Ok(ProxyService {
            inner: Arc::new(ProxyInner {
                client,
                upstream: config.upstream.clone(),
                credentials: CredentialPool::new(config.credentials.clone()),
                resolver,
            }),
        })
    }

    async fn replica_for(&self, target: &TargetRequest) -> Option<String> {
        let (source, replica) = match (&target.replica, &self.inner.resolver) {
            (ReplicaHint::Explicit(replica), _) => ("explicit", replica.clone()),
            (ReplicaHint::Resolve, Some(resolver)) => {
                match resolver.resolve_replica(&target.user, &target.repo).await {
                    Some(replica) => ("resolved", Some(replica)),
                    None => ("none", None),
                }
            }
            (ReplicaHint::Resolve, None) => ("none", None),
        };

        counter!(REPLICA_ROUTING, "source" => source).increment(1);
        replica
    }

    pub async fn forward<B>(
        &self,
        req: Request<B>,
    ) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let target = TargetRequest::parse(req.uri(), &self.inner.upstream)?;
        let replica = self.replica_for(&target).await;
        let url = target.url(replica.as_deref())?;

        let (parts, body) = req.into_parts();

        let forwarded_proto = match parts.headers.get(&X_FORWARDED_PROTO) {
            Some(proto) => proto.clone(),
            None if parts.uri.scheme() == Some(&Scheme::HTTPS) => HeaderValue::from_static("https"),
            None => HeaderValue::from_static("http"),
        };
        let accept = parts
            .headers
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let token = self.inner.credentials.select(&parts.headers);

        let mut headers = parts.headers;
        filter_hop_by_hop(&mut headers, parts.version);
        add_via_header(&mut headers, parts.version);

        let host = HeaderValue::from_str(&target.host)?;
        headers.insert(HOST, host.clone());
        headers.insert(X_FORWARDED_HOST, host);
        headers.insert(X_FORWARDED_PROTO, forwarded_proto);
        if let Some(token) = token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))?,
            );
        }

        tracing::debug!(
            method = %parts.method,
            %url,
            replica = replica.as_deref().unwrap_or("<none>"),
            "forwarding request"
        );

        let mut request = self.inner.client.request(parts.method, url.clone()).headers(headers);
        if !body.is_end_stream() {
            request = request.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let response = tokio::time::timeout(self.inner.upstream.timeout(), request.send())
            .await
            .map_err(|_| ProxyError::UpstreamTimeout)??;

        if let Some(token) = token {
            track_token_usage(token, &target.host, url.as_str(), accept.as_deref());
        }

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(%url, %status, "upstream returned an error status");
            return Ok(make_boxed_error_response(status));
        }

        relay_response(response)
    }
}

fn relay_response(
    response: reqwest::Response,
) -> Result<Response<BoxBody<Bytes, ProxyError>>, ProxyError> {
    let status = response.status();
    let version = response.version();

    let mut headers = response.headers().clone();
    filter_hop_by_hop(&mut headers, version);
    add_via_header(&mut headers, version);
    add_cors_headers(&mut headers);

    let body = reqwest::Body::from(response)
        .map_err(ProxyError::from)
        .boxed();

    let mut relayed = Response::new(body);
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    Ok(relayed)
}

fn add_cors_headers(headers: &mut HeaderMap) {
    let any = HeaderValue::from_static("*");
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, any.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_METHODS, any.clone());
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, any);
}

/// Counts a request in `REQUESTS_INFLIGHT` until dropped, including when the
/// connection goes away mid-request.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

impl HyperService<Request<Incoming>> for ProxyService {
    type Response = Response<BoxBody<Bytes, ProxyError>>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();

        Box::pin(async move {
            let start = Instant::now();
            let inflight = InflightGuard::new();

            let response = match service.forward(req).await {
                Ok(response) => response,
                Err(err) => {
                    match err.status_code().is_server_error() {
                        true => tracing::warn!(error = %err, "request failed"),
                        false => tracing::debug!(error = %err, "rejected request"),
                    }
                    err.into_response()
                }
            };

            drop(inflight);
            histogram!(REQUEST_DURATION, "status" => response.status().as_str().to_string())
                .record(start.elapsed().as_secs_f64());

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Listener;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use std::net::SocketAddr;
    use wiremock::matchers::{body_string, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HOST: &str = "alice-chat.spaces.test";

    struct Harness {
        server: MockServer,
        service: ProxyService,
    }

    async fn harness(credentials: Vec<String>, resolution: bool) -> Harness {
        let server = MockServer::start().await;
        let addr: SocketAddr = *server.address();

        let replica_resolution = replica_resolver::Config {
            enabled: resolution,
            discovery_url: format!("{}/v1/{{user}}/{{repo}}/live-metrics/sse", server.uri()),
            timeout_secs: 2,
            ..Default::default()
        };

        let config = Config {
            listener: Listener {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            admin_listener: Listener {
                host: "127.0.0.1".into(),
                port: 8081,
            },
            upstream: UpstreamConfig {
                domain: format!("spaces.test:{}", addr.port()),
                scheme: crate::config::Scheme::Http,
                timeout_secs: 2,
            },
            credentials,
            replica_resolution,
        };

        let client = reqwest::Client::builder()
            .resolve(HOST, addr)
            .resolve("bob-chat.spaces.test", addr)
            .build()
            .unwrap();
        let service = ProxyService::with_client(&config, client).unwrap();

        Harness { server, service }
    }

    fn request(uri: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(uri)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_of(response: Response<BoxBody<Bytes, ProxyError>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn mount_discovery(server: &MockServer, user: &str, repo: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/{user}/{repo}/live-metrics/sse")))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_bad_path_is_rejected() {
        let h = harness(vec![], false).await;

        let err = h.service.forward(request("/alice")).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_of(response).await,
            "Invalid URL path. Expected a space name."
        );
    }

    #[tokio::test]
    async fn test_forwards_to_resolved_replica() {
        let h = harness(vec!["hf_pooled".into()], true).await;
        mount_discovery(
            &h.server,
            "alice",
            "chat",
            "event: metric\ndata: {\"replica\":\"r1\"}\n\n",
        )
        .await;

        Mock::given(method("GET"))
            .and(path("/--replicas/r1/api/predict"))
            .and(query_param("fn", "1"))
            .and(header("authorization", "Bearer hf_pooled"))
            .and(header("x-forwarded-host", format!("{HOST}:{}", h.server.address().port())))
            .and(header("x-forwarded-proto", "http"))
            .and(header_exists("via"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("{\"ok\":true}", "application/json"),
            )
            .expect(2)
            .mount(&h.server)
            .await;

        for _ in 0..2 {
            let response = h
                .service
                .forward(request("/alice/chat/api/predict?fn=1"))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
            assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_METHODS], "*");
            assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_HEADERS], "*");
            assert_eq!(response.headers()["content-type"], "application/json");
            assert_eq!(body_of(response).await, "{\"ok\":true}");
        }
    }

    #[tokio::test]
    async fn test_resolution_failure_uses_default_route() {
        let h = harness(vec![], true).await;
        Mock::given(method("GET"))
            .and(path("/v1/alice/chat/live-metrics/sse"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/predict"))
            .respond_with(ResponseTemplate::new(200).set_body_string("default"))
            .expect(1)
            .mount(&h.server)
            .await;

        let response = h
            .service
            .forward(request("/alice/chat/api/predict"))
            .await
            .unwrap();
        assert_eq!(body_of(response).await, "default");
    }

    #[tokio::test]
    async fn test_explicit_replica_skips_resolution() {
        let h = harness(vec![], true).await;
        Mock::given(method("GET"))
            .and(path("/v1/alice/chat/live-metrics/sse"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&h.server)
            .await;
        Mock::given(method("GET"))
            .and(path("/--replicas/r9/queue/join"))
            .respond_with(ResponseTemplate::new(200).set_body_string("pinned"))
            .expect(1)
            .mount(&h.server)
            .await;

        let response = h
            .service
            .forward(request("/alice/chat/--replicas/r9/queue/join"))
            .await
            .unwrap();
        assert_eq!(body_of(response).await, "pinned");
    }

    #[tokio::test]
    async fn test_caller_credential_and_body_pass_through() {
        let h = harness(vec!["hf_pooled".into()], false).await;
        Mock::given(method("POST"))
            .and(path("/run"))
            .and(header("authorization", "Bearer caller"))
            .and(header("x-forwarded-proto", "https"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(201).set_body_string("created"))
            .expect(1)
            .mount(&h.server)
            .await;

        let req = Request::builder()
            .method(Method::POST)
            .uri("/bob/chat/run")
            .header(AUTHORIZATION, "Bearer caller")
            .header(X_FORWARDED_PROTO, "https")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();

        let response = h.service.forward(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_of(response).await, "created");
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let h = harness(vec![], false).await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("upstream details"))
            .mount(&h.server)
            .await;

        let response = h
            .service
            .forward(request("/alice/chat/missing"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
        assert_eq!(body_of(response).await, "Not Found");
    }

    #[tokio::test]
    async fn test_unreachable_upstream() {
        let h = harness(vec![], false).await;
        let mut config_upstream = h.service.inner.upstream.clone();
        config_upstream.domain = "spaces.test:1".into();

        let client = reqwest::Client::builder()
            .resolve(HOST, "127.0.0.1:1".parse().unwrap())
            .build()
            .unwrap();
        let service = ProxyService {
            inner: Arc::new(ProxyInner {
                client,
                upstream: config_upstream,
                credentials: CredentialPool::default(),
                resolver: None,
            }),
        };

        let err = service.forward(request("/alice/chat/x")).await.unwrap_err();
        assert!(matches!(err, ProxyError::Upstream(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_upstream_timeout() {
        let h = harness(vec![], false).await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(5)))
            .mount(&h.server)
            .await;

        let err = h
            .service
            .forward(request("/alice/chat/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamTimeout));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[derive(Default)]
    struct GaugeRecorder {
        gauge: Arc<std::sync::atomic::AtomicU64>,
    }

    impl GaugeRecorder {
        fn value(&self) -> f64 {
            f64::from_bits(self.gauge.load(std::sync::atomic::Ordering::Acquire))
        }
    }

    impl metrics::Recorder for GaugeRecorder {
        fn describe_counter(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }
        fn describe_gauge(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }
        fn describe_histogram(
            &self,
            _: metrics::KeyName,
            _: Option<metrics::Unit>,
            _: metrics::SharedString,
        ) {
        }

        fn register_counter(
            &self,
            _: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Counter {
            metrics::Counter::noop()
        }

        fn register_gauge(&self, _: &metrics::Key, _: &metrics::Metadata<'_>) -> metrics::Gauge {
            metrics::Gauge::from_arc(self.gauge.clone())
        }

        fn register_histogram(
            &self,
            _: &metrics::Key,
            _: &metrics::Metadata<'_>,
        ) -> metrics::Histogram {
            metrics::Histogram::noop()
        }
    }

    #[test]
    fn test_inflight_released_when_request_is_abandoned() {
        let recorder = GaugeRecorder::default();

        metrics::with_local_recorder(&recorder, || {
            let guard = InflightGuard::new();
            assert_eq!(recorder.value(), 1.0);
            drop(guard);
            assert_eq!(recorder.value(), 0.0);

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            runtime.block_on(async {
                let abandoned = async {
                    let _inflight = InflightGuard::new();
                    std::future::pending::<()>().await
                };
                let result =
                    tokio::time::timeout(std::time::Duration::from_millis(10), abandoned).await;
                assert!(result.is_err());
            });

            assert_eq!(recorder.value(), 0.0);
        });
    }
}
