//! JSON-over-HTTP/1.1 platform client.
//!
//! - `PUT /v1/services/<name>/desired-state` with `x-shipwright-revision`
//! - `GET /v1/services/<name>/health` → `{healthy_replicas, desired_replicas}`

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use shipwright_core::{BoxFuture, DesiredStateDescriptor};
use shipwright_health::{HealthError, HealthReporter, HealthSnapshot};
use tracing::debug;

use crate::error::{PlatformError, PlatformResult};
use crate::platform::{Platform, Submission};

/// Header carrying the submitted revision.
pub const REVISION_HEADER: &str = "x-shipwright-revision";

const AGENT: &str = concat!("shipwright/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct HealthBody {
    healthy_replicas: u32,
    desired_replicas: u32,
}

/// Platform API client. Also serves as the fleet's health reporter.
pub struct HttpPlatform {
    address: String,
    token: Option<String>,
    timeout: Duration,
}

impl fmt::Debug for HttpPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPlatform")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpPlatform {
    pub fn new(address: &str, token: Option<String>, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            token,
            timeout,
        }
    }

    /// Token read from environment variable `var`, if set.
    pub fn from_env(address: &str, token_env: &str, timeout: Duration) -> Self {
        let token = std::env::var(token_env).ok().filter(|t| !t.is_empty());
        Self::new(address, token, timeout)
    }

    async fn send(
        &self,
        method: Method,
        target: &str,
        extra: Option<(&'static str, String)>,
        body: Bytes,
    ) -> PlatformResult<(StatusCode, Bytes)> {
        match tokio::time::timeout(self.timeout, self.send_inner(method.clone(), target, extra, body)).await {
            Ok(result) => result,
            Err(_) => Err(PlatformError::Timeout(format!(
                "{method} {target} exceeded {:?}",
                self.timeout
            ))),
        }
    }

    async fn send_inner(
        &self,
        method: Method,
        target: &str,
        extra: Option<(&'static str, String)>,
        body: Bytes,
    ) -> PlatformResult<(StatusCode, Bytes)> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| PlatformError::Network(format!("connect to {}: {e}", self.address)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| PlatformError::Network(format!("handshake with {}: {e}", self.address)))?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "platform connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(HOST, &self.address)
            .header(USER_AGENT, AGENT)
            .header(CONTENT_LENGTH, body.len());
        if !body.is_empty() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some((name, value)) = extra {
            builder = builder.header(name, value);
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|e| PlatformError::Malformed(format!("building {method} {target}: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| PlatformError::Network(format!("{method} {target}: {e}")))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| PlatformError::Network(format!("reading {method} {target}: {e}")))?
            .to_bytes();

        debug!(%method, %target, %status, "platform request");
        Ok((status, body))
    }

    async fn submit_descriptor(&self, descriptor: &DesiredStateDescriptor) -> PlatformResult<Submission> {
        let target = format!("/v1/services/{}/desired-state", descriptor.service_name);
        let body = serde_json::to_vec(descriptor)
            .map_err(|e| PlatformError::Rejected(format!("encoding descriptor: {e}")))?;

        let (status, reply) = self
            .send(
                Method::PUT,
                &target,
                Some((REVISION_HEADER, descriptor.revision.to_string())),
                Bytes::from(body),
            )
            .await?;

        match status {
            s if s.is_success() => Ok(Submission::Applied),
            StatusCode::CONFLICT => Ok(Submission::AlreadyApplied),
            s => Err(classify(s, &target, &reply)),
        }
    }

    async fn fetch_health(&self, service: &str) -> PlatformResult<HealthSnapshot> {
        let target = format!("/v1/services/{service}/health");
        let (status, reply) = self.send(Method::GET, &target, None, Bytes::new()).await?;
        if !status.is_success() {
            return Err(classify(status, &target, &reply));
        }
        let body: HealthBody = serde_json::from_slice(&reply)
            .map_err(|e| PlatformError::Malformed(format!("{target}: {e}")))?;
        Ok(HealthSnapshot::new(service, body.healthy_replicas, body.desired_replicas))
    }
}

/// Map a non-success status to a platform error.
fn classify(status: StatusCode, target: &str, body: &[u8]) -> PlatformError {
    let detail = String::from_utf8_lossy(body);
    let message = format!("{target}: {status} {}", detail.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PlatformError::Unauthorized(message),
        StatusCode::TOO_MANY_REQUESTS => PlatformError::Unavailable(message),
        s if s.is_server_error() => PlatformError::Unavailable(message),
        s if s.is_client_error() => PlatformError::Rejected(message),
        _ => PlatformError::Malformed(message),
    }
}

impl Platform for HttpPlatform {
    fn submit<'a>(&'a self, descriptor: &'a DesiredStateDescriptor) -> BoxFuture<'a, PlatformResult<Submission>> {
        Box::pin(self.submit_descriptor(descriptor))
    }
}

impl HealthReporter for HttpPlatform {
    fn snapshot<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<HealthSnapshot, HealthError>> {
        Box::pin(async move {
            self.fetch_health(service).await.map_err(|e| {
                if e.is_transient() {
                    HealthError::Unavailable(e.to_string())
                } else {
                    HealthError::Rejected(e.to_string())
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipwright_core::{ImageReference, NetworkPlacement, ResourceLimits};
    use std::collections::BTreeMap;
    use http::{HeaderMap, Response};
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// A request as the fake platform received it.
    #[derive(Debug)]
    struct Seen {
        method: Method,
        path: String,
        headers: HeaderMap,
        body: Bytes,
    }

    /// Serve scripted replies in order, one per request, and record requests.
    async fn serve(replies: Vec<(StatusCode, &'static str)>) -> (String, Arc<Mutex<Vec<Seen>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let replies = replies.clone();
                let log = log.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let replies = replies.clone();
                        let log = log.clone();
                        async move {
                            let (parts, body) = req.into_parts();
                            let body = body.collect().await?.to_bytes();
                            log.lock().unwrap().push(Seen {
                                method: parts.method,
                                path: parts.uri.to_string(),
                                headers: parts.headers,
                                body,
                            });
                            let (status, text) = replies
                                .lock()
                                .unwrap()
                                .pop_front()
                                .unwrap_or((StatusCode::INTERNAL_SERVER_ERROR, "no reply scripted"));
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .header(CONTENT_TYPE, "application/json")
                                    .body(Full::new(Bytes::from_static(text.as_bytes())))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });
        (addr, seen)
    }

    fn descriptor() -> DesiredStateDescriptor {
        DesiredStateDescriptor {
            service_name: "svc1".to_string(),
            image: ImageReference::by_tag("localhost:5000", "svc1", "v1"),
            resources: ResourceLimits {
                cpu_millis: 256,
                memory_bytes: 512 * 1024 * 1024,
            },
            env: BTreeMap::new(),
            network: NetworkPlacement::default(),
            replicas: 2,
            revision: 3,
            health_check: None,
        }
    }

    #[tokio::test]
    async fn submit_sends_revision_header_and_maps_conflict() {
        let (addr, seen) = serve(vec![(StatusCode::ACCEPTED, "{}"), (StatusCode::CONFLICT, "")]).await;
        let platform = HttpPlatform::new(&addr, Some("tok".into()), Duration::from_secs(2));

        assert_eq!(platform.submit(&descriptor()).await.unwrap(), Submission::Applied);
        assert_eq!(
            platform.submit(&descriptor()).await.unwrap(),
            Submission::AlreadyApplied
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let first = &seen[0];
        assert_eq!(first.method, Method::PUT);
        assert_eq!(first.path, "/v1/services/svc1/desired-state");
        assert_eq!(first.headers[REVISION_HEADER], "3");
        assert_eq!(first.headers[AUTHORIZATION], "Bearer tok");
        let sent: DesiredStateDescriptor = serde_json::from_slice(&first.body).unwrap();
        assert_eq!(sent, descriptor());
    }

    #[tokio::test]
    async fn submit_error_classification() {
        let (addr, _) = serve(vec![
            (StatusCode::UNAUTHORIZED, ""),
            (StatusCode::UNPROCESSABLE_ENTITY, "{\"error\":\"cpu\"}"),
            (StatusCode::SERVICE_UNAVAILABLE, ""),
            (StatusCode::TOO_MANY_REQUESTS, ""),
        ])
        .await;
        let platform = HttpPlatform::new(&addr, None, Duration::from_secs(2));

        let d = descriptor();
        assert!(matches!(platform.submit(&d).await, Err(PlatformError::Unauthorized(_))));
        assert!(matches!(platform.submit(&d).await, Err(PlatformError::Rejected(_))));
        assert!(matches!(platform.submit(&d).await, Err(PlatformError::Unavailable(_))));
        assert!(matches!(platform.submit(&d).await, Err(PlatformError::Unavailable(_))));
    }

    #[tokio::test]
    async fn health_parses_counts() {
        let (addr, seen) = serve(vec![
            (StatusCode::OK, "{\"healthy_replicas\":1,\"desired_replicas\":2}"),
            (StatusCode::OK, "not json"),
            (StatusCode::FORBIDDEN, ""),
        ])
        .await;
        let platform = HttpPlatform::new(&addr, None, Duration::from_secs(2));

        let snapshot = platform.snapshot("svc1").await.unwrap();
        assert_eq!((snapshot.healthy_replicas, snapshot.desired_replicas), (1, 2));
        assert!(matches!(platform.snapshot("svc1").await, Err(HealthError::Unavailable(_))));
        assert!(matches!(platform.snapshot("svc1").await, Err(HealthError::Rejected(_))));

        let seen = seen.lock().unwrap();
        assert!(seen.iter().all(|r| r.method == Method::GET && r.path == "/v1/services/svc1/health"));
    }

    #[tokio::test]
    async fn unreachable_platform_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let platform = HttpPlatform::new(&addr, None, Duration::from_secs(2));
        let err = platform.submit(&descriptor()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Network(_)));
        assert!(matches!(platform.snapshot("svc1").await, Err(HealthError::Unavailable(_))));
    }

    #[tokio::test]
    async fn slow_platform_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let platform = HttpPlatform::new(&addr, None, Duration::from_millis(50));
        let err = platform.submit(&descriptor()).await.unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn debug_redacts_token() {
        let platform = HttpPlatform::new("127.0.0.1:1", Some("s3cr3t".into()), Duration::from_secs(1));
        assert!(!format!("{platform:?}").contains("s3cr3t"));
    }
}
