//! OCI distribution API client over plain HTTP/1.1.
//!
//! One connection per request: connect, handshake, send, read the body.
//! Bearer tokens go in the `Authorization` header and are never logged.

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION, USER_AGENT};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use shipwright_core::{BoxFuture, Digest, ImageReference};
use tracing::{debug, info};

use crate::builder::{Artifact, Blob, MANIFEST_MEDIA_TYPE};
use crate::client::{Credentials, Manifest, RegistryClient};
use crate::error::{RegistryError, RegistryResult};

const AGENT: &str = concat!("shipwright/", env!("CARGO_PKG_VERSION"));

/// Response header carrying the registry's digest for a manifest.
pub const CONTENT_DIGEST: &str = "docker-content-digest";

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// Registry client for a registry reachable at `endpoint` (`host:port`).
pub struct OciRegistry {
    endpoint: String,
    /// Used for `exists` and `pull_manifest`.
    read_credentials: Credentials,
}

impl OciRegistry {
    pub fn new(endpoint: &str, read_credentials: Credentials) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            read_credentials,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        method: Method,
        target: &str,
        credentials: &Credentials,
        content_type: Option<&str>,
        accept: Option<&str>,
        body: Bytes,
    ) -> RegistryResult<Reply> {
        let stream = tokio::net::TcpStream::connect(&self.endpoint)
            .await
            .map_err(|e| RegistryError::Transfer(format!("connect to {}: {e}", self.endpoint)))?;

        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RegistryError::Transfer(format!("handshake with {}: {e}", self.endpoint)))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "registry connection closed with error");
            }
        });

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(HOST, &self.endpoint)
            .header(USER_AGENT, AGENT)
            .header(CONTENT_LENGTH, body.len());
        if let Some(token) = credentials.token() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        if let Some(accept) = accept {
            builder = builder.header(ACCEPT, accept);
        }
        let request = builder
            .body(Full::new(body))
            .map_err(|e| RegistryError::Transfer(format!("invalid request {method} {target}: {e}")))?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| RegistryError::Transfer(format!("{method} {target}: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| RegistryError::Transfer(format!("reading {method} {target}: {e}")))?
            .to_bytes();

        debug!(%method, %target, %status, "registry request");
        Ok(Reply { status, headers, body })
    }

    async fn blob_present(&self, repository: &str, blob: &Blob, credentials: &Credentials) -> RegistryResult<bool> {
        let target = format!("/v2/{repository}/blobs/{}", blob.digest);
        let reply = self
            .send(Method::HEAD, &target, credentials, None, None, Bytes::new())
            .await?;
        match reply.status {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(classify(s, &target, &reply.body)),
        }
    }

    async fn upload_blob(&self, repository: &str, blob: &Blob, credentials: &Credentials) -> RegistryResult<()> {
        let start = format!("/v2/{repository}/blobs/uploads/");
        let reply = self
            .send(Method::POST, &start, credentials, None, None, Bytes::new())
            .await?;
        if !reply.status.is_success() {
            return Err(classify(reply.status, &start, &reply.body));
        }
        let location = reply
            .headers
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::Transfer(format!("{start}: upload session without Location")))?;

        let target = upload_target(location, &blob.digest.to_string());
        let reply = self
            .send(
                Method::PUT,
                &target,
                credentials,
                Some("application/octet-stream"),
                None,
                Bytes::from(blob.bytes.clone()),
            )
            .await?;
        if !reply.status.is_success() {
            return Err(classify(reply.status, &target, &reply.body));
        }
        debug!(digest = %blob.digest, size = blob.size(), "uploaded blob");
        Ok(())
    }

    async fn push_artifact(
        &self,
        repository: &str,
        artifact: &Artifact,
        credentials: &Credentials,
    ) -> RegistryResult<ImageReference> {
        for blob in artifact.blobs() {
            if self.blob_present(repository, blob, credentials).await? {
                debug!(digest = %blob.digest, "blob already present, skipping upload");
                continue;
            }
            self.upload_blob(repository, blob, credentials).await?;
        }

        let target = format!("/v2/{repository}/manifests/{}", artifact.tag);
        let reply = self
            .send(
                Method::PUT,
                &target,
                credentials,
                Some(MANIFEST_MEDIA_TYPE),
                None,
                Bytes::from(artifact.manifest.clone()),
            )
            .await?;
        if !reply.status.is_success() {
            return Err(classify(reply.status, &target, &reply.body));
        }

        info!(
            registry = %self.endpoint,
            %repository,
            tag = %artifact.tag,
            digest = %artifact.digest,
            "pushed image"
        );
        Ok(ImageReference::by_digest(&self.endpoint, repository, artifact.digest.clone()))
    }

    fn manifest_target(reference: &ImageReference) -> String {
        format!("/v2/{}/manifests/{}", reference.repository, reference.reference())
    }
}

impl RegistryClient for OciRegistry {
    fn push<'a>(
        &'a self,
        repository: &'a str,
        artifact: &'a Artifact,
        credentials: &'a Credentials,
    ) -> BoxFuture<'a, RegistryResult<ImageReference>> {
        Box::pin(self.push_artifact(repository, artifact, credentials))
    }

    fn exists<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<bool>> {
        Box::pin(async move {
            let target = Self::manifest_target(reference);
            let reply = self
                .send(
                    Method::HEAD,
                    &target,
                    &self.read_credentials,
                    None,
                    Some(MANIFEST_MEDIA_TYPE),
                    Bytes::new(),
                )
                .await?;
            match reply.status {
                s if s.is_success() => Ok(true),
                StatusCode::NOT_FOUND => Ok(false),
                s => Err(classify(s, &target, &reply.body)),
            }
        })
    }

    fn pull_manifest<'a>(&'a self, reference: &'a ImageReference) -> BoxFuture<'a, RegistryResult<Manifest>> {
        Box::pin(async move {
            let target = Self::manifest_target(reference);
            let reply = self
                .send(
                    Method::GET,
                    &target,
                    &self.read_credentials,
                    None,
                    Some(MANIFEST_MEDIA_TYPE),
                    Bytes::new(),
                )
                .await?;
            if !reply.status.is_success() {
                return Err(classify(reply.status, &target, &reply.body));
            }
            manifest_from(&reply, &target)
        })
    }
}

/// The registry's `Docker-Content-Digest` names the manifest when present;
/// otherwise the digest of the served bytes does.
fn manifest_from(reply: &Reply, target: &str) -> RegistryResult<Manifest> {
    let bytes = reply.body.to_vec();
    let Some(header) = reply.headers.get(CONTENT_DIGEST) else {
        return Ok(Manifest::from_bytes(bytes));
    };
    let digest = header
        .to_str()
        .ok()
        .and_then(|v| Digest::parse(v.trim()).ok())
        .ok_or_else(|| RegistryError::Transfer(format!("{target}: malformed {CONTENT_DIGEST} header")))?;
    if digest != Digest::of(&bytes) {
        debug!(%target, %digest, "registry digest differs from served manifest bytes");
    }
    Ok(Manifest { digest, bytes })
}

/// Map a non-success status to a registry error.
fn classify(status: StatusCode, target: &str, body: &[u8]) -> RegistryError {
    let detail = String::from_utf8_lossy(body);
    let message = format!("{target}: {status} {}", detail.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RegistryError::Auth(message),
        StatusCode::NOT_FOUND => RegistryError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => RegistryError::Transfer(message),
        s if s.is_server_error() => RegistryError::Transfer(message),
        s => RegistryError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Turn an upload `Location` (absolute URL or path) into a request target
/// carrying `digest=`.
fn upload_target(location: &str, digest: &str) -> String {
    let path = match location.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => location,
    };
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}digest={digest}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ArtifactBuilder;
    use http::Response;
    use hyper::body::Incoming;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    /// A request as the fake registry received it.
    #[derive(Debug)]
    struct Seen {
        method: Method,
        path: String,
        headers: HeaderMap,
        body: Bytes,
    }

    /// A scripted registry reply.
    struct Canned {
        status: StatusCode,
        headers: Vec<(&'static str, String)>,
        body: Bytes,
    }

    fn canned(status: StatusCode) -> Canned {
        Canned {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    impl Canned {
        fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
            self.headers.push((name, value.into()));
            self
        }

        fn body(mut self, body: impl Into<Bytes>) -> Self {
            self.body = body.into();
            self
        }
    }

    /// Serve scripted replies in order, one per request, and record requests.
    async fn serve(replies: Vec<Canned>) -> (String, Arc<Mutex<Vec<Seen>>>) {
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
                            let reply = replies
                                .lock()
                                .unwrap()
                                .pop_front()
                                .unwrap_or_else(|| canned(StatusCode::INTERNAL_SERVER_ERROR));
                            let mut response = Response::builder().status(reply.status);
                            for (name, value) in reply.headers {
                                response = response.header(name, value);
                            }
                            Ok::<_, hyper::Error>(response.body(Full::new(reply.body)).unwrap())
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

    fn reference(addr: &str) -> ImageReference {
        ImageReference::by_digest(addr, "bookstore/api", Digest::of(b"manifest"))
    }

    #[test]
    fn upload_target_handles_absolute_and_relative_locations() {
        assert_eq!(
            upload_target("http://reg:5000/v2/api/blobs/uploads/abc", "sha256:00"),
            "/v2/api/blobs/uploads/abc?digest=sha256:00"
        );
        assert_eq!(
            upload_target("/v2/api/blobs/uploads/abc?_state=x", "sha256:00"),
            "/v2/api/blobs/uploads/abc?_state=x&digest=sha256:00"
        );
    }

    #[test]
    fn status_classification() {
        assert!(matches!(classify(StatusCode::FORBIDDEN, "/", b""), RegistryError::Auth(_)));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, "/", b""),
            RegistryError::Transfer(_)
        ));
        assert!(classify(StatusCode::BAD_GATEWAY, "/", b"").is_transient());
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, "/", b"MANIFEST_INVALID"),
            RegistryError::Rejected { status: 400, .. }
        ));
    }

    #[tokio::test]
    async fn exists_maps_status_codes() {
        let (addr, seen) = serve(vec![
            canned(StatusCode::OK),
            canned(StatusCode::NOT_FOUND),
            canned(StatusCode::UNAUTHORIZED),
            canned(StatusCode::SERVICE_UNAVAILABLE),
        ])
        .await;
        let registry = OciRegistry::new(&addr, Credentials::bearer("tok"));
        let r = reference(&addr);

        assert!(registry.exists(&r).await.unwrap());
        assert!(!registry.exists(&r).await.unwrap());
        assert!(matches!(registry.exists(&r).await, Err(RegistryError::Auth(_))));
        assert!(matches!(registry.exists(&r).await, Err(RegistryError::Transfer(_))));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::HEAD);
        assert_eq!(
            seen[0].path,
            format!("/v2/bookstore/api/manifests/{}", Digest::of(b"manifest"))
        );
        assert_eq!(seen[0].headers[AUTHORIZATION], "Bearer tok");
        assert_eq!(seen[0].headers[ACCEPT], MANIFEST_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn pull_prefers_the_registry_digest() {
        let served = Digest::of(b"canonical manifest");
        let (addr, seen) = serve(vec![
            canned(StatusCode::OK)
                .header(CONTENT_DIGEST, served.to_string())
                .body("converted manifest"),
            canned(StatusCode::OK).body("plain manifest"),
            canned(StatusCode::OK)
                .header(CONTENT_DIGEST, "md5:nope")
                .body("x"),
        ])
        .await;
        let registry = OciRegistry::new(&addr, Credentials::anonymous());
        let tagged = ImageReference::by_tag(&addr, "bookstore/api", "1.0.0");

        let manifest = registry.pull_manifest(&tagged).await.unwrap();
        assert_eq!(manifest.digest, served);
        assert_eq!(manifest.bytes, b"converted manifest");

        let manifest = registry.pull_manifest(&tagged).await.unwrap();
        assert_eq!(manifest.digest, Digest::of(b"plain manifest"));

        assert!(registry.pull_manifest(&tagged).await.is_err());

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].method, Method::GET);
        assert_eq!(seen[0].path, "/v2/bookstore/api/manifests/1.0.0");
        assert_eq!(seen[0].headers[ACCEPT], MANIFEST_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn connection_refused_is_transfer_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let registry = OciRegistry::new(&addr, Credentials::anonymous());
        let err = registry.exists(&reference(&addr)).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn push_skips_present_blobs_and_puts_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.py"), "print('ok')").unwrap();
        let artifact = ArtifactBuilder::new().build(dir.path(), "api", "1.0.0").unwrap();

        let (addr, seen) = serve(vec![
            // config blob: missing, upload it
            canned(StatusCode::NOT_FOUND),
            canned(StatusCode::ACCEPTED).header("location", "/v2/api/blobs/uploads/u1"),
            canned(StatusCode::CREATED),
            // layer blob: already present
            canned(StatusCode::OK),
            // manifest
            canned(StatusCode::CREATED),
        ])
        .await;

        let registry = OciRegistry::new(&addr, Credentials::anonymous());
        let pinned = registry
            .push("api", &artifact, &Credentials::bearer("push-token"))
            .await
            .unwrap();
        assert_eq!(pinned.digest(), Some(&artifact.digest));
        assert_eq!(pinned.registry, addr);

        let seen = seen.lock().unwrap();
        let requests: Vec<(Method, String)> = seen.iter().map(|r| (r.method.clone(), r.path.clone())).collect();
        assert_eq!(
            requests,
            vec![
                (Method::HEAD, format!("/v2/api/blobs/{}", artifact.config.digest)),
                (Method::POST, "/v2/api/blobs/uploads/".to_string()),
                (
                    Method::PUT,
                    format!("/v2/api/blobs/uploads/u1?digest={}", artifact.config.digest)
                ),
                (Method::HEAD, format!("/v2/api/blobs/{}", artifact.layers[0].digest)),
                (Method::PUT, format!("/v2/api/manifests/{}", artifact.tag)),
            ]
        );
        assert_eq!(seen[2].body.as_ref(), artifact.config.bytes.as_slice());
        assert_eq!(seen[4].headers[CONTENT_TYPE], MANIFEST_MEDIA_TYPE);
        assert_eq!(seen[4].body.as_ref(), artifact.manifest.as_slice());
        assert!(seen.iter().all(|r| r.headers[AUTHORIZATION] == "Bearer push-token"));
    }
}
