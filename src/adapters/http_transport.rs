use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls::{
    DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    ClientConfig, RootCertStore,
    crypto::CryptoProvider,
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use rustls_native_certs::load_native_certs;

use crate::ports::transport::{Transport, TransportError, TransportParams, TransportResult};

static SHARED_DEFAULT: LazyLock<Arc<HttpTransport>> =
    LazyLock::new(|| Arc::new(HttpTransport::new(TransportParams::default())));

/// Process-wide crypto provider, installed on first use unless the binary
/// already installed one.
static CRYPTO_PROVIDER: LazyLock<Arc<CryptoProvider>> = LazyLock::new(|| {
    if CryptoProvider::get_default().is_none()
        && rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
    {
        tracing::debug!("Another crypto provider was installed concurrently");
    }
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
});

/// Platform trust roots, read from disk once per process.
static NATIVE_ROOTS: LazyLock<Arc<RootCertStore>> = LazyLock::new(|| {
    let mut root_cert_store = RootCertStore::empty();
    let native_certs = load_native_certs();

    for cert in native_certs.certs {
        if root_cert_store.add(cert).is_err() {
            tracing::warn!("Failed to add native certificate to rustls RootCertStore");
        }
    }
    if !native_certs.errors.is_empty() {
        tracing::warn!(
            "Some native certificates failed to load: {:?}",
            native_certs.errors
        );
    }
    tracing::debug!(roots = root_cert_store.len(), "Loaded native trust roots");
    Arc::new(root_cert_store)
});

/// Pooled HTTP/1.1 client transport using Hyper with Rustls.
///
/// Pool behaviour follows the [`TransportParams`] it was built from:
/// * `idle_connections_per_host` caps idle pooled connections per host, `0`
///   keeps Hyper's default (unbounded)
/// * `close_idle_conns_period` becomes Hyper's `pool_idle_timeout`: each
///   pooled connection is dropped once it sat idle that long. Zero keeps
///   Hyper's default
/// * certificate verification uses the platform roots, loaded once and shared
///   by every transport
/// * `insecure_skip_verify` disables certificate verification entirely
///
/// Response bodies are streamed frame by frame, so `flush_interval` is
/// carried for introspection only.
pub struct HttpTransport {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    params: TransportParams,
    root_store: Option<Arc<RootCertStore>>,
}

impl HttpTransport {
    /// Create a transport from `params`.
    pub fn new(params: TransportParams) -> Self {
        LazyLock::force(&CRYPTO_PROVIDER);

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let (tls_config, root_store) = if params.insecure_skip_verify {
            tracing::warn!("TLS certificate verification disabled for upstream transport");
            (insecure_tls_config(), None)
        } else {
            let roots = NATIVE_ROOTS.clone();
            (native_tls_config(roots.clone()), Some(roots))
        };

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let mut builder = Client::builder(TokioExecutor::new());
        builder.pool_timer(TokioTimer::new());
        if params.idle_connections_per_host > 0 {
            builder.pool_max_idle_per_host(params.idle_connections_per_host);
        }
        if !params.close_idle_conns_period.is_zero() {
            builder.pool_idle_timeout(params.close_idle_conns_period);
        }
        let client = builder.build::<_, AxumBody>(https_connector);

        tracing::debug!(
            idle_connections_per_host = params.idle_connections_per_host,
            close_idle_conns_period = ?params.close_idle_conns_period,
            flush_interval = ?params.flush_interval,
            insecure_skip_verify = params.insecure_skip_verify,
            "Created upstream transport"
        );
        Self {
            client,
            params,
            root_store,
        }
    }

    /// Process-wide transport built from default parameters.
    pub fn shared_default() -> Arc<HttpTransport> {
        SHARED_DEFAULT.clone()
    }
}

fn native_tls_config(roots: Arc<RootCertStore>) -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

fn insecure_tls_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification(
            CRYPTO_PROVIDER.clone(),
        )))
        .with_no_client_auth()
}

/// Accepts any server certificate. Handshake signatures are still checked
/// so the peer must hold the key of the certificate it presents.
#[derive(Debug)]
struct NoCertificateVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn round_trip(&self, req: Request<AxumBody>) -> TransportResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(TransportError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let outgoing_request = Request::from_parts(parts, body);

        let method = outgoing_request.method().clone();
        let uri = outgoing_request.uri().clone();

        match self.client.request(outgoing_request).await {
            Ok(response) => {
                let (mut parts, hyper_body) = response.into_parts();

                // The body is re-framed by the downstream server
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Err(e) => Err(TransportError::ConnectionError(format!(
                "{method} {uri} failed: {e}"
            ))),
        }
    }

    fn params(&self) -> TransportParams {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_transport_keeps_its_params() {
        let params = TransportParams {
            insecure_skip_verify: true,
            flush_interval: Duration::from_millis(100),
            close_idle_conns_period: Duration::from_secs(30),
            idle_connections_per_host: 12,
        };
        let transport = HttpTransport::new(params);
        assert_eq!(transport.params(), params);
    }

    #[tokio::test]
    async fn test_shared_default_is_shared() {
        let first = HttpTransport::shared_default();
        let second = HttpTransport::shared_default();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.params(), TransportParams::default());
    }

    #[tokio::test]
    async fn test_transports_share_native_roots() {
        let first = HttpTransport::new(TransportParams::default());
        let second = HttpTransport::new(TransportParams {
            idle_connections_per_host: 4,
            ..TransportParams::default()
        });
        let insecure = HttpTransport::new(TransportParams {
            insecure_skip_verify: true,
            ..TransportParams::default()
        });

        let (Some(a), Some(b)) = (&first.root_store, &second.root_store) else {
            panic!("verifying transports must carry the native roots");
        };
        assert!(Arc::ptr_eq(a, b));
        assert!(Arc::ptr_eq(a, &*NATIVE_ROOTS));
        assert!(insecure.root_store.is_none());
        assert!(CryptoProvider::get_default().is_some());
    }

    #[tokio::test]
    async fn test_round_trip_requires_absolute_uri() {
        let transport = HttpTransport::new(TransportParams::default());
        let req = Request::builder()
            .uri("/relative")
            .body(AxumBody::empty())
            .unwrap();

        let result = transport.round_trip(req).await;
        assert!(matches!(result, Err(TransportError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_round_trip_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(TransportParams::default());
        let req = Request::builder()
            .uri(format!("http://{addr}/"))
            .body(AxumBody::empty())
            .unwrap();

        let result = transport.round_trip(req).await;
        assert!(matches!(result, Err(TransportError::ConnectionError(_))));
    }
}
