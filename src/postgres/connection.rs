//! PostgreSQL connections backing the extension client
//!
//! A ProviderConfig names a Secret holding the server endpoint and admin
//! credentials. [`KubeClientFactory`] reads both and hands out a
//! [`PgExtensionClient`], which borrows connections from a process-wide
//! [`PoolCache`]. Pools are keyed per ProviderConfig and target database
//! because a PostgreSQL connection is bound to a single database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use deadpool_postgres::{
    Config, ManagerConfig, Pool, PoolConfig, PoolError, RecyclingMethod, Runtime,
};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use rustls::pki_types::{CertificateDer, ServerName};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_postgres::NoTls;
use tokio_postgres::error::SqlState;
use tokio_postgres_rustls_improved::MakeRustlsConnect;
use tracing::{debug, info};

use super::client::{ClientFactory, ExtensionClient, Observation};
use super::sql;
use crate::controller::error::{Error, Result};
use crate::crd::{ProviderConfig, SslMode};

/// Secret key holding the server host name
pub const ENDPOINT_KEY: &str = "endpoint";
/// Secret key holding the server port
pub const PORT_KEY: &str = "port";
/// Secret key holding the admin user name
pub const USERNAME_KEY: &str = "username";
/// Secret key holding the admin password
pub const PASSWORD_KEY: &str = "password";
/// Secret key holding the PEM CA bundle used by `verify-full`
pub const CA_CERT_KEY: &str = "ca.crt";

pub const DEFAULT_PORT: u16 = 5432;

/// Default number of connections per pool
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Errors that can occur while building or using a PostgreSQL connection
#[derive(Error, Debug)]
pub enum PostgresClientError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("ProviderConfig not found: {0}")]
    ProviderConfigNotFound(String),

    #[error("Credentials secret not found: {0}")]
    SecretNotFound(String),

    #[error("Secret missing required key: {0}")]
    SecretMissingKey(String),

    #[error("Invalid UTF-8 in secret key {0}")]
    InvalidUtf8(String),

    #[error("Invalid port: {0}")]
    InvalidPort(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),
}

pub type PostgresClientResult<T> = std::result::Result<T, PostgresClientError>;

impl From<PostgresClientError> for Error {
    /// Everything that goes wrong before a connection is attempted is a
    /// ProviderConfig problem
    fn from(e: PostgresClientError) -> Self {
        Error::ProviderConfigError(e.to_string())
    }
}

/// Server address and admin credentials read from a connection Secret
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDetails {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub ssl_mode: SslMode,
    /// PEM-encoded CA bundle
    pub ca_cert_pem: Option<String>,
}

impl std::fmt::Debug for ConnectionDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDetails")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("ssl_mode", &self.ssl_mode)
            .field("ca_cert_pem", &self.ca_cert_pem.as_ref().map(|_| "<pem>"))
            .finish()
    }
}

impl ConnectionDetails {
    /// Extract connection details from a connection Secret
    ///
    /// Expects `endpoint`, `username` and `password`; `port` defaults to 5432.
    /// `ca.crt` is required only for `verify-full`.
    pub fn from_secret(secret: &Secret, ssl_mode: SslMode) -> PostgresClientResult<Self> {
        let port = match secret_value(secret, PORT_KEY)? {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| PostgresClientError::InvalidPort(raw.clone()))?,
            None => DEFAULT_PORT,
        };

        let ca_cert_pem = secret_value(secret, CA_CERT_KEY)?;
        if ssl_mode == SslMode::VerifyFull && ca_cert_pem.is_none() {
            return Err(PostgresClientError::SecretMissingKey(CA_CERT_KEY.into()));
        }

        Ok(Self {
            host: required_secret_value(secret, ENDPOINT_KEY)?,
            port,
            username: required_secret_value(secret, USERNAME_KEY)?,
            password: required_secret_value(secret, PASSWORD_KEY)?,
            ssl_mode,
            ca_cert_pem,
        })
    }
}

fn secret_value(secret: &Secret, key: &str) -> PostgresClientResult<Option<String>> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone())
            .map(Some)
            .map_err(|_| PostgresClientError::InvalidUtf8(key.to_string()));
    }
    Ok(secret.string_data.as_ref().and_then(|d| d.get(key)).cloned())
}

fn required_secret_value(secret: &Secret, key: &str) -> PostgresClientResult<String> {
    secret_value(secret, key)?
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PostgresClientError::SecretMissingKey(key.to_string()))
}

/// Pools are keyed by where credentials come from, not by the credentials
#[derive(Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    provider_config: String,
    database: String,
}

impl PoolKey {
    fn new(provider_config: &str, database: &str) -> Self {
        Self {
            provider_config: provider_config.to_string(),
            database: database.to_string(),
        }
    }
}

struct CachedPool {
    details: ConnectionDetails,
    pool: Pool,
}

/// Connection pools shared by all reconcile workers
///
/// One pool per (ProviderConfig, database). A pool built from stale
/// connection details is closed and replaced on the next checkout.
pub struct PoolCache {
    pools: RwLock<HashMap<PoolKey, CachedPool>>,
    max_size: usize,
}

impl Default for PoolCache {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl PoolCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            max_size: max_size.max(1),
        }
    }

    /// Number of pools currently cached
    pub async fn len(&self) -> usize {
        self.pools.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pools.read().await.is_empty()
    }

    /// Return the pool for a database, creating it on first use
    ///
    /// Pool creation does not connect; the first checkout does.
    pub async fn pool_for(
        &self,
        provider_config: &str,
        details: &ConnectionDetails,
        database: &str,
    ) -> PostgresClientResult<Pool> {
        let key = PoolKey::new(provider_config, database);
        if let Some(cached) = self.pools.read().await.get(&key)
            && cached.details == *details
        {
            return Ok(cached.pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(cached) = pools.get(&key) {
            if cached.details == *details {
                return Ok(cached.pool.clone());
            }
            cached.pool.close();
            debug!(
                provider_config = %provider_config,
                database = %database,
                "Connection details changed, replacing pool"
            );
        }
        let pool = create_pool(details, database, self.max_size)?;
        debug!(
            provider_config = %provider_config,
            host = %details.host,
            port = details.port,
            database = %database,
            "Created PostgreSQL connection pool"
        );
        pools.insert(
            key,
            CachedPool {
                details: details.clone(),
                pool: pool.clone(),
            },
        );
        Ok(pool)
    }

    /// Close and forget the pool for a database
    ///
    /// Idle sessions would otherwise keep the database from being dropped.
    pub async fn evict(&self, provider_config: &str, database: &str) {
        let key = PoolKey::new(provider_config, database);
        if let Some(cached) = self.pools.write().await.remove(&key) {
            cached.pool.close();
            debug!(
                provider_config = %provider_config,
                database = %database,
                "Closed PostgreSQL connection pool"
            );
        }
    }
}

fn create_pool(
    details: &ConnectionDetails,
    database: &str,
    max_size: usize,
) -> PostgresClientResult<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(details.host.clone());
    cfg.port = Some(details.port);
    cfg.dbname = Some(database.to_string());
    cfg.user = Some(details.username.clone());
    cfg.password = Some(details.password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(max_size));

    let created = match details.ssl_mode {
        SslMode::Disable => {
            cfg.ssl_mode = Some(deadpool_postgres::SslMode::Disable);
            cfg.create_pool(Some(Runtime::Tokio1), NoTls)
        }
        SslMode::Require | SslMode::VerifyFull => {
            cfg.ssl_mode = Some(deadpool_postgres::SslMode::Require);
            let tls = build_tls_connector(details.ssl_mode, details.ca_cert_pem.as_deref())?;
            cfg.create_pool(Some(Runtime::Tokio1), tls)
        }
    };

    created.map_err(|e| PostgresClientError::Pool(format!("Failed to create pool: {}", e)))
}

// =============================================================================
// TLS Configuration
// =============================================================================

/// Parse PEM-encoded certificates into DER format
fn parse_pem_certificates(pem_data: &str) -> PostgresClientResult<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(pem_data.as_bytes());
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            PostgresClientError::InvalidCertificate(format!("Failed to parse certificate: {}", e))
        })?;

    if certs.is_empty() {
        return Err(PostgresClientError::InvalidCertificate(
            "No certificates found in PEM data".to_string(),
        ));
    }

    Ok(certs)
}

/// Build a rustls TLS connector for PostgreSQL
///
/// `require` encrypts without verifying the server certificate, matching
/// libpq's `sslmode=require`. `verify-full` checks the chain against the CA
/// bundle from the Secret and the host name.
fn build_tls_connector(
    ssl_mode: SslMode,
    ca_cert_pem: Option<&str>,
) -> PostgresClientResult<MakeRustlsConnect> {
    match ssl_mode {
        SslMode::Disable => Err(PostgresClientError::TlsConfig(
            "Cannot build TLS connector for disabled TLS mode".to_string(),
        )),
        SslMode::Require => {
            let config = rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth();

            Ok(MakeRustlsConnect::new(config))
        }
        SslMode::VerifyFull => {
            let pem = ca_cert_pem
                .ok_or_else(|| PostgresClientError::SecretMissingKey(CA_CERT_KEY.into()))?;
            let mut root_store = rustls::RootCertStore::empty();
            for cert in parse_pem_certificates(pem)? {
                root_store.add(cert).map_err(|e| {
                    PostgresClientError::InvalidCertificate(format!("Failed to add CA cert: {}", e))
                })?;
            }

            let config = rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth();

            Ok(MakeRustlsConnect::new(config))
        }
    }
}

/// Certificate verifier that accepts any server certificate
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Map a failed checkout to the reconciler's taxonomy
///
/// A missing database surfaces as SQLSTATE 3D000 during the startup handshake.
fn checkout_error(database: &str, e: PoolError) -> Error {
    if let PoolError::Backend(pg) = &e
        && pg.code() == Some(&SqlState::INVALID_CATALOG_NAME)
    {
        return Error::NotFoundError(format!("database {} does not exist", database));
    }
    Error::ConnectionError(format!("cannot connect to database {}: {}", database, e))
}

/// Render a statement failure with the server's message when there is one
fn describe(e: &tokio_postgres::Error) -> String {
    match e.as_db_error() {
        Some(db) => format!("{} (SQLSTATE {})", db.message(), db.code().code()),
        None => e.to_string(),
    }
}

// =============================================================================
// Client
// =============================================================================

/// [`ExtensionClient`] backed by pooled tokio-postgres connections
pub struct PgExtensionClient {
    provider_config: String,
    details: ConnectionDetails,
    pools: Arc<PoolCache>,
}

impl PgExtensionClient {
    pub fn new(
        provider_config: impl Into<String>,
        details: ConnectionDetails,
        pools: Arc<PoolCache>,
    ) -> Self {
        Self {
            provider_config: provider_config.into(),
            details,
            pools,
        }
    }

    async fn connection(&self, database: &str) -> Result<deadpool_postgres::Object> {
        let pool = self
            .pools
            .pool_for(&self.provider_config, &self.details, database)
            .await?;
        pool.get().await.map_err(|e| checkout_error(database, e))
    }
}

#[async_trait]
impl ExtensionClient for PgExtensionClient {
    async fn observe(
        &self,
        database: &str,
        extension: &str,
        desired_version: Option<&str>,
    ) -> Result<Observation> {
        let conn = self.connection(database).await?;
        let row = conn
            .query_opt(sql::OBSERVE_EXTENSION, &[&extension])
            .await
            .map_err(|e| Error::ConnectionError(format!("cannot read pg_extension: {}", describe(&e))))?;

        Ok(match row {
            Some(row) => {
                let installed: String = row.try_get(0).map_err(|e| {
                    Error::ConnectionError(format!("unexpected pg_extension row: {}", e))
                })?;
                Observation::present(installed, desired_version)
            }
            None => Observation::absent(),
        })
    }

    async fn create(&self, database: &str, extension: &str, version: Option<&str>) -> Result<()> {
        let conn = self.connection(database).await?;
        conn.batch_execute(&sql::create_extension(extension, version))
            .await
            .map_err(|e| Error::ExtensionCreateError(describe(&e)))?;
        info!(database = %database, extension = %extension, version = ?version, "Created extension");
        Ok(())
    }

    async fn update(&self, database: &str, extension: &str, version: Option<&str>) -> Result<()> {
        let Some(statement) = sql::update_extension(extension, version) else {
            return Ok(());
        };
        let conn = self.connection(database).await?;
        conn.batch_execute(&statement)
            .await
            .map_err(|e| Error::ExtensionUpdateError(describe(&e)))?;
        info!(database = %database, extension = %extension, version = ?version, "Updated extension");
        Ok(())
    }

    async fn delete(&self, database: &str, extension: &str) -> Result<()> {
        let conn = self.connection(database).await?;
        conn.batch_execute(&sql::drop_extension(extension))
            .await
            .map_err(|e| Error::ExtensionDeleteError(describe(&e)))?;
        drop(conn);
        info!(database = %database, extension = %extension, "Dropped extension");
        self.pools.evict(&self.provider_config, database).await;
        Ok(())
    }
}

/// [`ClientFactory`] reading ProviderConfigs and their Secrets from the API server
pub struct KubeClientFactory {
    client: Client,
    pools: Arc<PoolCache>,
}

impl KubeClientFactory {
    pub fn new(client: Client, pools: Arc<PoolCache>) -> Self {
        Self { client, pools }
    }

    async fn connection_details(&self, name: &str) -> PostgresClientResult<ConnectionDetails> {
        let configs: Api<ProviderConfig> = Api::all(self.client.clone());
        let config = configs
            .get_opt(name)
            .await?
            .ok_or_else(|| PostgresClientError::ProviderConfigNotFound(name.to_string()))?;

        let secret_ref = &config.spec.credentials.connection_secret_ref;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &secret_ref.namespace);
        let secret = secrets.get_opt(&secret_ref.name).await?.ok_or_else(|| {
            PostgresClientError::SecretNotFound(format!(
                "{}/{}",
                secret_ref.namespace, secret_ref.name
            ))
        })?;

        ConnectionDetails::from_secret(&secret, config.spec.ssl_mode)
    }
}

#[async_trait]
impl ClientFactory for KubeClientFactory {
    async fn connect(&self, provider_config: &str) -> Result<Arc<dyn ExtensionClient>> {
        let details = self.connection_details(provider_config).await?;
        debug!(provider_config = %provider_config, host = %details.host, "Built PostgreSQL client");
        Ok(Arc::new(PgExtensionClient::new(
            provider_config,
            details,
            self.pools.clone(),
        )))
    }
}
