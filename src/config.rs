use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt, str::FromStr, time::Duration};
use url::Url;

/// Which object store backs the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Gcs,
    S3,
    Local,
}

impl StoreBackend {
    pub fn can_sign(&self) -> bool {
        !matches!(self, StoreBackend::Local)
    }
}

/// How fetched bytes reach the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    RedirectPublic,
    RedirectSigned,
    ProxyDirect,
    ProxySigned,
}

impl TransportMode {
    pub fn needs_signing(&self) -> bool {
        matches!(self, TransportMode::RedirectSigned | TransportMode::ProxySigned)
    }
}

/// Connection settings for the object store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub bucket: Option<String>,
    pub credentials: Option<String>,
    pub storage_dir: String,
    pub public_base_url: Option<Url>,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store: StoreSettings,
    pub transport: TransportMode,
    pub signed_url_expiry: Duration,
    pub api_keys: String,
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    pub max_upload_bytes: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("store", &self.store)
            .field("transport", &self.transport)
            .field("signed_url_expiry", &self.signed_url_expiry)
            .field("api_keys", &"<redacted>")
            .field("rate_limit", &self.rate_limit)
            .field("rate_limit_window", &self.rate_limit_window)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object store gateway with on-demand image derivatives")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Object store backend (overrides STORE_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<StoreBackend>,

    /// Bucket name (overrides BUCKET_NAME)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Service account file (overrides GOOGLE_APPLICATION_CREDENTIALS)
    #[arg(long)]
    pub credentials: Option<String>,

    /// Root directory of the local backend (overrides STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Base URL of publicly readable objects (overrides PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Delivery strategy (overrides TRANSPORT_STRATEGY)
    #[arg(long, value_enum)]
    pub transport: Option<TransportMode>,

    /// Signed URL lifetime in milliseconds (overrides SIGNED_URL_EXPIRY)
    #[arg(long)]
    pub signed_url_expiry_ms: Option<u64>,

    /// Mutating requests allowed per window (overrides RATE_LIMIT)
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Rate limit window in seconds (overrides RATE_LIMIT_TTL)
    #[arg(long)]
    pub rate_limit_ttl: Option<u64>,

    /// Upload body cap in bytes (overrides MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,
}

impl AppConfig {
    /// Parse CLI args over process environment into a validated AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::from_sources(args, |key| env::var(key).ok())
    }

    /// Merge `args` over the variables returned by `lookup`, then validate.
    pub fn from_sources(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match args.backend {
            Some(backend) => backend,
            None => env_enum(&lookup, "STORE_BACKEND", StoreBackend::Gcs)?,
        };
        let transport = match args.transport {
            Some(transport) => transport,
            None => env_enum(&lookup, "TRANSPORT_STRATEGY", TransportMode::RedirectPublic)?,
        };

        let public_base_url = match args.public_base_url.or_else(|| lookup("PUBLIC_BASE_URL")) {
            Some(raw) => Some(
                Url::parse(&raw).with_context(|| format!("parsing PUBLIC_BASE_URL `{raw}`"))?,
            ),
            None => None,
        };

        let store = StoreSettings {
            backend,
            bucket: args
                .bucket
                .or_else(|| lookup("BUCKET_NAME"))
                .filter(|b| !b.is_empty()),
            credentials: args
                .credentials
                .or_else(|| lookup("GOOGLE_APPLICATION_CREDENTIALS"))
                .filter(|c| !c.is_empty()),
            storage_dir: args
                .storage_dir
                .or_else(|| lookup("STORAGE_DIR"))
                .unwrap_or_else(|| "./data/objects".into()),
            public_base_url,
        };

        let expiry_ms = opt_or_env(args.signed_url_expiry_ms, &lookup, "SIGNED_URL_EXPIRY", 3_600_000)?;

        let cfg = Self {
            host: args
                .host
                .or_else(|| lookup("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: opt_or_env(args.port, &lookup, "PORT", 3000)?,
            store,
            transport,
            signed_url_expiry: Duration::from_millis(expiry_ms),
            api_keys: lookup("API_KEY").unwrap_or_default(),
            rate_limit: opt_or_env(args.rate_limit, &lookup, "RATE_LIMIT", 10)?,
            rate_limit_window: Duration::from_secs(opt_or_env(
                args.rate_limit_ttl,
                &lookup,
                "RATE_LIMIT_TTL",
                60,
            )?),
            max_upload_bytes: opt_or_env(
                args.max_upload_bytes,
                &lookup,
                "MAX_UPLOAD_BYTES",
                25 * 1024 * 1024,
            )?,
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.signed_url_expiry.is_zero() {
            bail!("SIGNED_URL_EXPIRY must be greater than zero");
        }
        if self.rate_limit == 0 {
            bail!("RATE_LIMIT must be greater than zero");
        }
        if self.rate_limit_window.is_zero() {
            bail!("RATE_LIMIT_TTL must be greater than zero");
        }
        if self.store.backend != StoreBackend::Local && self.store.bucket.is_none() {
            bail!("BUCKET_NAME is required for the {:?} backend", self.store.backend);
        }
        if self.transport.needs_signing() && !self.store.backend.can_sign() {
            bail!(
                "transport {:?} needs signed urls, which the {:?} backend cannot issue",
                self.transport,
                self.store.backend
            );
        }
        if self.transport == TransportMode::RedirectPublic
            && self.store.backend == StoreBackend::Local
            && self.store.public_base_url.is_none()
        {
            bail!("PUBLIC_BASE_URL is required for redirect-public with the local backend");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn opt_or_env<T>(
    arg: Option<T>,
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(value) = arg {
        return Ok(value);
    }
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{raw}`")),
        None => Ok(default),
    }
}

fn env_enum<T: ValueEnum>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => T::from_str(raw.trim(), true)
            .map_err(|err| anyhow::anyhow!("parsing {key} value `{raw}`: {err}")),
        None => Ok(default),
    }
}
