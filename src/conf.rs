use anyhow::{Context, bail};
use std::path::PathBuf;

/// Which halves of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// HTTP ingress plus the output-queue sink.
    Producer,
    /// The input-queue enricher.
    Consumer,
    All,
}

impl ServiceRole {
    pub fn runs_producer(self) -> bool {
        matches!(self, ServiceRole::Producer | ServiceRole::All)
    }

    pub fn runs_consumer(self) -> bool {
        matches!(self, ServiceRole::Consumer | ServiceRole::All)
    }
}

impl std::str::FromStr for ServiceRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "producer" => Ok(ServiceRole::Producer),
            "consumer" => Ok(ServiceRole::Consumer),
            "all" => Ok(ServiceRole::All),
            other => bail!("unknown service role '{other}', expected producer, consumer or all"),
        }
    }
}

/// Exchange, queues and routing keys the relay publishes to and consumes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub input_queue: String,
    pub input_routing_key: String,
    pub output_queue: String,
    pub output_routing_key: String,
}

impl Topology {
    /// `(queue, routing_key)` pairs bound to the exchange.
    pub fn bindings(&self) -> [(&str, &str); 2] {
        [
            (self.input_queue.as_str(), self.input_routing_key.as_str()),
            (self.output_queue.as_str(), self.output_routing_key.as_str()),
        ]
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            exchange: "messages.exchange".to_string(),
            input_queue: "input.queue".to_string(),
            input_routing_key: "input".to_string(),
            output_queue: "output.queue".to_string(),
            output_routing_key: "output".to_string(),
        }
    }
}

/// Client TLS material for the broker connection.
///
/// With an identity the client authenticates by certificate (SASL EXTERNAL)
/// instead of the user and password in the DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PKCS#12 bundle with the client certificate and key.
    pub identity_path: Option<PathBuf>,
    pub identity_password: String,
    /// PEM file with the CA chain used to verify the broker.
    pub ca_cert_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Read `AMQP_TLS_IDENTITY`, `AMQP_TLS_PASSWORD` and `AMQP_CA_CERT`.
    ///
    /// Returns `None` when neither an identity nor a CA certificate is set.
    ///
    /// # Errors
    /// Returns an error if a password is given without an identity.
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        let identity_path = std::env::var_os("AMQP_TLS_IDENTITY").map(PathBuf::from);
        let identity_password = std::env::var("AMQP_TLS_PASSWORD").ok();
        let ca_cert_path = std::env::var_os("AMQP_CA_CERT").map(PathBuf::from);

        if identity_path.is_none() && identity_password.is_some() {
            bail!("AMQP_TLS_PASSWORD is set but AMQP_TLS_IDENTITY is not");
        }
        if identity_path.is_none() && ca_cert_path.is_none() {
            return Ok(None);
        }

        Ok(Some(Self {
            identity_path,
            identity_password: identity_password.unwrap_or_default(),
            ca_cert_path,
        }))
    }

    pub fn uses_external_auth(&self) -> bool {
        self.identity_path.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub amqp_dsn: String,
    pub tls: Option<TlsConfig>,
    pub topology: Topology,
    pub declare_topology: bool,
    pub role: ServiceRole,
    pub http_port: u16,
}

impl Config {
    /// Build a configuration from environment variables.
    ///
    /// Required variables: `AMQP_DSN`.
    /// Optional variables: `EXCHANGE`, `INPUT_QUEUE`, `INPUT_ROUTING_KEY`,
    /// `OUTPUT_QUEUE`, `OUTPUT_ROUTING_KEY`, `DECLARE_TOPOLOGY`, `SERVICE_ROLE`,
    /// `HTTP_PORT`, and the TLS variables read by [`TlsConfig::from_env`].
    ///
    /// # Errors
    /// Returns an error if `AMQP_DSN` is missing, if `SERVICE_ROLE` is not a
    /// known role, if `DECLARE_TOPOLOGY` is not a boolean, or if the TLS
    /// variables are inconsistent.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Topology::default();
        let var_or = |name: &str, default: String| std::env::var(name).unwrap_or(default);

        let topology = Topology {
            exchange: var_or("EXCHANGE", defaults.exchange),
            input_queue: var_or("INPUT_QUEUE", defaults.input_queue),
            input_routing_key: var_or("INPUT_ROUTING_KEY", defaults.input_routing_key),
            output_queue: var_or("OUTPUT_QUEUE", defaults.output_queue),
            output_routing_key: var_or("OUTPUT_ROUTING_KEY", defaults.output_routing_key),
        };

        Ok(Self {
            amqp_dsn: std::env::var("AMQP_DSN").context("AMQP_DSN environment variable not set")?,
            tls: TlsConfig::from_env().context("Invalid broker TLS settings")?,
            topology,
            declare_topology: match std::env::var("DECLARE_TOPOLOGY") {
                Ok(v) => v
                    .parse()
                    .with_context(|| format!("DECLARE_TOPOLOGY must be true or false, got '{v}'"))?,
                Err(_) => true,
            },
            role: match std::env::var("SERVICE_ROLE") {
                Ok(v) => v.parse().context("Invalid SERVICE_ROLE")?,
                Err(_) => ServiceRole::All,
            },
            http_port: std::env::var("HTTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        })
    }

    /// Whether the DSN selects the in-process broker instead of `RabbitMQ`.
    pub fn uses_memory_broker(&self) -> bool {
        self.amqp_dsn.starts_with("memory://")
    }
}
