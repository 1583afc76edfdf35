use thiserror::Error;
use tracing::{debug, level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Cannot install global tracing subscriber: {0}")]
    SetGlobalDefault(#[from] SetGlobalDefaultError),
}

pub struct TracerOptions {
    pub default_level: LevelFilter,
    pub ansi: bool,
}

impl TracerOptions {
    pub fn new(default_level: LevelFilter) -> Self {
        Self {
            default_level,
            ansi: true,
        }
    }
}

/// This object initialises the stdout tracer, given a TracerOptions struct.
pub struct TracerEngine {
    service_name: String,
}

impl TracerEngine {
    /// Initialises the stdout tracer for the crate
    /// #Arguments
    /// * `options` - The caller-specified instance of TracerOptions.
    /// * `service_name` - The name of the binary being traced.
    /// * `module_name` - The name of the current module.
    /// #Returns
    /// An instance of TracerEngine, or an error if a global subscriber was already set.
    pub fn new(
        options: TracerOptions,
        service_name: &str,
        module_name: &str,
    ) -> Result<Self, TracerError> {
        let stdout_tracer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(options.ansi);

        // RUST_LOG takes precedence over the default level
        let log_filter = EnvFilter::builder()
            .with_default_directive(options.default_level.into())
            .from_env_lossy();

        let subscriber =
            tracing_subscriber::Registry::default().with(stdout_tracer.with_filter(log_filter));

        tracing::subscriber::set_global_default(subscriber)?;
        debug!("Tracer initialised for {service_name} in {module_name}");

        Ok(Self {
            service_name: service_name.to_owned(),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}
