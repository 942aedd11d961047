//! Host configuration loaded from environment variables.
//!
//! All settings have defaults so the host starts with zero configuration.

use std::path::PathBuf;
use std::str::FromStr;

use vellum_shared::KdfParams;
use vellum_store::StoreConfig;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Directory holding `vellum.db`.
    /// Env: `VELLUM_DATA_DIR`
    /// Default: platform data directory.
    pub data_dir: Option<PathBuf>,

    /// Env: `VELLUM_SIZE_BUDGET` (bytes), `VELLUM_BACKEND_QUOTA` (bytes)
    pub store: StoreConfig,

    /// Argon2id cost for newly protected notes.
    /// Env: `VELLUM_KDF_MEMORY_KIB`, `VELLUM_KDF_ITERATIONS`,
    /// `VELLUM_KDF_PARALLELISM`
    pub kdf: KdfParams,
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("VELLUM_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = Some(PathBuf::from(dir));
            }
        }

        parse_into(&lookup, "VELLUM_SIZE_BUDGET", &mut config.store.size_budget);
        parse_into(&lookup, "VELLUM_BACKEND_QUOTA", &mut config.store.backend_quota);

        let mut kdf = config.kdf;
        parse_into(&lookup, "VELLUM_KDF_MEMORY_KIB", &mut kdf.memory_kib);
        parse_into(&lookup, "VELLUM_KDF_ITERATIONS", &mut kdf.iterations);
        parse_into(&lookup, "VELLUM_KDF_PARALLELISM", &mut kdf.parallelism);
        match kdf.validate() {
            Ok(()) => config.kdf = kdf,
            Err(e) => tracing::warn!(error = %e, "Invalid KDF parameters, using defaults"),
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(value) = lookup(key) else {
        return;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!(key, value = %value, "Invalid value, using default"),
    }
}
