/// Application name
pub const APP_NAME: &str = "Vellum";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Argon2 salt size in bytes (content keys and verifiers use separate salts)
pub const SALT_SIZE: usize = 16;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Password verifier hash size in bytes
pub const VERIFIER_SIZE: usize = 32;

/// Current encrypted blob layout version
pub const BLOB_VERSION: u8 = 1;

/// Current password artifact format tag
pub const ARTIFACT_VERSION: &str = "v1";

/// Minimum password length accepted when protecting a note
pub const MIN_PASSWORD_LEN: usize = 8;

/// Default Argon2id parameters (memory in KiB, iterations, lanes)
pub const DEFAULT_KDF_MEMORY_KIB: u32 = 19 * 1024;
pub const DEFAULT_KDF_ITERATIONS: u32 = 2;
pub const DEFAULT_KDF_PARALLELISM: u32 = 1;

/// Upper bounds for KDF parameters read back from stored data.
pub const MAX_KDF_MEMORY_KIB: u32 = 1024 * 1024;
pub const MAX_KDF_ITERATIONS: u32 = 64;
pub const MAX_KDF_PARALLELISM: u32 = 16;

/// Snapshot schema version written by this build
pub const SNAPSHOT_VERSION: &str = "2.0.0";

/// Storage keys
pub const STORAGE_KEY_DATA: &str = "vellum-data";
pub const STORAGE_KEY_PREFERENCES: &str = "vellum-preferences";

/// Serialized snapshot budget checked before every write (4.5 MiB)
pub const DEFAULT_SIZE_BUDGET: usize = 4_718_592;

/// Assumed quota of the backing medium (5 MiB)
pub const DEFAULT_BACKEND_QUOTA: usize = 5 * 1024 * 1024;

/// Autosave interval in seconds: default and accepted range
pub const DEFAULT_AUTOSAVE_INTERVAL_SECS: u64 = 30;
pub const MIN_AUTOSAVE_INTERVAL_SECS: u64 = 10;
pub const MAX_AUTOSAVE_INTERVAL_SECS: u64 = 300;
