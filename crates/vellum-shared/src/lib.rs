//! # vellum-shared
//!
//! Types shared by every Vellum crate: the note cipher, note identifiers,
//! the injectable clock and common constants.

pub mod clock;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{Cipher, KdfParams, PasswordArtifact, SessionKey};
pub use error::CryptoError;
pub use types::NoteId;
