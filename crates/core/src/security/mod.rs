//! Input sanitization, output validation and sensitive-data encryption.

pub mod crypto;
pub mod gate;
pub mod validator;

pub use crypto::Encryptor;
pub use gate::{SecurityGate, SecurityOptions, ValidatedOutput};
pub use validator::{ContentValidator, ContentViolation, Severity, ValidationResult};
