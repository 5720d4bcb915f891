pub mod bearer;
pub mod jwks;
pub mod validator;

pub use bearer::{BearerError, extract_bearer};
pub use jwks::{JwksError, JwksStore};
pub use validator::{SubjectKind, TokenError, TokenValidator, VerifiedToken};
