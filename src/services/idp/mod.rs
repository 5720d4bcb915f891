pub mod client;
pub mod credential;

pub use client::{IdpClient, IdpError, PermissionsApi, TokenEndpoint, TokenGrant};
pub use credential::{CredentialError, CredentialProvider, ServiceCredential};
