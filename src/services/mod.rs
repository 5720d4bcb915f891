pub mod auth;
pub mod authorizer;
pub mod cache;
pub mod idp;
pub mod permissions;
pub mod policy;

pub use authorizer::{Authorizer, AuthorizerRequest};
