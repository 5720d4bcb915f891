/*
 * Responsibility
 * - v1 の公開面 (routes() の re-export)
 */
pub mod handlers;
mod routes;

pub use routes::routes;
