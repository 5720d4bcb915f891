/*
 * Responsibility
 * - v1 の URL 構造を定義
 * - /health (疎通用), /authorize (ゲートウェイ呼び出し)
 */
use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

use crate::api::v1::handlers::{authorize::authorize, health::health};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/authorize", post(authorize))
}
