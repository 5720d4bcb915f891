/*
 * Responsibility
 * - POST /authorize: ゲートウェイの呼び出しリクエスト → ポリシー判定
 * - ボディが読めれば常に 200 + 判定、読めなければ AppError
 */
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

use crate::{
    error::AppError,
    services::{AuthorizerRequest, policy::PolicyDecision},
    state::AppState,
};

pub async fn authorize(
    State(state): State<AppState>,
    payload: Result<Json<AuthorizerRequest>, JsonRejection>,
) -> Result<Json<PolicyDecision>, AppError> {
    let Json(request) = payload?;

    Ok(Json(state.authorizer.authorize(&request).await))
}
