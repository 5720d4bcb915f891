/*
 * Responsibility
 * - middleware 層の公開インターフェース
 */
pub mod http;
