/*!
 * Verified-claims extractor
 *
 * Responsibility:
 * - authenticate stage が request extension に置いた AuthCtx (検証済み Claims) を handler に渡す
 * - 取り出しに失敗したら AuthError (401)。protect() の外で使うのは route 定義のミス
 */

mod core;
mod types;

pub use core::AuthCtxExtractor;
pub use types::AuthCtx;
