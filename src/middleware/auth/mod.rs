/*
 * Responsibility
 * - route 単位で authenticate → authorize を掛ける
 * - authenticate が外側。authorize は AuthCtx が無ければ policy を呼ばない
 */
pub mod authenticate;
pub mod authorize;

use axum::{Router, middleware};
use tower::ServiceBuilder;

use crate::services::auth::policy::Rule;
use crate::state::AppState;

pub use authorize::AuthorizeState;

/// Protect every route of `router` with authentication plus `rule`.
///
/// ```ignore
/// let admin = Router::new().route("/users", post(create_user));
/// let admin = middleware::auth::protect(admin, state.clone(), Rule::AdminOnly);
/// ```
pub fn protect(router: Router<AppState>, state: AppState, rule: Rule) -> Router<AppState> {
    let authorize_state = AuthorizeState {
        app: state.clone(),
        rule,
    };

    // axum 0.8 の from_fn は State extractor を受け取れないため、`from_fn_with_state` で明示的に state を渡す
    router.route_layer(
        ServiceBuilder::new()
            .layer(middleware::from_fn_with_state(
                state,
                authenticate::authenticate,
            ))
            .layer(middleware::from_fn_with_state(
                authorize_state,
                authorize::authorize,
            )),
    )
}
