pub mod health;
pub mod models;
pub mod session;
pub mod turns;

use axum::Router;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(models::router())
        .merge(session::router())
        .merge(turns::router())
}
