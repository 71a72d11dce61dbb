//! 访问统计中间件

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use folio_tracking::HitRequest;

use crate::state::AppState;

/// 页面成功返回后记录访问
pub async fn track_hits(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let hit = (request.method() == Method::GET).then(|| {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        HitRequest::new(request.uri().clone(), request.headers().clone(), peer)
    });

    let response = next.run(request).await;

    if let Some(hit) = hit {
        if response.status().is_success() {
            state.tracker.hit(&hit);
        }
    }

    response
}
