//! CIDR-based IP filter. Blacklist takes precedence over whitelist; when
//! enabled and non-empty, the whitelist makes the filter default-deny.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use crate::app_state::SharedState;
use crate::error::facade_error;
use crate::net::{cidr_contains, client_ip};

pub async fn ip_filter_middleware(
    State(state): State<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let filter = &state.config.ip_filter;
    if !filter.enabled {
        return next.run(req).await;
    }

    let Some(ip) = client_ip(req.headers(), connect_info) else {
        return next.run(req).await;
    };

    if filter.blacklist.iter().any(|c| cidr_contains(c, &ip)) {
        return facade_error(StatusCode::FORBIDDEN, "FORBIDDEN", format!("{ip} is blocked"), None);
    }
    if !filter.whitelist.is_empty() && !filter.whitelist.iter().any(|c| cidr_contains(c, &ip)) {
        return facade_error(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            format!("{ip} is not allow-listed"),
            None,
        );
    }

    next.run(req).await
}
