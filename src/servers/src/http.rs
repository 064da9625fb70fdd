// Copyright 2023 FedSQL Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The HTTP transport: one POST endpoint carrying the tagged wire
//! requests, plus a health probe.

use std::net::SocketAddr;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use common_telemetry::{error, info};

use crate::error::{self, Result};
use crate::instance::{error_response, ServerInstanceRef};
use crate::wire::{WireRequest, WireResponse};

pub fn router(instance: ServerInstanceRef) -> Router {
    Router::new()
        .route("/", post(handle_request))
        .route("/health", get(health))
        .with_state(instance)
}

/// Serve until the process receives ctrl-c.
pub async fn serve(instance: ServerInstanceRef, addr: &str) -> Result<()> {
    let socket_addr: SocketAddr = addr.parse().map_err(|e| {
        error::StartServerSnafu {
            addr: addr.to_string(),
            detail: format!("invalid address: {e}"),
        }
        .build()
    })?;
    info!("fedsql listening on {socket_addr}");
    axum::Server::bind(&socket_addr)
        .serve(router(instance).into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .map_err(|e| {
            error::StartServerSnafu {
                addr: addr.to_string(),
                detail: e.to_string(),
            }
            .build()
        })
}

async fn handle_request(
    State(instance): State<ServerInstanceRef>,
    Json(request): Json<WireRequest>,
) -> Json<WireResponse> {
    match instance.handle(request).await {
        Ok(response) => Json(response),
        Err(e) => {
            error!("request failed: {e}");
            Json(error_response(&e))
        }
    }
}

async fn health() -> &'static str {
    "ok"
}
