//! Facilitator HTTP entrypoint.
//!
//! Launches the axum server exposing the payment interface:
//! - `GET /health` – liveness and chain id
//! - `GET /supported` – settleable payment kinds
//! - `POST /verify` – verify a payment payload against requirements
//! - `POST /settle` – settle an accepted payment on-chain
//!
//! Environment is loaded from `.env`; `HOST`/`PORT` control binding, `RPC_URL`
//! and `EVM_PRIVATE_KEY` configure the chain connection, and `OTEL_*`
//! variables enable trace export.

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use agentmesh::chain::EvmChainProvider;
use agentmesh::config::Config;
use agentmesh::facilitator_local::FacilitatorLocal;
use agentmesh::handlers;
use agentmesh::sig_down::SigDown;
use agentmesh::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::init();

    let config = Config::load()?;
    let network = config.network()?;
    let signer = config.signer()?;

    let provider = EvmChainProvider::connect(
        config.rpc_url.clone(),
        signer,
        network,
        config.eip1559,
        config.receipt_timeout_secs,
    );
    let facilitator = FacilitatorLocal::new(Arc::new(provider));
    let axum_state = Arc::new(facilitator);

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, %network, "starting facilitator");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let sig_down = SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}
