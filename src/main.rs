use std::sync::Arc;

use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::server::{AppState, RouteError};
use crate::commands::{Dispatcher, UniformDelta};
use crate::db::prelude::{StoreError, UserId};
use crate::ledger::Ledger;
use crate::scheduler::CooldownScheduler;
use crate::util::env::{self, EnvErr, Var};
use crate::util::telemetry::{self, TelemetryErr};

mod api;
mod commands;
mod constants;
mod db;
mod ledger;
mod scheduler;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Telemetry(#[from] TelemetryErr),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Route(#[from] RouteError),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry_registry = telemetry::Telemetry::new().await?.register();

    tracing::info!("starting main application");

    let port = env::parse_port(var!(Var::ServerApiPort).await?)?;
    let admin = env::parse_admin(var!(Var::AdminUserId).await?)?.map(UserId);
    let tz = env::parse_timezone(var!(Var::ResetTimezone).await?)?;
    let reset_at = env::parse_reset_at(var!(Var::ResetAt).await?)?;
    let internal_token = var!(Var::InternalToken).await?;

    if admin.is_none() {
        tracing::warn!("no ADMIN_USER_ID configured, /reset is disabled");
    }
    if internal_token.is_empty() {
        tracing::warn!("no INTERNAL_TOKEN configured, internal routes will reject every request");
    }

    let store = db::connect(var!(Var::DatabaseUrl).await?).await?;
    let ledger = Arc::new(Ledger::new(store));
    let dispatcher = Dispatcher::new(ledger.clone(), Arc::new(UniformDelta), admin);

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    handles.push(CooldownScheduler::new(ledger, tz, reset_at, shutdown.clone()).spawn());

    let state = Arc::new(AppState {
        dispatcher,
        internal_token: internal_token.to_string(),
    });
    handles.extend(api::server::start_server(state, port, shutdown.clone()).await?);

    let signal_token = shutdown.clone();
    tokio::task::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received ctrl-c, shutting down"),
            Err(e) => tracing::error!(error = ?e, "failed to listen for ctrl-c, shutting down"),
        }
        signal_token.cancel();
    });

    for res in join_all(handles).await {
        if let Err(e) = res {
            tracing::error!(error = ?e, "task panicked or was aborted");
        }
    }

    telemetry_registry.shutdown();
    Ok(())
}
