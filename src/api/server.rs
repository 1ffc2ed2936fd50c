use crate::api::routes;
use crate::config::SharedConfig;
use crate::notify::BroadcastNotifier;
use crate::renewal::{DynClock, RenewalScheduler};
use crate::shutdown::Shutdown;
use std::future::Future;

#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub scheduler: RenewalScheduler,
    pub notifier: BroadcastNotifier,
    pub clock: DynClock,
}

/// Serve the admin API on [`Config::api_bind_addr`][crate::config::Config::api_bind_addr]
/// until `shutdown` is requested.
pub fn new(state: AppState, mut shutdown: Shutdown) -> impl Future<Output = hyper::Result<()>> {
    let addr = state.config.api_bind_addr;
    async move {
        axum::Server::try_bind(&addr)?
            .serve(routes::router(state).into_make_service())
            .with_graceful_shutdown(async move { shutdown.requested().await })
            .await
    }
}
