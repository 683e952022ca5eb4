use argocd_operator::controllers::argocd_controller::{self, State};
use argocd_operator::util::{config::OperatorConfig, telemetry};
use tracing::info;

mod handlers;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    let config = OperatorConfig::from_env()?;
    info!(
        "Starting argocd-operator (dex disabled: {}, cluster config namespaces: {:?})",
        config.disable_dex, config.cluster_config_namespaces
    );

    // Initiatilize Kubernetes controller state
    let state = State::default();
    let controller = argocd_controller::run(state.clone(), config);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server::start_server(state)).1?;
    Ok(())
}
