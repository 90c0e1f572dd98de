use agri_content::{
    config,
    server::{self, ServerState},
    state::AppContext,
};
use tracing::error;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_tracing();
    let config = config::AppConfig::load()?;
    let ctx = AppContext::from_app_config(config)?;

    let server_state = ServerState::new(ctx.clone());
    let server_task = tokio::spawn(async move {
        if let Err(err) = server::serve(server_state).await {
            error!(error = ?err, "server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    ctx.request_shutdown();

    if let Err(err) = server_task.await {
        error!(error = ?err, "server task join error");
    }

    Ok(())
}
