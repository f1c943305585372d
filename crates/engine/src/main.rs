use cartsync_core::UserId;
use cartsync_engine::{AuthChange, CartEngine, EngineConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    cartsync_observability::init();

    let config = EngineConfig::from_env();
    tracing::info!(api_url = %config.api_url, "starting cart engine");

    let engine = CartEngine::from_config(&config).await?;

    let change = match std::env::var("CART_USER_ID") {
        Ok(raw) => AuthChange::Authenticated(raw.parse::<UserId>()?),
        Err(_) => {
            tracing::warn!("CART_USER_ID not set; running as guest");
            AuthChange::Anonymous
        }
    };

    let outcome = engine.on_auth_changed(change).await;
    tracing::info!(?outcome, "reconciliation finished");

    let state = engine.state();
    println!("{}", serde_json::to_string_pretty(&state)?);
    println!("{}", serde_json::to_string_pretty(&engine.checkout().quote())?);

    Ok(())
}
