use anyhow::Result;
use relay::app::AppMode;
use relay::common::{bind_arg, run_cli};

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "relay-api",
        "Relay Operator API：为Worker提供租用与完成接口",
        vec![bind_arg()],
        AppMode::Api,
    )
    .await
}
