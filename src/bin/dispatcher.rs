use anyhow::Result;
use relay::app::AppMode;
use relay::common::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "relay-dispatcher",
        "Relay Dispatcher：按计划运行回购、创作者支付与指标生产者",
        Vec::new(),
        AppMode::Dispatcher,
    )
    .await
}
