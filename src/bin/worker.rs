use anyhow::Result;
use relay::app::AppMode;
use relay::common::{run_cli, worker_id_arg};

#[tokio::main]
async fn main() -> Result<()> {
    run_cli(
        "relay-worker",
        "Relay Worker：轮询Operator API并执行意图",
        vec![worker_id_arg()],
        AppMode::Worker,
    )
    .await
}
