use anyhow::Result;
use clap::Arg;

use relay::app::AppMode;
use relay::common::{base_command, bind_arg, start_application, worker_id_arg, StartupConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = base_command("relay", "链下操作意图队列与调度系统")
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["dispatcher", "worker", "api", "all"])
                .default_value("all"),
        )
        .arg(worker_id_arg())
        .arg(bind_arg())
        .get_matches();

    let app_mode: AppMode = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("all")
        .parse()?;

    start_application(StartupConfig::from_matches(&matches), app_mode).await
}
