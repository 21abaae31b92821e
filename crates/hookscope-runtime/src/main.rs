//! hookscope: live, memory-only dashboard for AI assistant hook events.
//! One binary holding the daemon (tailing, aggregation, UDS server) and the
//! client subcommands that query it.

use clap::Parser;

mod cli;
mod client;
mod cmd_chart;
mod cmd_events;
mod cmd_watch;
mod daemon;
mod render;
mod server;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Chart(cli::ChartOpts::default()));
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("HOOKSCOPE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("hookscope daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Chart(opts) => {
            let use_color = render::resolve_color(&opts.color);
            cmd_chart::cmd_chart(&socket_path, opts.json, use_color).await?;
        }
        cli::Command::Watch(opts) => {
            cmd_watch::cmd_watch(&socket_path, opts.interval, &opts.color).await?;
        }
        cli::Command::Recent(opts) => {
            let use_color = render::resolve_color("auto");
            cmd_events::cmd_recent(&socket_path, opts.limit, opts.json, use_color).await?;
        }
        cli::Command::Tail => client::cmd_tail(&socket_path).await?,
        cli::Command::Filters => cmd_events::cmd_filters(&socket_path).await?,
        cli::Command::Range(opts) => cmd_events::cmd_range(&socket_path, opts.range).await?,
        cli::Command::Clear => cmd_events::cmd_clear(&socket_path).await?,
        cli::Command::Status => cmd_events::cmd_status(&socket_path).await?,
    }

    Ok(())
}
