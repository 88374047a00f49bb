use args::Args;
use clap::Parser;
use config::Config;
use server::ServeConfig;
use tokio_util::sync::CancellationToken;

mod args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    server::logger::init(&args.log);

    let config = Config::load(&args.config)?;
    let listen_address = args.listen_address(&config);

    log::info!("Loaded configuration from {}", args.config.display());

    let shutdown_signal = CancellationToken::new();

    tokio::spawn({
        let shutdown_signal = shutdown_signal.clone();

        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for the shutdown signal: {e}");
                return;
            }

            log::info!("Shutting down");
            shutdown_signal.cancel();
        }
    });

    server::serve(ServeConfig {
        listen_address,
        config,
        shutdown_signal,
    })
    .await?;

    Ok(())
}
