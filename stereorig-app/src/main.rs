//! Stereorig
//!
//! Captures stereo pairs from two cameras, reconstructs a point cloud per
//! frame and publishes it on the local network.

use clap::Parser;
use stereorig_app::{Args, RigConfig, app};
use tracing::error;

fn init_logging(level: &str) {
    #[cfg(feature = "tracy")]
    {
        use tracing_subscriber::Layer;
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;
        tracing_subscriber::registry()
            .with(tracing_tracy::TracyLayer::default())
            .with(
                tracing_subscriber::fmt::layer().with_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
                ),
            )
            .init();
    }

    #[cfg(not(feature = "tracy"))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
            )
            .with_target(false)
            .init();
    }
}

fn main() {
    let args = Args::parse();

    if args.list_cameras {
        match app::list_cameras() {
            Ok(cameras) => {
                for (id, name) in cameras {
                    println!("{}  {}", id, name);
                }
                return;
            }
            Err(e) => {
                eprintln!("Failed to list cameras: {}", e);
                std::process::exit(1);
            }
        }
    }

    let config = match RigConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.log_level);

    match app::run(&config) {
        Ok(outcome) => std::process::exit(outcome.exit_code()),
        Err(e) => {
            error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    }
}
