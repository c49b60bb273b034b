use hls_relay::{config::Config, server, upstream::tls::TrustBundle};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let trust = match config.ca_cert_dir.as_deref() {
        Some(dir) => match TrustBundle::load_dir(dir) {
            Ok(bundle) => {
                info!(
                    "Loaded {} CA certificate file(s) from {}",
                    bundle.file_count, dir
                );
                bundle
            }
            Err(e) => {
                warn!("Could not read CA_CERT_DIR {}: {}", dir, e);
                TrustBundle::default()
            }
        },
        None => TrustBundle::default(),
    };

    info!(
        "Starting hls-relay on port {} (proxy path {})",
        config.port, config.proxy_path
    );

    if let Err(e) = server::start(config, trust).await {
        error!("Server exited with error: {}", e);
        std::process::exit(1);
    }
}
