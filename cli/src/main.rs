use {
    ordo_cli::default_layer,
    ordo_cli_args::{CliLayer, ConfigBuilder, EnvLayer, FileLayer},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ConfigBuilder::new()
        .layer(default_layer())
        .layer(FileLayer::toml())
        .layer(EnvLayer::new())
        .layer(CliLayer::new())
        .try_build()
        .unwrap_or_else(|e| {
            eprintln!("invalid configuration: {e}");
            std::process::exit(2);
        });

    std::process::exit(ordo_cli::run(config).await);
}
