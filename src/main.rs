use std::path::Path;

use clap::Parser;
use color_eyre::{Result, eyre::Context};
use trellis::{
    config::{AppConfigValidator, load_config},
    metrics, tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "trellis.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "trellis.toml")]
        config: String,
    },
}

const DEFAULT_CONFIG: &str = r#"# Trellis configuration
#
# Every key is optional; the values below are the defaults.
# Any key can be overridden from the environment, e.g.
#   TRELLIS__ROUTING__REDIRECT_STATUS=301

# Render error details in 500 responses
debug = false

[routing]
# Redirect /items to /items/ (and back) when only the other form is routed
redirect_trailing_slash = true
# 301, 302, 303, 307 or 308
redirect_status = 308

[middleware]
# Messages buffered between an inner app and a dispatch function
queue_capacity = 16

[websocket]
# Close code sent to websocket sessions no route matched
not_found_close_code = 1000

[logging]
# EnvFilter directive; RUST_LOG takes precedence
level = "info"
json = false
include_spans = false
"#;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Commands::Validate { config } => validate_config_command(&config).await,
        Commands::Init { config } => init_config_command(&config).await,
    }
}

/// Load and validate a configuration file, printing a summary.
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match AppConfigValidator::validate(&config) {
        Ok(()) => {
            tracing_setup::init_tracing_from_config(&config.logging)
                .wrap_err("Failed to initialize tracing")?;
            metrics::init_metrics().wrap_err("Failed to initialize metrics")?;
            tracing::debug!(?config, "Configuration loaded");

            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Debug: {}", config.debug);
            println!(
                "   • Trailing-slash redirect: {} ({})",
                config.routing.redirect_trailing_slash, config.routing.redirect_status
            );
            println!("   • Middleware queue capacity: {}", config.middleware.queue_capacity);
            println!(
                "   • WebSocket not-found close code: {}",
                config.websocket.not_found_close_code
            );
            println!(
                "   • Logging: level={} json={}",
                config.logging.level, config.logging.json
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • redirect_status must be one of 301, 302, 303, 307, 308");
            println!("   • queue_capacity must be at least 1");
            println!("   • websocket close codes live in 1000-4999");
            println!("   • logging.level takes EnvFilter syntax (e.g. 'info,trellis=debug')");
            std::process::exit(1);
        }
    }
}

/// Write a default configuration file, refusing to overwrite an existing one.
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, DEFAULT_CONFIG)
        .await
        .wrap_err_with(|| format!("Failed to write {config_path}"))?;

    println!("✅ Created configuration file: {config_path}");
    println!("   Run `trellis validate --config {config_path}` to check it.");
    Ok(())
}
