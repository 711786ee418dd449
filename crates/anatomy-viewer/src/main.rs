//! Anatomy Viewer - native entry point
//!
//! The web build starts from `lib.rs`; this binary opens a desktop window
//! backed by a local JSON data file or the built-in demo content.

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use anatomy_core::config::{load_config, save_default_config};
    use anatomy_core::model::{Access, ModelId, Role, ViewMode};
    use anatomy_viewer::{open_store, run, LaunchOptions};
    use anyhow::{Context, Result};
    use clap::Parser;
    use std::path::PathBuf;
    use tracing::info;
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[derive(Parser, Debug)]
    #[command(name = "anatomy-viewer")]
    #[command(about = "Interactive 3D anatomy viewer with shared pins and private notes")]
    #[command(version)]
    struct Args {
        /// Path to configuration file
        #[arg(short, long, default_value = "anatomy-viewer.toml")]
        config: PathBuf,

        /// Model to open
        #[arg(short, long, default_value = anatomy_viewer::DEFAULT_MODEL)]
        model: String,

        /// Interaction mode (view, edit)
        #[arg(long, default_value = "view")]
        mode: ViewMode,

        /// Role of the signed-in user (student, professor)
        #[arg(long, default_value = "student")]
        role: Role,

        /// User identifier notes are stored under
        #[arg(short, long, default_value = "local-user")]
        user: String,

        /// JSON data file, overrides the configured one
        #[arg(long)]
        data_file: Option<String>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,

        /// Write the default configuration to --config and exit
        #[arg(long)]
        write_default_config: bool,
    }

    pub fn main() -> Result<()> {
        let args = Args::parse();

        // RUST_LOG wins over --log-level; wgpu is noisy at info
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{},wgpu=warn,naga=warn", args.log_level.to_lowercase()))
        });
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .finish();

        tracing::subscriber::set_global_default(subscriber)?;

        info!("Anatomy Viewer v{}", env!("CARGO_PKG_VERSION"));

        if args.write_default_config {
            save_default_config(&args.config).with_context(|| {
                format!("failed to write {}", args.config.display())
            })?;
            info!(path = %args.config.display(), "Wrote default configuration");
            return Ok(());
        }

        let mut config = load_config(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?;
        if let Some(data_file) = args.data_file {
            config.backend.data_file = Some(data_file);
        }

        let store = open_store(&config)?;
        let launch = LaunchOptions {
            config,
            model: ModelId::new(args.model),
            mode: args.mode,
            access: Access::new(args.user, args.role),
        };

        run(launch, store);
        Ok(())
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> anyhow::Result<()> {
    native::main()
}

#[cfg(target_arch = "wasm32")]
fn main() {}
