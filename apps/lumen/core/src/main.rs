use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use lumen_lib::api::ExtensionApi;
use lumen_lib::events::EventBus;
use lumen_lib::extensions::{ExtensionHost, ModuleLoader};
use lumen_lib::settings::{HostPaths, HostSettings};
use lumen_lib::utils::paths::expand_tilde;
use lumen_lib::{logging, Result};

/// Lumen - manage installed editor extensions
#[derive(Parser, Debug)]
#[command(name = "lumen")]
#[command(about = "Extension host for the Lumen editor", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory (defaults to the platform data dir)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<String>,

    /// Bundled extensions directory (defaults to <data-dir>/bundled-extensions)
    #[arg(long, value_name = "DIR")]
    bundled_dir: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed extensions
    List,
    /// Install an unpacked extension directory
    Install {
        /// Directory containing package.json
        path: PathBuf,
    },
    /// Remove a user-installed extension
    Uninstall { id: String },
    /// Enable a disabled extension
    Enable { id: String },
    /// Disable an extension
    Disable { id: String },
}

async fn run(cli: Cli) -> Result<()> {
    let mut paths = match cli.data_dir {
        Some(dir) => HostPaths::new(expand_tilde(&dir)),
        None => HostPaths::default_location()?,
    };
    if let Some(dir) = cli.bundled_dir {
        paths = paths.with_bundled_dir(expand_tilde(&dir));
    }
    let settings = HostSettings::load(paths)?;

    let api = ExtensionApi::new(EventBus::new(), settings.tree.clone());
    let host = ExtensionHost::new(settings.paths.clone(), api, ModuleLoader::new());
    host.discover().await;

    match cli.command {
        Command::List => {
            let extensions = host.list_extensions().await;
            if extensions.is_empty() {
                println!("No extensions installed");
            }
            for ext in extensions {
                let mut flags = Vec::new();
                if ext.is_builtin {
                    flags.push("bundled");
                }
                if ext.is_disabled {
                    flags.push("disabled");
                }
                println!(
                    "{:<40} {:<10} {}",
                    ext.id,
                    ext.manifest.version,
                    flags.join(", ")
                );
            }
        }
        Command::Install { path } => {
            let ext = host.install_from_path(&path).await?;
            println!("Installed {} {}", ext.id, ext.manifest.version);
        }
        Command::Uninstall { id } => {
            host.uninstall(&id).await?;
            println!("Uninstalled {}", id);
        }
        Command::Enable { id } => {
            host.set_extension_disabled(&id, false).await?;
            println!("Enabled {}", id);
        }
        Command::Disable { id } => {
            host.set_extension_disabled(&id, true).await?;
            println!("Disabled {}", id);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
