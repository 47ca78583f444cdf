//! kubepack CLI - resolve bundles, build orders and realize them on Kubernetes

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use kubepack_kube::DriverKind;
use kubepack_publish::ScriptFlavor;

mod commands;
mod config;
mod display;
mod error;
mod exit_codes;
mod logging;
mod server;

use config::{ConfigFile, Settings};
use display::OutputFormat;
use error::Result;

#[derive(Parser)]
#[command(name = "kubepack")]
#[command(version)]
#[command(about = "Bundle-aware Helm chart installer", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    globals: GlobalArgs,
}

/// Flags shared by every subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file (default: $XDG_CONFIG_HOME/kubepack/config.yaml)
    #[arg(long, global = true, env = "KUBEPACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Blob store for orders and scripts (gs://, s3://, azblob://, file://)
    #[arg(long, global = true, env = "KUBEPACK_BLOB_URL")]
    pub blob_url: Option<String>,

    /// Public URL prefix of the blob store
    #[arg(long, global = true, env = "KUBEPACK_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Chart archive cache directory
    #[arg(long, global = true, env = "KUBEPACK_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Local charts directory consulted before remote repositories
    #[arg(long, global = true, env = "UI_WIZARD_CHARTS_DIR")]
    pub charts_dir: Option<PathBuf>,

    /// Release storage driver: secrets or applications
    #[arg(long, global = true, env = "KUBEPACK_STORAGE_DRIVER")]
    pub storage_driver: Option<DriverKind>,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,
}

/// A chart in a repository
#[derive(Args, Debug, Clone)]
struct ChartArgs {
    /// Chart repository URL
    #[arg(long)]
    url: String,

    /// Chart name
    #[arg(long)]
    name: String,

    /// Chart version (default: latest)
    #[arg(long, default_value = "")]
    version: String,
}

/// Where to read an order from
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
struct OrderSource {
    /// Order file
    #[arg(short = 'f', long = "file")]
    file: Option<PathBuf>,

    /// UID of an order stored in the blob store
    #[arg(long)]
    uid: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Flavor {
    Helm3,
    Yaml,
}

impl From<Flavor> for ScriptFlavor {
    fn from(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Helm3 => ScriptFlavor::Helm3,
            Flavor::Yaml => ScriptFlavor::Yaml,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a bundle chart into a selectable view
    View {
        #[command(flatten)]
        chart: ChartArgs,

        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Show a chart's metadata, values and schema
    Package {
        #[command(flatten)]
        chart: ChartArgs,

        #[arg(short, long, value_enum, default_value_t)]
        output: OutputFormat,
    },

    /// Build an order from an edited bundle view
    Order {
        /// Bundle view file, as printed by `kubepack view`
        view: PathBuf,

        /// License injected into charts that declare a license key path
        #[arg(long, env = "KUBEPACK_LICENSE_KEY", hide_env_values = true)]
        license_key: Option<String>,

        /// Kubernetes version constraint, e.g. ">= 1.16"
        #[arg(long)]
        kube_version: Option<String>,

        /// Store the order in the blob store and print its URL
        #[arg(long)]
        publish: bool,
    },

    /// Install or upgrade every release of an order
    Install {
        #[command(flatten)]
        order: OrderSource,

        /// Per-release timeout (e.g. 5m, 1h30m)
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<std::time::Duration>,
    },

    /// Remove every release of an order, last first
    Uninstall {
        #[command(flatten)]
        order: OrderSource,
    },

    /// Publish an install script for an order
    Script {
        #[command(flatten)]
        order: OrderSource,

        #[arg(long, value_enum, default_value = "helm3")]
        flavor: Flavor,
    },

    /// Check that the current user may create everything an order needs
    Audit {
        #[command(flatten)]
        order: OrderSource,

        /// Verb to check
        #[arg(long, default_value = "create")]
        verb: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Tabulate the features of several bundles
    Compare {
        /// Repository holding the bundles
        #[arg(long, required_unless_present = "product")]
        url: Option<String>,

        /// Bundle chart names, one column each
        #[arg(long = "bundle", required_unless_present = "product")]
        bundles: Vec<String>,

        #[arg(long, default_value = "")]
        version: String,

        /// Catalog product as owner/key
        #[arg(long, conflicts_with_all = ["url", "bundles"])]
        product: Option<String>,

        /// Machine-readable output instead of a table
        #[arg(short, long, value_enum)]
        output: Option<OutputFormat>,
    },

    /// Serve the HTTP API
    Serve {
        /// Listen address (default: 0.0.0.0:4000)
        #[arg(long, env = "KUBEPACK_BIND")]
        bind: Option<SocketAddr>,

        /// License injected into orders created over HTTP
        #[arg(long, env = "KUBEPACK_LICENSE_KEY", hide_env_values = true)]
        license_key: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                exit_codes::ERROR
            } else {
                exit_codes::SUCCESS
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    logging::init(cli.globals.debug);

    if let Err(e) = run(cli).await {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let file = ConfigFile::load(cli.globals.config.as_deref())?;
    let settings = Settings::resolve(&cli.globals, file)?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    match cli.command {
        Commands::View { chart, output } => {
            commands::view::run(&settings, &chart.into(), output).await
        }

        Commands::Package { chart, output } => {
            commands::package::run(&settings, &chart.into(), output).await
        }

        Commands::Order {
            view,
            license_key,
            kube_version,
            publish,
        } => {
            commands::order::run(
                &settings,
                &view,
                license_key.as_deref(),
                kube_version.as_deref(),
                publish,
            )
            .await
        }

        Commands::Install { order, timeout } => {
            let order = commands::load_order(&settings, order.resolve()?).await?;
            commands::install::run(&settings, &order, timeout, &cancel).await
        }

        Commands::Uninstall { order } => {
            let order = commands::load_order(&settings, order.resolve()?).await?;
            commands::uninstall::run(&settings, &order, &cancel).await
        }

        Commands::Script { order, flavor } => {
            let order = commands::load_order(&settings, order.resolve()?).await?;
            commands::script::run(&settings, &order, flavor.into()).await
        }

        Commands::Audit { order, verb, json } => {
            let order = commands::load_order(&settings, order.resolve()?).await?;
            commands::audit::run(&settings, &order, &verb, json).await
        }

        Commands::Compare {
            url,
            bundles,
            version,
            product,
            output,
        } => {
            let target = match (product, url) {
                (Some(product), _) => commands::compare::Target::Product(product),
                (None, Some(url)) => commands::compare::Target::Bundles { url, bundles, version },
                (None, None) => {
                    return Err(error::CliError::input("pass --url with --bundle, or --product"));
                }
            };
            commands::compare::run(&settings, target, output).await
        }

        Commands::Serve { bind, license_key } => {
            commands::serve::run(&settings, bind.unwrap_or(settings.bind), license_key, cancel).await
        }
    }
}

impl From<ChartArgs> for kubepack_core::ChartRef {
    fn from(args: ChartArgs) -> Self {
        kubepack_core::ChartRef::new(args.url, args.name, args.version)
    }
}

impl OrderSource {
    fn resolve(self) -> Result<commands::OrderSource> {
        match (self.file, self.uid) {
            (Some(path), None) => Ok(commands::OrderSource::File(path)),
            (None, Some(uid)) => Ok(commands::OrderSource::Stored(uid)),
            _ => Err(error::CliError::input("pass exactly one of --file or --uid")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_order_source_is_required() {
        assert!(Cli::try_parse_from(["kubepack", "install"]).is_err());
        assert!(
            Cli::try_parse_from(["kubepack", "install", "-f", "order.yaml", "--uid", Uuid::nil().to_string().as_str()])
                .is_err()
        );
        let cli = Cli::try_parse_from(["kubepack", "install", "-f", "order.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Install { .. }));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kubepack",
            "script",
            "--uid",
            "5c8d1e2a-3b4f-4c6d-8e9f-0a1b2c3d4e5f",
            "--flavor",
            "yaml",
            "--storage-driver",
            "applications",
        ])
        .unwrap();
        assert_eq!(cli.globals.storage_driver, Some(DriverKind::Applications));
        assert!(matches!(
            cli.command,
            Commands::Script {
                flavor: Flavor::Yaml,
                ..
            }
        ));
    }
}
