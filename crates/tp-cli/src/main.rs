use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tp_core::Config;
use tp_ebpf::{
    CommandRunner, Loader, OutputSinks, PodConfig, default_programs, local_pod_ips_path,
    mark_pod_ips_path,
};
use tp_iptables::{build_nat_table, diff_ruleset};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tproxy")]
#[command(version, about = "Transparent proxy traffic redirection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the NAT ruleset in iptables-restore format
    Render {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Annotate the output with section headers and comments
        #[arg(short, long)]
        verbose: bool,
    },
    /// Compare an existing ruleset against the rendered one
    Diff {
        /// Output of iptables-save -t nat
        #[arg(long)]
        current: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// eBPF program management
    Ebpf {
        #[command(subcommand)]
        action: EbpfAction,
    },
    /// BPF filesystem management
    Bpffs {
        #[command(subcommand)]
        action: BpffsAction,
    },
}

#[derive(Subcommand)]
enum EbpfAction {
    /// Load and attach every redirection program
    Load {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum BpffsAction {
    /// Mount the BPF filesystem if the path is still empty
    Init {
        #[arg(long, default_value = "/run/kuma/bpf")]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render { config, verbose } => {
            let config = load_config(config.as_deref())?;
            let table = build_nat_table(&config.redirect);
            println!("{}", table.build(verbose || config.verbose));
        }
        Commands::Diff { current, config } => {
            let config = load_config(config.as_deref())?;
            let existing = std::fs::read_to_string(&current)
                .with_context(|| format!("reading {}", current.display()))?;
            let desired = build_nat_table(&config.redirect).build(false);

            let result = diff_ruleset(&existing, &desired);
            match result.diff {
                None => println!("✅ Ruleset is up to date"),
                Some(diff) => {
                    println!("📝 Ruleset differs:\n");
                    print!("{}", diff);
                    std::process::exit(1);
                }
            }
        }
        Commands::Config { config, json } => {
            let config = load_config(config.as_deref())?;
            if json {
                println!("{}", config.to_json()?);
            } else {
                print!("{}", config.to_yaml()?);
            }
        }
        Commands::Ebpf { action } => match action {
            EbpfAction::Load { config } => {
                let config = load_config(config.as_deref())?;
                tokio::runtime::Runtime::new()?.block_on(async { load_programs(&config).await })?;
            }
        },
        Commands::Bpffs { action } => match action {
            BpffsAction::Init { path } => init_bpffs(&path)?,
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn load_programs(config: &Config) -> anyhow::Result<()> {
    if !config.ebpf.enabled {
        anyhow::bail!("ebpf is disabled in the configuration");
    }

    // the item caps must hold before anything touches the maps
    let pod_config = PodConfig::from_config(config)?;
    tracing::debug!(
        ?pod_config,
        local_pod_ips = %local_pod_ips_path(&config.ebpf.bpffs_path).display(),
        mark_pod_ips = %mark_pod_ips_path(&config.ebpf.bpffs_path).display(),
        "Computed pod config record"
    );

    let runner = CommandRunner::new(Duration::from_secs(config.ebpf.timeout_secs));
    let cancel = runner.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling remaining loader programs");
            cancel.cancel();
        }
    });

    let loader = Loader::new(runner, &config.ebpf.programs_source_path)
        .with_policy(config.ebpf.policy);
    let mut sinks = OutputSinks::stdio();

    loader
        .load_and_attach(&default_programs(), config, &mut sinks)
        .await?;

    println!("✅ Redirection programs loaded and attached");
    Ok(())
}

#[cfg(target_os = "linux")]
fn init_bpffs(path: &Path) -> anyhow::Result<()> {
    tp_ebpf::init_bpffs_maybe(path, &tp_ebpf::BpfMounter)?;
    println!("✅ BPF file system ready at {}", path.display());
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn init_bpffs(_path: &Path) -> anyhow::Result<()> {
    anyhow::bail!("the BPF file system is only available on Linux")
}
