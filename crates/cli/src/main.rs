//! Bulk user provisioning host.
//!
//! Runs the CSV provisioning job against a SQLite user directory, and
//! provides subcommands for validating and generating the configuration
//! file and for managing the directory's user stores and tenants.

mod admin;
mod signals;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bulkprov_core::config::{self, ProvisionConfig, UserStoreTarget};
use bulkprov_core::db::{Database, DirectoryDb};
use bulkprov_core::{ProvisionJob, RunReport};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Provision users from CSV files into a user directory.
#[derive(Parser, Debug)]
#[command(
    name = "bulkprov",
    version,
    about = "Provision users from CSV files into a user directory"
)]
struct Cli {
    /// Host home directory the default config and database paths hang off.
    #[arg(long, global = true, env = "BULKPROV_HOME", default_value = ".")]
    home: PathBuf,

    /// Path to the properties file.
    /// [default: <home>/migration/bulk-user-provision/bulk-user-provision-config.properties]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the directory database. [default: <home>/bulkprov.db]
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the provisioning job.
    Run {
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration file.
    Validate,

    /// Generate a default configuration file.
    Init {
        /// Output path. [default: the config path]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage user store domains.
    Stores {
        #[command(subcommand)]
        action: StoresAction,
    },

    /// Manage tenants.
    Tenants {
        #[command(subcommand)]
        action: TenantsAction,
    },

    /// Inspect provisioned users.
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },
}

#[derive(Subcommand, Debug)]
enum StoresAction {
    /// Register a secondary user store domain.
    Add { domain: String },
    /// List registered user stores.
    List,
}

#[derive(Subcommand, Debug)]
enum TenantsAction {
    /// Register a tenant domain.
    Add { domain: String },
    /// List tenants.
    List,
}

#[derive(Subcommand, Debug)]
enum UsersAction {
    /// List provisioned users, newest first.
    List {
        /// Restrict to one tenant domain.
        #[arg(short, long)]
        tenant: Option<String>,

        /// Number of results.
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },
}

impl Cli {
    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| config::default_config_path(&self.home))
    }

    fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.home.join("bulkprov.db"))
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Run { .. } => "info",
        _ => "warn",
    };
    let level = cli.log_level.as_deref().unwrap_or(default_level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    match dispatch(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: &Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Run { json } => cmd_run(cli, *json),
        Commands::Validate => cmd_validate(&cli.config_path()).map(|()| ExitCode::SUCCESS),
        Commands::Init { output } => {
            let output = output.clone().unwrap_or_else(|| cli.config_path());
            cmd_init(&output).map(|()| ExitCode::SUCCESS)
        }
        Commands::Stores { action } => {
            let db = open_database(&cli.database_path())?;
            match action {
                StoresAction::Add { domain } => admin::add_store(&db, domain)?,
                StoresAction::List => admin::list_stores(&db)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tenants { action } => {
            let db = open_database(&cli.database_path())?;
            match action {
                TenantsAction::Add { domain } => admin::add_tenant(&db, domain)?,
                TenantsAction::List => admin::list_tenants(&db)?,
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Users { action } => {
            let db = open_database(&cli.database_path())?;
            match action {
                UsersAction::List { tenant, limit } => {
                    admin::list_users(&db, tenant.as_deref(), *limit)?
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open_database(path: &Path) -> Result<Database> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    let db = Database::new(path).context("failed to open directory database")?;
    db.initialize().context("failed to initialize directory database")?;
    Ok(db)
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_run(cli: &Cli, json: bool) -> Result<ExitCode> {
    let config_path = cli.config_path();
    let config = ProvisionConfig::load_from_file(&config_path)
        .map_err(|e| anyhow::anyhow!("[{}] {}", e.code(), e))
        .context("failed to load configuration")?;

    if !config.enabled {
        info!(path = %config_path.display(), "bulk user provisioning is disabled");
        return Ok(ExitCode::SUCCESS);
    }

    info!("========================================");
    info!("  bulkprov v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", config_path.display());
    info!("CSV directory : {}", config.csv_dir.display());
    info!("Tenant        : {}", config.tenant_domain);
    info!("User store    : {}", describe_store(&config.user_store));
    info!("Pool size     : {}", config.thread_pool_size);
    info!("========================================");

    let db = open_database(&cli.database_path())?;
    let directory = Arc::new(DirectoryDb::new(Arc::new(db)));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.thread_pool_size)
        .build()
        .context("failed to start async runtime")?;

    let job = ProvisionJob::new(Arc::new(config), directory.clone(), directory);
    let cancel = job.shutdown_flag();
    let result = runtime.block_on(async move {
        let handle = job.spawn();
        let wait = handle.wait();
        tokio::pin!(wait);

        tokio::select! {
            result = &mut wait => result,
            _ = signals::wait_for_shutdown() => {
                warn!("shutdown signal received, cancelling provisioning");
                cancel.store(true, Ordering::SeqCst);
                wait.await
            }
        }
    });

    match result {
        Ok(report) => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("failed to serialize report")?
                );
            } else {
                print_report(&report);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!(
                "{}",
                style::error(&format!("[{}] {} error: {}", e.code(), e.kind(), e))
            );
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = match ProvisionConfig::load_from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("  {}", style::error(&format!("[{}] {}", e.code(), e)));
            anyhow::bail!("configuration validation failed");
        }
    };
    println!("  {}", style::success("properties parsed and validated"));

    match std::fs::metadata(&config.csv_dir) {
        Ok(meta) if meta.is_dir() => println!("  {}", style::success("CSV directory exists")),
        _ => println!(
            "  {}",
            style::warn(&format!("CSV directory not found: {}", config.csv_dir.display()))
        ),
    }

    println!();
    println!("{}", style::header("Configuration summary"));
    println!("  Enabled        : {}", config.enabled);
    println!("  User store     : {}", describe_store(&config.user_store));
    println!("  Secondary wait : {} ms", config.secondary_wait.as_millis());
    println!("  Tenant domain  : {}", config.tenant_domain);
    println!("  Rows per fetch : {}", config.rows_per_fetch);
    println!("  Pool size      : {}", config.thread_pool_size);
    println!("  Username field : {}", config.username_field);
    println!("  Password field : {}", config.password_field);
    println!(
        "  Role field     : {}",
        config.role_field.as_deref().unwrap_or("(roles not imported)")
    );
    println!("  CSV directory  : {}", config.csv_dir.display());
    println!("  Claims         : {}", config.claims.len());
    let mut claims: Vec<_> = config.claims.iter().collect();
    claims.sort();
    for (column, uri) in claims {
        println!("    {} -> {}", column, style::dim(uri));
    }
    println!();
    println!("Configuration is valid.");

    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# Bulk user provisioning configuration.

# Run the job at all.
isEnabled=false

# Provision into the primary user store, or into the secondary store named
# by secondaryUserStoreDomain.
isPrimaryUserStore=true
#secondaryUserStoreDomain=LDAP
# Milliseconds to wait for the secondary store to be registered.
waitingTimeForSecondaryUserStore=30000

# Tenant the users are created in.
tenantDomain=carbon.super

# Rows provisioned between progress checkpoints.
noOfRowsFetch=100
# Blocking pool size.
threadPoolSize=4

# Header names of the recognized columns.
usernameField=username
passwordField=password
roleFieldExist=false
roleField=role

# CSV column to claim URI mapping: column,uri;column,uri
claims=email,http://wso2.org/claims/emailaddress;firstName,http://wso2.org/claims/givenname

# Directory holding the CSV files, relative to this file.
#csvDirectory=.
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("{}", style::success(&format!("default configuration written to {}", output.display())));
    println!();
    println!("Next steps:");
    println!("  1. Edit the column names and claim mappings to match your CSV files");
    println!("  2. Place the CSV files next to the config file (or set csvDirectory)");
    println!("  3. Set isEnabled=true");
    println!("  4. Validate with: bulkprov validate --config {}", output.display());

    Ok(())
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn describe_store(target: &UserStoreTarget) -> String {
    match target {
        UserStoreTarget::Primary => "primary".to_string(),
        UserStoreTarget::Secondary { domain } => format!("secondary ({})", domain),
    }
}

fn print_report(report: &RunReport) {
    println!();
    println!("{}", style::header("Provisioning complete"));
    println!("  Files read       : {}", report.files);
    println!("  Rows read        : {}", report.rows_read);
    println!("  Duplicates       : {}", report.duplicates_dropped);
    println!("  No username      : {}", report.skipped_without_username);
    println!("  Users created    : {}", report.users_created);
    println!("  Users failed     : {}", style::failures(report.users_failed));
    println!("  Read time        : {} ms", report.read_ms);
    println!("  Provision time   : {} ms", report.provision_ms);
    println!("  Started at       : {}", report.started_at);
    if let Some(ref completed) = report.completed_at {
        println!("  Completed at     : {}", completed);
    }
}
