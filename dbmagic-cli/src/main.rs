use clap::{Parser, Subcommand, ValueEnum};
use dbmagic::config::{ConfigLoader, ExpandEnv};
use dbmagic::{frontend, CsvDriver, Database, HandleMode, SUPPORTED_QUERY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

/// Name the CSV driver is registered under.
const DRIVER_NAME: &str = "csv";

const DEMO_CSV: &str = "first_name,last_name,username
\"Rob\",\"Pike\",rob
Ken,Thompson,ken
\"Robert\",\"Griesemer\",\"gri\"";

/// dbmagic CLI: query a CSV file through the dbmagic driver
#[derive(Parser)]
#[command(name = "dbmagic", version, about)]
struct Cli {
    /// Directory holding config/config.default (default: current directory)
    #[arg(long, default_value = ".")]
    config_root: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run a query and print every row
    Query {
        #[command(flatten)]
        source: SourceArgs,
        /// Query text
        #[arg(long, default_value = SUPPORTED_QUERY)]
        query: String,
    },

    /// Print the column header of the file
    Columns {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Show the effective configuration
    Config,

    /// Write the sample gophers file and print its rows
    Demo {
        /// Directory to write go.csv into
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[derive(clap::Args)]
struct SourceArgs {
    /// CSV file to open (overrides source.path from the configuration)
    #[arg(long)]
    file: Option<String>,

    /// Reuse one file handle for every query
    #[arg(long)]
    shared: bool,
}

#[derive(Debug, Default, Serialize, Deserialize, ExpandEnv)]
#[serde(default)]
struct AppConfig {
    name: String,
    verbose: bool,
    source: SourceConfig,
}

#[derive(Debug, Default, Serialize, Deserialize, ExpandEnv)]
#[serde(default)]
struct SourceConfig {
    path: String,
    handle: HandleMode,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let conf = load_config(&cli.config_root)?;
    init_logging(cli.verbose || conf.verbose);
    log::debug!("Effective configuration: {conf:?}");

    match cli.command {
        Command::Query { source, query } => {
            let (path, mode) = resolve_source(&source, &conf.source)?;
            let db = open_database(&path, mode)?;
            print_output(&query_rows(&db, &query)?, &cli.format)?;
        }

        Command::Columns { source } => {
            let (path, mode) = resolve_source(&source, &conf.source)?;
            let db = open_database(&path, mode)?;
            print_output(&column_names(&db)?, &cli.format)?;
        }

        Command::Config => {
            print_output(&serde_json::to_value(&conf)?, &cli.format)?;
        }

        Command::Demo { dir } => {
            let path = write_demo_file(&dir)?;
            let db = open_database(&path.to_string_lossy(), conf.source.handle)?;
            for line in demo_lines(&db)? {
                println!("{line}");
            }
        }
    }

    Ok(())
}

/// Configuration is optional: without `config/config.default` the defaults apply.
fn load_config(root: &Path) -> dbmagic::Result<AppConfig> {
    let loader = ConfigLoader::new(root);
    if !loader.has_default_file() {
        return Ok(AppConfig::default());
    }
    loader.load()
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn resolve_source(
    args: &SourceArgs,
    conf: &SourceConfig,
) -> Result<(String, HandleMode), String> {
    let path = match &args.file {
        Some(file) => file.clone(),
        None if !conf.path.is_empty() => conf.path.clone(),
        None => {
            return Err("No CSV file given: pass --file or set source.path in the configuration".into())
        }
    };
    let mode = if args.shared {
        HandleMode::Shared
    } else {
        conf.handle
    };
    Ok((path, mode))
}

fn open_database(path: &str, mode: HandleMode) -> dbmagic::Result<Database> {
    frontend::register(DRIVER_NAME, Arc::new(CsvDriver::with_mode(mode)))?;
    frontend::open(DRIVER_NAME, path)
}

/// Every row of `query` as a JSON array of column-keyed objects.
fn query_rows(db: &Database, query: &str) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let mut rows = db.query(query)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next_row()? {
        out.push(row_to_json(&row)?);
    }
    Ok(serde_json::Value::Array(out))
}

fn column_names(db: &Database) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let mut rows = db.query(SUPPORTED_QUERY)?;
    let columns = serde_json::to_value(rows.columns())?;
    rows.close()?;
    Ok(columns)
}

fn write_demo_file(dir: &Path) -> Result<PathBuf, String> {
    let path = dir.join("go.csv");
    std::fs::write(&path, DEMO_CSV)
        .map_err(|e| format!("Failed to write '{}': {e}", path.display()))?;
    log::info!("Wrote {}", path.display());
    Ok(path)
}

fn demo_lines(db: &Database) -> dbmagic::Result<Vec<String>> {
    let mut lines = Vec::new();
    for row in db.query(SUPPORTED_QUERY)? {
        let row = row?;
        let first: String = row.get(0)?;
        let last: String = row.get(1)?;
        let username: String = row.get(2)?;
        lines.push(format!(
            "first_name={first}, last_name={last}, username={username}"
        ));
    }
    Ok(lines)
}

fn row_to_json(row: &frontend::Row) -> Result<serde_json::Value, serde_json::Error> {
    let mut map = serde_json::Map::new();
    for (column, value) in row.iter() {
        map.insert(column.to_string(), serde_json::to_value(value)?);
    }
    Ok(serde_json::Value::Object(map))
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(value)?);
        }
    }
    Ok(())
}
