use dbbridge::config::{self, BackendConfig, Config, JobConfig, JobPolicy};
use dbbridge::core::db::{BackendKind, Command, Connection, RowWindow, Transfer};
use dbbridge::{DbError, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dbbridge [config.toml] [--query \"<sql>\"]";

/// Parsed command line.
#[derive(Debug, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    query: Option<String>,
}

fn parse_args(args: &[String]) -> Result<Args> {
    let mut parsed = Args {
        config: None,
        query: None,
    };
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--query" | "-q" => match iter.next() {
                Some(sql) => parsed.query = Some(sql.clone()),
                None => return Err(DbError::Config("--query needs a SQL argument".to_string())),
            },
            flag if flag.starts_with('-') => {
                return Err(DbError::Config(format!("unknown option '{}'", flag)))
            }
            path if parsed.config.is_none() => parsed.config = Some(PathBuf::from(path)),
            extra => return Err(DbError::Config(format!("unexpected argument '{}'", extra))),
        }
    }
    Ok(parsed)
}

/// Opens a configured backend, converting xbase files on first use.
fn open_backend(config: &BackendConfig) -> Result<Box<dyn Connection>> {
    let mut conn = dbbridge::connect(config)?;
    if config.kind == BackendKind::Xbase {
        if let Some(path) = config.path.as_ref().filter(|path| !path.exists()) {
            conn.create_database(Some(&path.to_string_lossy()))?;
        }
    }
    conn.open()?;
    Ok(conn)
}

#[derive(Debug, Default)]
struct JobTotals {
    transferred: u64,
    failed: u64,
    log: String,
}

fn run_job(
    job: &JobConfig,
    source: &mut dyn Connection,
    destination: &mut dyn Connection,
) -> Result<JobTotals> {
    let template = job
        .insert
        .clone()
        .ok_or_else(|| DbError::Config(format!("job '{}' requires an 'insert' template", job.name)))?;
    let mut insert = Command::new(template);
    let mut totals = JobTotals::default();
    let mut window = job.chunk_size.map(|size| RowWindow::chunk(0, size));

    loop {
        let mut transfer = Transfer::new(job.query.as_str()).in_window(window);
        transfer = match job.policy {
            JobPolicy::Abort => transfer,
            JobPolicy::Log => transfer.collect_log(),
            JobPolicy::Events => transfer.with_events(
                |count| {
                    if count > 0 && count % 1000 == 0 {
                        info!("{}: {} rows", job.name, count);
                    }
                },
                |message| warn!("{}: {}", job.name, message.replace('\n', " | ")),
            ),
        };
        if job.batched {
            if let Some(table) = &job.table {
                transfer = transfer.batched(table.as_str(), job.columns.as_deref());
            }
        }

        let outcome = transfer.run(&mut *source, &mut insert, &mut *destination)?;
        totals.transferred += outcome.transferred;
        totals.failed += outcome.failed;
        totals.log.push_str(&outcome.log);

        match window {
            Some(current) if outcome.has_more_data => window = Some(current.next()),
            _ => break,
        }
    }
    Ok(totals)
}

fn run_jobs(config: &Config) -> Result<()> {
    let destination_config = match &config.destination {
        Some(destination) => destination,
        None => {
            info!("No jobs to run");
            return Ok(());
        }
    };
    let mut source = open_backend(&config.source)?;
    let mut destination = open_backend(destination_config)?;

    for job in &config.jobs {
        info!("Running job '{}'", job.name);
        let totals = run_job(job, source.as_mut(), destination.as_mut())?;
        info!(
            "Job '{}' finished: {} rows transferred, {} failed",
            job.name, totals.transferred, totals.failed
        );
        if !totals.log.is_empty() {
            warn!("Job '{}' failures:\n{}", job.name, totals.log);
        }
    }

    source.close()?;
    destination.close()?;
    Ok(())
}

fn run_query(config: &Config, sql: &str) -> Result<()> {
    let mut source = open_backend(&config.source)?;
    let table = source.query(sql, "result")?;
    print!("{}", table.to_csv());
    source.close()
}

fn run(args: &[String]) -> Result<()> {
    let args = parse_args(args)?;
    let path = match args.config.or_else(config::default_config_path) {
        Some(path) => path,
        None => return Err(DbError::Config(USAGE.to_string())),
    };
    info!("Loading configuration from {}", path.display());
    let config = config::load_config(&path)?;
    match args.query {
        Some(sql) => run_query(&config, &sql),
        None => run_jobs(&config),
    }
}

fn main() -> ExitCode {
    // Logs go to stderr so query output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("dbbridge failed: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
