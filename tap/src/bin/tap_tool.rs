//! Command line access to TAP archives.
//!
//! Runs ADQL queries, manages asynchronous jobs, lists table metadata and
//! handles TAP+ user tables against any of the built-in archives or a TAP
//! service given by URL.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tap::{
    Archive, Coordinate, Credentials, OutputFormat, PollPolicy, PositionalSearch, QueryRequest,
    ResponseCache, ServiceConfig, TablesQuery, TapClient, TapConfig, UploadSource,
};
use tracing::info;

/// Parse duration string with units (e.g., "1.5s", "150ms", "10m", "1h")
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (num_str, unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, "ms")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else if let Some(n) = s.strip_suffix('h') {
        (n, "h")
    } else {
        // Default to seconds if no unit specified
        (s, "s")
    };

    let value: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid numeric value: {num_str}"))?;
    if !value.is_finite() || value < 0.0 {
        return Err("Duration cannot be negative".to_string());
    }

    Ok(match unit {
        "ms" => Duration::from_secs_f64(value / 1000.0),
        "m" => Duration::from_secs_f64(value * 60.0),
        "h" => Duration::from_secs_f64(value * 3600.0),
        _ => Duration::from_secs_f64(value),
    })
}

/// Duration argument with a unit suffix
#[derive(Debug, Clone)]
struct DurationArg(Duration);

impl std::str::FromStr for DurationArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(DurationArg)
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Query Virtual Observatory archives over TAP",
    long_about = "Runs ADQL queries against TAP services, synchronously or as \
        asynchronous jobs, and manages TAP+ user tables. Select a built-in archive \
        with --service, any TAP service with --url, or a JSON config with --config."
)]
struct Args {
    #[arg(
        short = 's',
        long,
        default_value = "gaia",
        help = "Built-in archive (see the services command)"
    )]
    service: Archive,

    #[arg(long, help = "TAP base URL of a service without a built-in table")]
    url: Option<String>,

    #[arg(short = 'c', long, help = "JSON client configuration file")]
    config: Option<PathBuf>,

    #[arg(short = 'u', long, help = "User name for TAP+ login")]
    user: Option<String>,

    #[arg(
        long,
        help = "File with the user name on line one and the password on line two"
    )]
    credentials: Option<PathBuf>,

    #[arg(long, help = "Log in with a password typed at the terminal")]
    prompt: bool,

    #[arg(long, help = "Row limit applied to queries (MAXREC)")]
    row_limit: Option<u64>,

    #[arg(long, help = "Enable the on-disk response cache")]
    cache: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the built-in archives
    Services,

    /// Run an ADQL query
    Query {
        /// ADQL query text
        adql: String,

        #[arg(short = 'f', long, help = "Result format (votable, votable_plain, fits, csv, json)")]
        format: Option<OutputFormat>,

        #[arg(short = 'a', long = "async", help = "Run as an asynchronous job")]
        asynchronous: bool,

        #[arg(
            long,
            value_name = "NAME=PATH",
            help = "Upload a local table as TAP_UPLOAD.NAME"
        )]
        upload: Option<String>,

        #[arg(short = 'o', long, help = "Write the raw result document here")]
        output: Option<PathBuf>,

        #[arg(long, help = "First poll interval for async jobs (default from config)")]
        poll_interval: Option<DurationArg>,

        #[arg(short = 't', long, help = "Stop waiting for an async job after this long")]
        timeout: Option<DurationArg>,
    },

    /// Show, wait for or download an existing job
    Job {
        job_id: String,

        #[arg(short = 'w', long, help = "Wait for the job to finish")]
        wait: bool,

        #[arg(short = 'o', long, help = "Write the raw result document here")]
        output: Option<PathBuf>,

        #[arg(short = 't', long, help = "Stop waiting after this long")]
        timeout: Option<DurationArg>,
    },

    /// List asynchronous jobs
    Jobs,

    /// Abort a running job
    Abort { job_id: String },

    /// Delete a job and its results
    DeleteJob { job_id: String },

    /// List published tables
    Tables {
        #[arg(long, help = "Only list names, without columns")]
        names_only: bool,

        #[arg(long, help = "Include tables shared with the logged-in user")]
        shared: bool,
    },

    /// Show the columns of one table
    Table { name: String },

    /// Cone search around a position
    Cone {
        #[arg(long)]
        table: String,
        #[arg(long, help = "Right ascension in degrees")]
        ra: f64,
        #[arg(long, help = "Declination in degrees")]
        dec: f64,
        #[arg(long, help = "Radius in degrees")]
        radius: f64,
        #[arg(long, default_value = "ra")]
        ra_column: String,
        #[arg(long, default_value = "dec")]
        dec_column: String,
        #[arg(long)]
        top: Option<u64>,
    },

    /// Upload a table into the user schema (TAP+)
    Upload {
        file: PathBuf,
        #[arg(short = 'n', long)]
        name: String,
        #[arg(short = 'd', long)]
        description: Option<String>,
    },

    /// Delete a user table (TAP+)
    DeleteTable { name: String },

    /// Remove every cached response
    CacheClear,
}

fn build_config(args: &Args) -> Result<TapConfig> {
    let mut config = match (&args.config, &args.url) {
        (Some(path), _) => TapConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        (None, Some(url)) => TapConfig::new(ServiceConfig::custom(url.as_str(), url.as_str())),
        (None, None) => TapConfig::for_archive(args.service),
    };
    if let Some(limit) = args.row_limit {
        config.row_limit = Some(limit);
    }
    if args.cache {
        config.cache.enabled = true;
    }
    Ok(config)
}

fn credentials(args: &Args) -> Result<Option<Credentials>> {
    if let Some(path) = &args.credentials {
        return Ok(Some(Credentials::from_file(path).with_context(|| {
            format!("Failed to read credentials from {}", path.display())
        })?));
    }
    if args.user.is_none() && !args.prompt {
        return Ok(None);
    }
    let user = match &args.user {
        Some(user) => user.clone(),
        None => dialoguer::Input::<String>::new()
            .with_prompt("User")
            .interact_text()?,
    };
    let password = dialoguer::Password::new()
        .with_prompt(format!("Password for {user}"))
        .interact()?;
    Ok(Some(Credentials::new(user, password)))
}

/// The configured poll policy with any command line overrides applied.
fn poll_policy(
    configured: &PollPolicy,
    interval: Option<&DurationArg>,
    timeout: Option<&DurationArg>,
) -> PollPolicy {
    let mut policy = configured.clone();
    if let Some(interval) = interval {
        policy.interval = interval.0;
        policy.max_interval = policy.max_interval.max(interval.0);
    }
    if let Some(timeout) = timeout {
        policy.timeout = Some(timeout.0);
    }
    policy
}

fn run(client: &TapClient, command: &Command) -> Result<()> {
    match command {
        Command::Services => {
            for archive in Archive::all() {
                let config = archive.config();
                println!("{:<12} {:<12} {}", archive.to_string(), config.name, config.tap_url);
            }
        }
        Command::Query {
            adql,
            format,
            asynchronous,
            upload,
            output,
            poll_interval,
            timeout,
        } => {
            let mut request = QueryRequest::new(adql.as_str());
            if let Some(format) = format {
                request = request.format(*format);
            }
            if let Some(spec) = upload {
                let Some((name, path)) = spec.split_once('=') else {
                    bail!("--upload expects NAME=PATH, got '{spec}'");
                };
                request = request.upload(name, UploadSource::File(PathBuf::from(path)));
            }

            if *asynchronous {
                let mut job = client.launch_job_async(&request)?;
                println!("Job {} submitted", job.job_id);
                let policy = poll_policy(
                    &client.config().poll,
                    poll_interval.as_ref(),
                    timeout.as_ref(),
                );
                client.wait_for_job(&mut job, &policy)?;
                match output {
                    Some(path) => {
                        let bytes = client.save_results(&job, path)?;
                        println!("Wrote {bytes} bytes to {}", path.display());
                    }
                    None => println!("{}", client.fetch_results(&job)?),
                }
            } else {
                let table = client.launch_job(&request)?;
                match output {
                    Some(path) => {
                        std::fs::write(path, table.to_votable())
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        println!("Wrote {} rows to {}", table.num_rows(), path.display());
                    }
                    None => println!("{table}"),
                }
            }
        }
        Command::Job {
            job_id,
            wait,
            output,
            timeout,
        } => {
            let mut job = client.load_async_job(job_id)?;
            println!("Job {}: {}", job.job_id, job.phase);
            if let Some(query) = &job.query {
                println!("  {query}");
            }
            if *wait {
                let policy = poll_policy(&client.config().poll, None, timeout.as_ref());
                client.wait_for_job(&mut job, &policy)?;
            }
            if let Some(path) = output {
                let bytes = client.save_results(&job, path)?;
                println!("Wrote {bytes} bytes to {}", path.display());
            }
        }
        Command::Jobs => {
            for job in client.list_async_jobs()? {
                let created = job
                    .creation_time
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("{:<24} {:<10} {created}", job.job_id, job.phase.to_string());
            }
        }
        Command::Abort { job_id } => {
            let mut job = client.load_async_job(job_id)?;
            client.abort_job(&mut job)?;
            println!("Job {job_id} is {}", job.phase);
        }
        Command::DeleteJob { job_id } => {
            client.delete_job(job_id)?;
            println!("Deleted job {job_id}");
        }
        Command::Tables { names_only, shared } => {
            let query = TablesQuery {
                only_names: *names_only,
                include_shared: *shared,
                tables: Vec::new(),
            };
            for table in client.load_tables(&query)? {
                println!("{}", table.name);
            }
        }
        Command::Table { name } => {
            let table = client.load_table(name)?;
            println!("{}", table.name);
            if let Some(description) = &table.description {
                println!("  {description}");
            }
            for column in &table.columns {
                println!(
                    "  {:<32} {:<10} {:<10} {}",
                    column.name,
                    column.datatype.as_deref().unwrap_or(""),
                    column.unit.as_deref().unwrap_or(""),
                    column.ucd.as_deref().unwrap_or("")
                );
            }
        }
        Command::Cone {
            table,
            ra,
            dec,
            radius,
            ra_column,
            dec_column,
            top,
        } => {
            let mut search =
                PositionalSearch::new(table)?.position_columns(ra_column, dec_column);
            if let Some(top) = top {
                search = search.top(*top);
            }
            let adql = search.cone(Coordinate::new(*ra, *dec)?, *radius)?;
            info!("{adql}");
            println!("{}", client.launch_job(&QueryRequest::new(adql))?);
        }
        Command::Upload {
            file,
            name,
            description,
        } => {
            let table = client.upload_table(
                UploadSource::File(file.clone()),
                name,
                description.as_deref(),
            )?;
            println!("Uploaded {table}");
        }
        Command::DeleteTable { name } => {
            client.delete_user_table(name)?;
            println!("Deleted {name}");
        }
        Command::CacheClear => {
            let cache = match &client.config().cache.dir {
                Some(dir) => ResponseCache::with_path(dir.clone()),
                None => ResponseCache::new()?,
            };
            let removed = cache.clear()?;
            println!("Removed {removed} cached responses from {}", cache.root_path().display());
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = build_config(&args)?;
    info!("Using {} at {}", config.service.name, config.service.tap_url);
    let mut client = TapClient::new(config)?;

    if let Some(credentials) = credentials(&args)? {
        client
            .login_with_credentials(&credentials)
            .context("Login failed")?;
    }

    let result = run(&client, &args.command);
    if client.is_logged_in() {
        client.logout()?;
    }
    result
}
