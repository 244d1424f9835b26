//! Purpose: `portstream` CLI entry point.
//! Role: Binary crate root; parses config, wires decoder, loader and store, prints the outcome.
//! Invariants: Setup errors are emitted on stderr (JSON unless stderr is a terminal).
//! Invariants: Process exit code is derived from `api::to_exit_code`.
//! Invariants: Ctrl-C/SIGTERM stop decoding; records already dispatched still finish.
use std::error::Error as StdError;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueHint, error::ErrorKind as ClapErrorKind};
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

use portstream::api::{
    CancelSignal, Decoder, Error, ErrorKind, JsonlStore, LoadOutcome, Loader, MemoryStore,
    Progress, ProgressLogger, ProgressReader, Record, RecordStore, StreamEnd, to_exit_code,
};

#[derive(Parser, Debug)]
#[command(
    name = "portstream",
    version,
    about = "Stream a large keyed JSON object into a store with bounded concurrency",
    long_about = None,
    after_help = r#"EXAMPLES
  $ portstream --file ports.json
  $ portstream --file ports.json --out ports.jsonl --workers 32
  $ PORTS_FILE=ports.json WORKER_POOL_SIZE=8 portstream --json

The input must be one JSON object mapping record ids to records:
  {"AEAJM": {"name": "Ajman", ...}, "ZAPLZ": {...}}"#
)]
struct Cli {
    #[arg(
        long,
        env = "PORTS_FILE",
        help = "JSON object to load",
        value_hint = ValueHint::FilePath
    )]
    file: PathBuf,
    #[arg(
        long,
        env = "JSON_BUFFER_SIZE",
        default_value_t = 512,
        help = "Read-ahead buffer size in bytes"
    )]
    buffer_size: usize,
    #[arg(
        long,
        env = "WORKER_POOL_SIZE",
        default_value_t = 100,
        help = "Maximum concurrent store writes"
    )]
    workers: usize,
    #[arg(
        long,
        env = "PORTS_OUT",
        help = "Append records to this JSON Lines file (default: keep in memory)",
        value_hint = ValueHint::FilePath
    )]
    out: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = 10,
        help = "Seconds between progress log lines"
    )]
    progress_interval: u64,
    #[arg(long, help = "Emit the load outcome as JSON")]
    json: bool,
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                return Ok(0);
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(clap_error_summary(&err))
                    .with_hint("Run `portstream --help` for usage."));
            }
        },
    };
    validate_cli(&cli)?;

    init_tracing();

    let file = open_input(&cli.file)?;
    let total = file.metadata().ok().map(|meta| meta.len());
    let reader = ProgressReader::new(file, total);
    let progress = reader.progress();
    let cancel = CancelSignal::new();
    let decoder = Decoder::new(reader, cli.buffer_size).with_cancel(cancel.clone());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })?;

    let (outcome, stored) = runtime.block_on(load(&cli, decoder, cancel, progress))?;

    emit_outcome(&outcome, stored, cli.json);
    Ok(match outcome.end.error() {
        Some(err) => to_exit_code(err.kind()),
        None => 0,
    })
}

async fn load(
    cli: &Cli,
    decoder: Decoder<ProgressReader<File>>,
    cancel: CancelSignal,
    progress: Progress,
) -> Result<(LoadOutcome, Option<usize>), Error> {
    let watcher = tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("shutdown requested; no further records will be decoded");
        cancel.fire();
    });
    let logger = ProgressLogger::spawn(progress, Duration::from_secs(cli.progress_interval));

    let result = match &cli.out {
        Some(path) => match JsonlStore::open(path) {
            Ok(store) => {
                let store = Arc::new(store);
                load_into(decoder, Arc::clone(&store), cli.workers)
                    .await
                    .and_then(|outcome| store.flush().map(|()| (outcome, None)))
            }
            Err(err) => Err(err),
        },
        None => {
            let store = Arc::new(MemoryStore::<Record>::new());
            load_into(decoder, Arc::clone(&store), cli.workers)
                .await
                .map(|outcome| (outcome, Some(store.len())))
        }
    };

    logger.stop();
    watcher.abort();
    result
}

async fn load_into<S>(
    decoder: Decoder<ProgressReader<File>>,
    store: S,
    workers: usize,
) -> Result<LoadOutcome, Error>
where
    S: RecordStore<Record>,
{
    let loader = Loader::new(decoder, store, workers)?;
    Ok(loader.run().await)
}

fn validate_cli(cli: &Cli) -> Result<(), Error> {
    if cli.workers == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--workers must be greater than zero")
            .with_hint("Use a positive value like 100."));
    }
    if cli.buffer_size == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--buffer-size must be greater than zero")
            .with_hint("Use a positive value like 512."));
    }
    if cli.progress_interval == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--progress-interval must be greater than zero")
            .with_hint("Use a positive value like 10."));
    }
    Ok(())
}

fn open_input(path: &Path) -> Result<File, Error> {
    File::open(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            Error::new(ErrorKind::NotFound)
                .with_message(format!("input file not found: {}", path.display()))
                .with_hint("Check --file or PORTS_FILE.")
                .with_source(err)
        } else {
            Error::new(ErrorKind::Io)
                .with_message(format!("failed to open {}", path.display()))
                .with_source(err)
        }
    })
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn clap_error_summary(err: &clap::Error) -> String {
    let rendered = err.to_string();
    rendered
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches("error:").trim().to_string())
        .unwrap_or_else(|| "invalid arguments".to_string())
}

fn outcome_json(outcome: &LoadOutcome, stored: Option<usize>) -> Value {
    let mut map = Map::new();
    map.insert("decoded".to_string(), json!(outcome.decoded));
    map.insert("submitted".to_string(), json!(outcome.submitted));
    map.insert("persisted".to_string(), json!(outcome.persisted));
    map.insert("failed".to_string(), json!(outcome.failed));
    map.insert("rejected".to_string(), json!(outcome.rejected));
    map.insert("end".to_string(), json!(outcome.end.label()));
    if let Some(stored) = stored {
        map.insert("stored".to_string(), json!(stored));
    }
    if let StreamEnd::Failed(err) = &outcome.end {
        map.insert("error".to_string(), error_body(err));
    }
    Value::Object(map)
}

fn emit_outcome(outcome: &LoadOutcome, stored: Option<usize>, as_json: bool) {
    if as_json {
        println!("{}", outcome_json(outcome, stored));
        return;
    }
    println!(
        "persisted {} of {} records ({} failed, {} rejected; input {})",
        outcome.persisted,
        outcome.decoded,
        outcome.failed,
        outcome.rejected,
        outcome.end.label()
    );
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Busy => "resource is busy".to_string(),
        ErrorKind::Decode => "invalid input".to_string(),
        ErrorKind::Storage => "storage error".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_body(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(record) = err.record() {
        inner.insert("record".to_string(), json!(record));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    Value::Object(inner)
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
        for cause in error_causes(err) {
            eprintln!("caused by: {cause}");
        }
        return;
    }

    let value = json!({ "error": error_body(err) });
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, ErrorKind, validate_cli};

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["portstream"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("valid args")
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = parse(&["--file", "ports.json"]);
        assert_eq!(cli.buffer_size, 512);
        assert_eq!(cli.workers, 100);
        assert_eq!(cli.progress_interval, 10);
        assert!(cli.out.is_none());
        assert!(!cli.json);
        validate_cli(&cli).expect("valid config");
    }

    #[test]
    fn zero_limits_are_usage_errors() {
        for args in [
            ["--file", "p.json", "--workers", "0"],
            ["--file", "p.json", "--buffer-size", "0"],
            ["--file", "p.json", "--progress-interval", "0"],
        ] {
            let err = validate_cli(&parse(&args)).expect_err("usage error");
            assert_eq!(err.kind(), ErrorKind::Usage);
            assert!(err.hint().is_some());
        }
    }
}
