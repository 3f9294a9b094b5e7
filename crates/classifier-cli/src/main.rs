mod config;

use anyhow::{anyhow, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use classifier_client::{
    ApiClient, CancellationToken, ClassificationRequest, ClientConfig, JobOutcome, JobResult,
    Progress, StreamingJobClient,
};
use crate::config::Config;

fn job_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("sheet")
            .long("sheet")
            .help("Worksheet to classify (backend default when omitted)")
            .num_args(1),
    )
    .arg(
        Arg::new("column")
            .long("column")
            .help("Column holding the text to classify")
            .num_args(1),
    )
    .arg(
        Arg::new("prompt")
            .long("prompt")
            .help("Classification prompt sent to the model")
            .num_args(1),
    )
    .arg(
        Arg::new("download")
            .long("download")
            .help("Download the result workbook into this directory when done")
            .num_args(0..=1)
            .default_missing_value(""),
    )
}

fn build_cli() -> Command {
    let upload = Command::new("upload")
        .about("Upload a spreadsheet and print its server path")
        .arg(Arg::new("file").help("Local spreadsheet").required(true));

    let classify = job_args(
        Command::new("classify")
            .about("Classify an uploaded spreadsheet with live progress")
            .arg(
                Arg::new("server_path")
                    .help("Server-side path returned by `upload`")
                    .required(true),
            ),
    );

    let process = job_args(
        Command::new("process")
            .about("Upload a local spreadsheet, then classify it")
            .arg(Arg::new("file").help("Local spreadsheet").required(true)),
    );

    let history = Command::new("history")
        .about("List past classification jobs")
        .arg(
            Arg::new("id")
                .long("id")
                .help("Show a single job")
                .num_args(1),
        )
        .arg(
            Arg::new("skip")
                .long("skip")
                .default_value("0")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .default_value("100")
                .value_parser(value_parser!(u32)),
        );

    let settings = Command::new("settings")
        .about("Show or update backend settings")
        .subcommand_required(true)
        .subcommand(Command::new("show").about("Print current settings"))
        .subcommand(
            Command::new("update")
                .about("Replace settings with the contents of a JSON file")
                .arg(Arg::new("json_file").required(true)),
        );

    let download = Command::new("download")
        .about("Download the result workbook of a finished job")
        .arg(Arg::new("history_id").required(true))
        .arg(
            Arg::new("out")
                .long("out")
                .help("Target directory")
                .num_args(1),
        );

    Command::new("classifier")
        .about("Spreadsheet classification client")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("base_url")
                .long("base-url")
                .help("API root, e.g. http://localhost:8000/api")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Read settings from this TOML file instead of config/ and the environment")
                .global(true)
                .num_args(1),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .help("Hide the progress bar")
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand(upload)
        .subcommand(classify)
        .subcommand(process)
        .subcommand(history)
        .subcommand(settings)
        .subcommand(download)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let matches = build_cli().get_matches();

    let config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;
    init_logging(&config);

    let mut client_config: ClientConfig = config.api.clone().into();
    if let Some(url) = matches.get_one::<String>("base_url") {
        client_config = client_config.with_base_url(url);
    }
    tracing::debug!(base_url = %client_config.base_url, "Using backend");
    let api = ApiClient::new(client_config)?;
    let quiet = matches.get_flag("quiet");

    match matches.subcommand() {
        Some(("upload", m)) => {
            let uploaded = api.upload_file(required(m, "file")?).await?;
            println!("{}", uploaded.file_path);
        }
        Some(("classify", m)) => {
            let request = job_request(m, required(m, "server_path")?);
            run_job(&api, &request, download_dir(m, &config), quiet).await?;
        }
        Some(("process", m)) => {
            let uploaded = api.upload_file(required(m, "file")?).await?;
            println!("Uploaded {} -> {}", uploaded.filename, uploaded.file_path);
            let request = job_request(m, uploaded.file_path);
            run_job(&api, &request, download_dir(m, &config), quiet).await?;
        }
        Some(("history", m)) => match m.get_one::<String>("id") {
            Some(id) => println!("{}", serde_json::to_string_pretty(&api.get_history(id).await?)?),
            None => {
                let skip = m.get_one::<u32>("skip").copied().unwrap_or(0);
                let limit = m.get_one::<u32>("limit").copied().unwrap_or(100);
                for entry in api.list_history(skip, limit).await? {
                    println!("{}", history_line(&entry));
                }
            }
        },
        Some(("settings", m)) => match m.subcommand() {
            Some(("update", u)) => {
                let path = required(u, "json_file")?;
                let raw = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path))?;
                let settings: Value = serde_json::from_str(&raw).context("Settings file is not valid JSON")?;
                println!("{}", serde_json::to_string_pretty(&api.update_settings(&settings).await?)?);
            }
            _ => println!("{}", serde_json::to_string_pretty(&api.get_settings().await?)?),
        },
        Some(("download", m)) => {
            let id = required(m, "history_id")?;
            let dir = m
                .get_one::<String>("out")
                .cloned()
                .unwrap_or_else(|| config.output.download_dir.clone());
            let path = api.download_result(&id, &dir).await?;
            println!("{}", path.display());
        }
        _ => unreachable!("subcommand_required"),
    }

    Ok(())
}

fn required(m: &ArgMatches, name: &str) -> Result<String> {
    m.get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow!("missing argument <{}>", name))
}

fn job_request(m: &ArgMatches, file_path: String) -> ClassificationRequest {
    let mut request = ClassificationRequest::new(file_path);
    if let Some(sheet) = m.get_one::<String>("sheet") {
        request = request.with_sheet(sheet);
    }
    if let Some(column) = m.get_one::<String>("column") {
        request = request.with_column(column);
    }
    if let Some(prompt) = m.get_one::<String>("prompt") {
        request = request.with_prompt(prompt);
    }
    request
}

/// `--download` alone uses the configured directory
fn download_dir(m: &ArgMatches, config: &Config) -> Option<PathBuf> {
    m.get_one::<String>("download").map(|dir| {
        if dir.is_empty() {
            PathBuf::from(&config.output.download_dir)
        } else {
            PathBuf::from(dir)
        }
    })
}

async fn run_job(
    api: &ApiClient,
    request: &ClassificationRequest,
    download: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let result = run_job_until(api, request, download, quiet, &cancel).await;
    ctrl_c.abort();
    result
}

/// Run the job and the optional download, both stopped by `cancel`
async fn run_job_until(
    api: &ApiClient,
    request: &ClassificationRequest,
    download: Option<PathBuf>,
    quiet: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let pb = if quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} rows {wide_msg}")?
            .progress_chars("=>-"),
    );
    pb.set_message("classifying");
    pb.enable_steady_tick(std::time::Duration::from_millis(120));

    let client = StreamingJobClient::new(api.clone());
    let bar = pb.clone();
    let outcome = client
        .run(
            request,
            move |p: Progress| {
                bar.set_length(p.total);
                bar.set_position(p.current);
            },
            cancel,
        )
        .await;

    match outcome {
        Ok(JobOutcome::Completed(result)) => {
            pb.finish_with_message("done");
            print_summary(&result);
            if let Some(dir) = download {
                let id = result
                    .history_key()
                    .ok_or_else(|| anyhow!("completed job carries no history id"))?;
                match download_until(api, &id, &dir, cancel).await? {
                    Some(path) => println!("Saved {}", path.display()),
                    None => println!("Download cancelled"),
                }
            }
            Ok(())
        }
        Ok(JobOutcome::Cancelled) => {
            pb.abandon_with_message("cancelled");
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(anyhow::Error::new(e).context("Classification failed"))
        }
    }
}

/// Download a result unless `cancel` fires first; `None` when cancelled
async fn download_until(
    api: &ApiClient,
    id: &str,
    dir: &Path,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let partial = ApiClient::result_path(id, dir);
            if tokio::fs::remove_file(&partial).await.is_ok() {
                tracing::info!(path = %partial.display(), "Removed partial download");
            }
            Ok(None)
        }
        saved = api.download_result(id, dir) => Ok(Some(saved?)),
    }
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

fn print_summary(result: &JobResult) {
    println!("{}", plain(&result.message));
    println!("  history id : {}", plain(&result.history_id));
    println!("  file       : {}", plain(&result.filename));
    println!("  status     : {}", plain(&result.status));
    println!(
        "  rows       : {} processed, {} failed, {} total",
        plain(&result.processed_rows),
        plain(&result.failed_rows),
        plain(&result.total_rows)
    );
    println!("  result     : {}", plain(&result.result_path));
}

fn history_line(entry: &Value) -> String {
    format!(
        "#{:<5} {:<10} {:>5}/{:<5} {} {}",
        plain(&entry["id"]),
        plain(&entry["status"]),
        plain(&entry["processed_rows"]),
        plain(&entry["total_rows"]),
        plain(&entry["created_at"]),
        plain(&entry["filename"]),
    )
}

fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.logging.format.as_str() {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classifier_client::ClassifyError;
    use serde_json::json;

    #[test]
    fn test_cli_parses_classify() {
        let m = build_cli()
            .try_get_matches_from([
                "classifier",
                "classify",
                "/app/data/uploads/a.xlsx",
                "--sheet",
                "Sheet1",
                "--download",
            ])
            .unwrap();

        let (name, sub) = m.subcommand().unwrap();
        assert_eq!(name, "classify");

        let request = job_request(sub, required(sub, "server_path").unwrap());
        assert_eq!(request.file_path, "/app/data/uploads/a.xlsx");
        assert_eq!(request.sheet_name.as_deref(), Some("Sheet1"));
        assert!(request.column_name.is_none());
        assert_eq!(sub.get_one::<String>("download").map(String::as_str), Some(""));
    }

    #[test]
    fn test_cli_history_defaults() {
        let m = build_cli()
            .try_get_matches_from(["classifier", "history"])
            .unwrap();
        let (_, sub) = m.subcommand().unwrap();

        assert_eq!(sub.get_one::<u32>("skip").copied(), Some(0));
        assert_eq!(sub.get_one::<u32>("limit").copied(), Some(100));
        assert!(sub.get_one::<String>("id").is_none());
    }

    #[test]
    fn test_cli_config_is_global() {
        let m = build_cli()
            .try_get_matches_from(["classifier", "settings", "show", "--config", "staging.toml"])
            .unwrap();

        assert_eq!(
            m.get_one::<String>("config").map(String::as_str),
            Some("staging.toml")
        );
    }

    #[tokio::test]
    async fn test_cancelled_download_removes_partial_file() {
        let api = ApiClient::new(ClientConfig::new("http://127.0.0.1:1/api")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let partial = ApiClient::result_path("42", dir.path());
        std::fs::write(&partial, b"PK\x03").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let saved = download_until(&api, "42", dir.path(), &cancel).await.unwrap();

        assert!(saved.is_none());
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_download_error_surfaces_when_not_cancelled() {
        let api = ApiClient::new(ClientConfig::new("http://127.0.0.1:1/api")).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let err = download_until(&api, "42", dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ClassifyError>(),
            Some(ClassifyError::Request(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_job_skips_download() {
        let api = ApiClient::new(ClientConfig::new("http://127.0.0.1:1/api")).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let request = ClassificationRequest::new("/a.xlsx");
        let cancel = CancellationToken::new();
        cancel.cancel();

        run_job_until(&api, &request, Some(dir.path().to_path_buf()), true, &cancel)
            .await
            .unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(build_cli().try_get_matches_from(["classifier"]).is_err());
    }

    #[test]
    fn test_history_line() {
        let entry = json!({
            "id": 3,
            "filename": "report.xlsx",
            "status": "completed",
            "processed_rows": 9,
            "total_rows": 10,
            "created_at": "2024-03-01T09:00:00"
        });

        let line = history_line(&entry);
        assert!(line.starts_with("#3"));
        assert!(line.contains("completed"));
        assert!(line.contains("9/10"));
        assert!(line.ends_with("report.xlsx"));
    }

    #[test]
    fn test_plain_values() {
        assert_eq!(plain(&json!("text")), "text");
        assert_eq!(plain(&json!(null)), "-");
        assert_eq!(plain(&json!(42)), "42");
    }
}
