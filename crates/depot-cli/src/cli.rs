//! Argument parsing, request assembly, and command execution.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand};
use depot_config::{ConfigLoader, DepotConfig};
use depot_fsops::request::{CONTENT_TYPE_HEADER, FILE_NAME_HEADER, FOLDER_NAME_HEADER};
use depot_fsops::{
    DispatchSettings, HttpFetcher, LocalDiskProvider, RequestContext, RequestDispatcher,
    RequestHeaders, RequestParams, UploadedFile, Uploads, Verb, WriterSink,
};
use depot_telemetry::{LoggingConfig, init_logging};
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::{CliError, CliResult};
use crate::output::{OutputTarget, render_outcome};

const STORAGE_ROOT_ENV: &str = "DEPOT_STORAGE_ROOT";
const STDIN_MARKER: &str = "-";

#[derive(Parser)]
#[command(name = "depot", version, about = "Serve virtual file storage requests")]
pub(crate) struct Cli {
    /// JSON configuration document.
    #[arg(long, global = true, env = "DEPOT_CONFIG")]
    config: Option<PathBuf>,
    /// Storage root; overrides the configured root.
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    /// Print JSON bodies on a single line.
    #[arg(long, global = true)]
    compact: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a folder, stream a file, or return properties.
    Read(RequestArgs),
    /// Create folders and files.
    Create(RequestArgs),
    /// Replace existing content.
    Replace(RequestArgs),
    /// Merge content or folder properties.
    Merge(RequestArgs),
    /// Delete a file, a folder, or a structured selection.
    Delete(RequestArgs),
}

impl Command {
    fn into_parts(self) -> (Verb, RequestArgs) {
        match self {
            Self::Read(args) => (Verb::Read, args),
            Self::Create(args) => (Verb::Create, args),
            Self::Replace(args) => (Verb::Replace, args),
            Self::Merge(args) => (Verb::Merge, args),
            Self::Delete(args) => (Verb::Delete, args),
        }
    }
}

#[derive(Args)]
#[allow(clippy::struct_excessive_bools)]
struct RequestArgs {
    /// Resource path; a trailing `/` addresses a folder.
    resource: String,
    /// Declared file name for a raw body.
    #[arg(long)]
    file_name: Option<String>,
    /// Declared folder name; the body carries its properties.
    #[arg(long)]
    folder_name: Option<String>,
    /// Media type of the raw body.
    #[arg(long)]
    content_type: Option<String>,
    /// Read the request body from a file, or `-` for stdin.
    #[arg(long, conflicts_with = "json")]
    body: Option<PathBuf>,
    /// Inline JSON request body.
    #[arg(long)]
    json: Option<String>,
    /// Local file to upload; repeat for several.
    #[arg(long = "upload")]
    uploads: Vec<PathBuf>,
    /// Send a single upload as a one-element list.
    #[arg(long)]
    multiple: bool,
    /// Remote URL to fetch as the upload source.
    #[arg(long)]
    url: Option<String>,
    /// Restrict listings to folders.
    #[arg(long)]
    folders_only: bool,
    /// Restrict listings to files.
    #[arg(long)]
    files_only: bool,
    /// Recurse into sub-folders when listing.
    #[arg(long)]
    full_tree: bool,
    /// Download a folder as a zip archive.
    #[arg(long)]
    zip: bool,
    /// Return metadata only.
    #[arg(long)]
    properties: bool,
    /// Include base64 content with file properties.
    #[arg(long)]
    content: bool,
    /// Mark streamed files as attachments.
    #[arg(long)]
    download: bool,
    /// Expand uploaded archives.
    #[arg(long)]
    extract: bool,
    /// Empty the target folder before extracting.
    #[arg(long, requires = "extract")]
    clean: bool,
    /// Override the verb's existence-check default.
    #[arg(long)]
    check_exist: Option<bool>,
    /// Allow deleting non-empty folders.
    #[arg(long)]
    force: bool,
    /// Write streamed bodies here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

impl RequestArgs {
    fn params(&self) -> RequestParams {
        RequestParams {
            folders_only: self.folders_only,
            files_only: self.files_only,
            full_tree: self.full_tree,
            zip: self.zip,
            properties: self.properties,
            content: self.content,
            download: self.download,
            url: self.url.clone(),
            extract: self.extract,
            clean: self.clean,
            check_exist: self.check_exist,
            force: self.force,
        }
    }

    fn headers(&self) -> RequestHeaders {
        let pairs = [
            (FILE_NAME_HEADER, self.file_name.as_deref()),
            (FOLDER_NAME_HEADER, self.folder_name.as_deref()),
            (CONTENT_TYPE_HEADER, self.content_type.as_deref()),
        ];
        RequestHeaders::from_pairs(
            pairs
                .into_iter()
                .filter_map(|(name, value)| value.map(|value| (name, value))),
        )
    }

    fn body(&self) -> CliResult<Vec<u8>> {
        if let Some(json) = &self.json {
            return Ok(json.clone().into_bytes());
        }
        match &self.body {
            None => Ok(Vec::new()),
            Some(path) if path.as_os_str() == STDIN_MARKER => {
                let mut buffer = Vec::new();
                io::stdin()
                    .read_to_end(&mut buffer)
                    .context("failed to read request body from stdin")
                    .map_err(CliError::failure)?;
                Ok(buffer)
            }
            Some(path) => fs::read(path)
                .with_context(|| format!("failed to read request body {}", path.display()))
                .map_err(CliError::failure),
        }
    }
}

/// Uploads copied into the staging directory; dropping this removes leftovers.
struct StagedUploads {
    uploads: Option<Uploads>,
    _guards: Vec<TempPath>,
}

fn stage_uploads(sources: &[PathBuf], multiple: bool, staging_dir: &Path) -> CliResult<StagedUploads> {
    let mut files = Vec::with_capacity(sources.len());
    let mut guards = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| CliError::validation(format!("upload '{}' has no file name", source.display())))?;
        let staged = tempfile::Builder::new()
            .prefix("depot-upload-")
            .tempfile_in(staging_dir)
            .with_context(|| format!("failed to stage upload in {}", staging_dir.display()))
            .map_err(CliError::failure)?
            .into_temp_path();
        match fs::copy(source, &staged) {
            Ok(bytes) => {
                debug!(upload = %source.display(), bytes, "upload staged");
                files.push(UploadedFile::staged(name, None, staged.to_path_buf()));
            }
            Err(err) => {
                warn!(upload = %source.display(), error = %err, "upload could not be staged");
                files.push(UploadedFile::failed(name, err.to_string()));
            }
        }
        guards.push(staged);
    }

    let uploads = match files.len() {
        0 => None,
        1 if !multiple => files.pop().map(Uploads::Single),
        _ => Some(Uploads::Multiple(files)),
    };
    Ok(StagedUploads {
        uploads,
        _guards: guards,
    })
}

fn load_config(cli: &Cli) -> CliResult<DepotConfig> {
    let mut loader = ConfigLoader::from_process_env();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    if let Some(root) = &cli.root {
        loader = loader.with_env_var(STORAGE_ROOT_ENV, root.to_string_lossy());
    }
    loader
        .load()
        .map_err(|err| CliError::failure(anyhow!("failed to load configuration: {err}")))
}

/// Parses CLI arguments, serves the request, and returns the process exit code.
#[must_use]
pub fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

fn execute(cli: Cli) -> CliResult<()> {
    let config = load_config(&cli)?;
    let build = option_env!("DEPOT_BUILD_SHA").unwrap_or("dev");
    init_logging(&LoggingConfig::from_settings(&config.logging, build)).map_err(CliError::failure)?;
    serve(cli, &config)
}

fn serve(cli: Cli, config: &DepotConfig) -> CliResult<()> {
    let compact = cli.compact;
    let (verb, args) = cli.command.into_parts();
    let staging_dir = config.staging_dir();
    let mut staged = stage_uploads(&args.uploads, args.multiple, &staging_dir)?;

    let mut ctx = RequestContext::new(verb, args.resource.clone())
        .with_params(args.params())
        .with_headers(args.headers())
        .with_body(args.body()?);
    if let Some(uploads) = staged.uploads.take() {
        ctx = ctx.with_uploads(uploads);
    }

    let provider = LocalDiskProvider::new(&config.storage_root)?;
    let fetcher = HttpFetcher::new(&config.fetch)?;
    let dispatcher = RequestDispatcher::new(Arc::new(provider), DispatchSettings::from_config(config))
        .with_fetcher(Arc::new(fetcher));

    let target = OutputTarget::open(args.output.as_deref())?;
    let mut sink = WriterSink::new(target);
    let outcome = dispatcher.dispatch(&ctx, &mut sink)?;
    drop(staged);
    render_outcome(&outcome, sink.head(), compact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depot_test_support::fixtures::temp_dir;

    fn parse(args: &[&str]) -> (Verb, RequestArgs) {
        let cli = Cli::try_parse_from(args).expect("arguments should parse");
        cli.command.into_parts()
    }

    fn config_for(root: &Path, staging: &Path) -> DepotConfig {
        DepotConfig {
            storage_root: root.to_path_buf(),
            staging_dir: Some(staging.to_path_buf()),
            ..DepotConfig::default()
        }
    }

    #[test]
    fn flags_map_onto_request_params() {
        let (verb, args) = parse(&[
            "depot",
            "create",
            "site/",
            "--file-name",
            "bundle.zip",
            "--extract",
            "--clean",
            "--check-exist",
            "false",
        ]);
        assert_eq!(verb, Verb::Create);
        let params = args.params();
        assert!(params.extract && params.clean);
        assert_eq!(params.check_exist, Some(false));
        assert_eq!(args.headers().file_name.as_deref(), Some("bundle.zip"));
        assert_eq!(args.headers().folder_name, None);
    }

    #[test]
    fn clean_requires_extract() {
        assert!(Cli::try_parse_from(["depot", "create", "site/", "--clean"]).is_err());
        assert!(Cli::try_parse_from(["depot", "create", "a", "--body", "x", "--json", "{}"]).is_err());
    }

    #[test]
    fn missing_upload_becomes_failed_item() -> anyhow::Result<()> {
        let staging = temp_dir("depot-cli-staging-")?;
        let present = staging.path().join("present.txt");
        fs::write(&present, b"hi")?;
        let staged = stage_uploads(
            &[present.clone(), staging.path().join("absent.txt")],
            false,
            staging.path(),
        )
        .map_err(|err| anyhow!(err.display_message()))?;

        let Some(Uploads::Multiple(files)) = &staged.uploads else {
            anyhow::bail!("expected multiple uploads");
        };
        assert_eq!(files.len(), 2);
        assert!(matches!(files[1].payload, depot_fsops::UploadPayload::Failed(_)));
        assert!(present.exists());
        Ok(())
    }

    #[test]
    fn serve_writes_structured_body_to_root() -> anyhow::Result<()> {
        let root = temp_dir("depot-cli-root-")?;
        let staging = temp_dir("depot-cli-staging-")?;
        let cli = Cli::try_parse_from([
            "depot",
            "create",
            "/",
            "--compact",
            "--json",
            r#"{"folder":[{"name":"docs"}],"file":[{"name":"a.txt","content":"SGVsbG8=","is_base64":true}]}"#,
        ])?;

        serve(cli, &config_for(root.path(), staging.path()))
            .map_err(|err| anyhow!(err.display_message()))?;
        assert!(root.path().join("docs").is_dir());
        assert_eq!(fs::read(root.path().join("a.txt"))?, b"Hello");
        Ok(())
    }

    #[test]
    fn serve_streams_file_to_output() -> anyhow::Result<()> {
        let root = temp_dir("depot-cli-root-")?;
        let staging = temp_dir("depot-cli-staging-")?;
        fs::write(root.path().join("notes.txt"), b"remember")?;
        let output = staging.path().join("copy.txt");
        let cli = Cli::try_parse_from([
            "depot",
            "read",
            "notes.txt",
            "--output",
            output.to_str().ok_or_else(|| anyhow!("non-utf8 temp path"))?,
        ])?;

        serve(cli, &config_for(root.path(), staging.path()))
            .map_err(|err| anyhow!(err.display_message()))?;
        assert_eq!(fs::read(&output)?, b"remember");
        Ok(())
    }

    #[test]
    fn serve_reports_missing_file() -> anyhow::Result<()> {
        let root = temp_dir("depot-cli-root-")?;
        let staging = temp_dir("depot-cli-staging-")?;
        let cli = Cli::try_parse_from(["depot", "delete", "ghost.txt"])?;
        let err = match serve(cli, &config_for(root.path(), staging.path())) {
            Ok(()) => anyhow::bail!("expected a failure"),
            Err(err) => err,
        };
        assert_eq!(err.exit_code(), 4);
        Ok(())
    }
}
