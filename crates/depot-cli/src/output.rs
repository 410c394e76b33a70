//! Output targets and renderers for dispatched requests.

use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use depot_fsops::{Outcome, StreamHead};
use tracing::info;

use crate::error::{CliError, CliResult};

/// Destination for streamed bodies.
pub(crate) enum OutputTarget {
    Stdout(Stdout),
    File(BufWriter<File>),
}

impl OutputTarget {
    pub(crate) fn open(path: Option<&Path>) -> CliResult<Self> {
        match path {
            None => Ok(Self::Stdout(io::stdout())),
            Some(path) => File::create(path)
                .map(|file| Self::File(BufWriter::new(file)))
                .with_context(|| format!("failed to create output file {}", path.display()))
                .map_err(CliError::failure),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stdout(out) => out.write(buf),
            Self::File(out) => out.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stdout(out) => out.flush(),
            Self::File(out) => out.flush(),
        }
    }
}

pub(crate) fn render_outcome(
    outcome: &Outcome,
    head: Option<&StreamHead>,
    compact: bool,
) -> CliResult<()> {
    match outcome {
        Outcome::Body(body) => {
            let text = if compact {
                serde_json::to_string(body)
            } else {
                serde_json::to_string_pretty(body)
            }
            .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        Outcome::Streamed { bytes } => {
            if let Some(head) = head {
                info!(
                    bytes,
                    content_type = %head.content_type,
                    disposition = %head.content_disposition(),
                    "body streamed"
                );
            }
        }
    }
    Ok(())
}
