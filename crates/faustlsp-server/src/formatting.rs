//! External formatter runner.
//!
//! Pipes the current buffer through `faustfmt` and replaces the whole
//! document with its stdout. A missing or failing formatter surfaces as an
//! error to the client instead of a silent no-op.

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tower_lsp::lsp_types::{FormattingOptions, Position, Range, TextEdit};

use faustlsp_core::text::{self, Encoding};

const FORMATTER: &str = "faustfmt";

/// Runs the formatter over `content` with the given indent string.
pub async fn format(content: &[u8], indent: &str) -> Result<Vec<u8>> {
    let mut child = Command::new(FORMATTER)
        .arg("-i")
        .arg(indent)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("couldn't start {FORMATTER}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(content).await?;
        // Dropping stdin closes the pipe so the formatter sees EOF.
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        bail!(
            "{FORMATTER} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output.stdout)
}

/// The indent string the client asked for.
pub fn indent_for(options: &FormattingOptions) -> String {
    if options.insert_spaces {
        " ".repeat(options.tab_size as usize)
    } else {
        "\t".to_string()
    }
}

/// One edit replacing the entire old document with the formatted bytes.
pub fn whole_document_edit(old_content: &str, formatted: Vec<u8>, encoding: Encoding) -> TextEdit {
    TextEdit {
        range: Range::new(
            Position::new(0, 0),
            text::document_end_position(old_content, encoding),
        ),
        new_text: String::from_utf8_lossy(&formatted).into_owned(),
    }
}
