//! External compiler runner.
//!
//! Invokes the configured Faust compiler against the mirror copy of a file
//! and turns its stderr into a diagnostic. The compiler reports errors in
//! two shapes:
//!
//! - `<file>:<line> : ERROR : <message>`, anchored to a source line
//! - `ERROR : <message>`, with no location
//!
//! A zero exit code or an unrecognised stderr yields no diagnostic.

use std::path::Path;

use regex::Regex;
use tokio::process::Command;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};

use faustlsp_core::config::ProjectConfig;

/// Compiles the mirror copy of a process file and reports the first error.
pub async fn diagnose(config: &ProjectConfig, file: &Path, dir: &Path) -> Option<Diagnostic> {
    let output = match Command::new(&config.command)
        .arg("-pn")
        .arg(&config.process_name)
        .arg(file)
        .current_dir(dir)
        .output()
        .await
    {
        Ok(output) => output,
        Err(err) => {
            log::debug!("couldn't run {}: {err}", config.command);
            return None;
        }
    };
    if output.status.success() {
        return None;
    }
    parse_compiler_error(&String::from_utf8_lossy(&output.stderr))
}

/// Parses one compiler stderr blob into a diagnostic.
pub fn parse_compiler_error(stderr: &str) -> Option<Diagnostic> {
    if stderr.len() < 5 {
        return None;
    }

    if stderr.starts_with("ERROR") {
        let re = Regex::new(r"(?s)ERROR\s:\s(.*)").ok()?;
        let captures = re.captures(stderr)?;
        return Some(error_diagnostic(
            Range::new(Position::new(0, 0), Position::new(0, 0)),
            captures[1].to_string(),
        ));
    }

    let re = Regex::new(r"(?s)(.+):([-\d]+)\s:\sERROR\s:\s(.*)").ok()?;
    let captures = re.captures(stderr)?;
    let line: i64 = captures[2].parse().ok()?;
    // Compiler lines are one-based; a negative line means "unknown".
    let line = line.saturating_sub(1).max(0) as u32;
    Some(error_diagnostic(
        Range::new(Position::new(line, 0), Position::new(line, u32::MAX)),
        captures[3].to_string(),
    ))
}

fn error_diagnostic(range: Range, message: String) -> Diagnostic {
    Diagnostic {
        range,
        severity: Some(DiagnosticSeverity::ERROR),
        source: Some("faust".to_string()),
        message,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_errors_anchor_to_their_line() {
        let stderr = "main.dsp:3 : ERROR : undefined symbol : foo\n";
        let diagnostic = parse_compiler_error(stderr).unwrap();
        assert_eq!(diagnostic.range.start, Position::new(2, 0));
        assert_eq!(diagnostic.range.end, Position::new(2, u32::MAX));
        assert_eq!(diagnostic.message, "undefined symbol : foo\n");
        assert_eq!(diagnostic.source.as_deref(), Some("faust"));
    }

    #[test]
    fn generic_errors_anchor_to_the_file_start() {
        let stderr = "ERROR : no process found\n";
        let diagnostic = parse_compiler_error(stderr).unwrap();
        assert_eq!(diagnostic.range.start, Position::new(0, 0));
        assert_eq!(diagnostic.range.end, Position::new(0, 0));
        assert_eq!(diagnostic.message, "no process found\n");
    }

    #[test]
    fn negative_and_zero_lines_clamp_to_the_first_line() {
        let diagnostic = parse_compiler_error("x.dsp:-1 : ERROR : boom").unwrap();
        assert_eq!(diagnostic.range.start.line, 0);
        let diagnostic = parse_compiler_error("x.dsp:0 : ERROR : boom").unwrap();
        assert_eq!(diagnostic.range.start.line, 0);
    }

    #[test]
    fn unrecognised_stderr_yields_nothing() {
        assert!(parse_compiler_error("").is_none());
        assert!(parse_compiler_error("warning: something benign").is_none());
    }
}
