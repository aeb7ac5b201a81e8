//! External converter: pipes the document through a program.
//!
//! The program reads the tokenized body on stdin and writes an HTML fragment
//! to stdout. A non-zero exit is a conversion error for that document; a
//! program that cannot be spawned makes the dialect unavailable.

use super::{ConvertError, ConvertInput, Converter};
use crate::config::ConverterConfig;
use crate::types::Dialect;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Environment variable carrying the root-relative source path.
pub const SOURCE_PATH_ENV: &str = "PLUME_SOURCE_PATH";

pub struct CommandConverter {
    dialect: Dialect,
    program: String,
    args: Vec<String>,
    extensions: Vec<String>,
    version: String,
}

impl CommandConverter {
    pub fn new(
        dialect: Dialect,
        program: impl Into<String>,
        args: Vec<String>,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            dialect,
            program: program.into(),
            args,
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            version: "unversioned".into(),
        }
    }

    pub fn from_config(dialect: Dialect, cfg: &ConverterConfig) -> Self {
        let mut converter = Self::new(
            dialect,
            cfg.command.clone(),
            cfg.args.clone(),
            cfg.extensions.clone(),
        );
        if let Some(v) = &cfg.version {
            converter.version = v.clone();
        }
        converter
    }

    fn unavailable(&self, reason: impl ToString) -> ConvertError {
        ConvertError::Unavailable {
            program: self.program.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl Converter for CommandConverter {
    fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }

    fn identity(&self) -> String {
        format!("{}/{} {}@{}", self.dialect, self.program, self.args.join(" "), self.version)
    }

    async fn convert(&self, input: &ConvertInput) -> Result<String, ConvertError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(SOURCE_PATH_ENV, &input.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => self.unavailable("command not found"),
                ErrorKind::PermissionDenied => self.unavailable("permission denied"),
                _ => self.unavailable(e),
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| self.unavailable("stdin not captured"))?;
        let text = input.text.clone();
        // Feed stdin while draining stdout, or a large document deadlocks on
        // a full pipe.
        let feed = async move {
            let result = stdin.write_all(text.as_bytes()).await;
            drop(stdin);
            match result {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        };
        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| ConvertError::Conversion(format!("{}: {e}", input.path)))?;
        fed.map_err(|e| ConvertError::Conversion(format!("{}: writing stdin: {e}", input.path)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(
                path = %input.path,
                program = %self.program,
                exit_code = ?output.status.code(),
                stderr = %stderr,
                "converter exited with failure"
            );
            let detail = stderr.lines().last().unwrap_or("no diagnostics").to_string();
            return Err(ConvertError::Conversion(format!(
                "{}: {} exited with {}: {detail}",
                input.path, self.program, output.status
            )));
        }

        String::from_utf8(output.stdout).map_err(|_| {
            ConvertError::Conversion(format!("{}: converter output is not UTF-8", input.path))
        })
    }
}
