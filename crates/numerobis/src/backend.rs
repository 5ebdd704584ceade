//! External C compiler invocation.
//!
//! The emitted translation unit is handed to a system C compiler (`gcc`
//! unless overridden) and optionally executed. Interrupts surface as exit
//! code 130 at the CLI boundary.

use std::{
    path::{Path, PathBuf},
    process::Command,
};

use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to invoke '{cc}': {source}")]
    Spawn {
        cc: String,
        #[source]
        source: std::io::Error,
    },
    #[error("'{command}' failed:\n{stderr}")]
    Compile { command: String, stderr: String },
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub cc: String,
    pub opt_level: String,
    pub debug: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            cc: "gcc".to_owned(),
            opt_level: "0".to_owned(),
            debug: true,
        }
    }
}

/// Writes `code` next to the output and compiles it into `output`.
pub fn build(code: &str, output: &Path, options: &BuildOptions) -> Result<(), BackendError> {
    let c_path = output.with_extension("c");
    std::fs::write(&c_path, code).map_err(|source| BackendError::Io {
        path: c_path.clone(),
        source,
    })?;

    let mut command = Command::new(&options.cc);
    command
        .arg(&c_path)
        .arg("-o")
        .arg(output)
        .arg(format!("-O{}", options.opt_level))
        .arg("-lm");
    if options.debug {
        command.arg("-g");
    }

    let rendered = format!(
        "{} {} -o {} -O{}{} -lm",
        options.cc,
        c_path.display(),
        output.display(),
        options.opt_level,
        if options.debug { " -g" } else { "" },
    );
    info!(command = %rendered, "invoking C compiler");

    let result = command.output().map_err(|source| BackendError::Spawn {
        cc: options.cc.clone(),
        source,
    })?;
    if !result.status.success() {
        return Err(BackendError::Compile {
            command: rendered,
            stderr: String::from_utf8_lossy(&result.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Runs the produced binary, forwarding its exit code.
pub fn run(path: &Path) -> Result<i32, BackendError> {
    let status = Command::new(path)
        .status()
        .map_err(|source| BackendError::Spawn {
            cc: path.display().to_string(),
            source,
        })?;
    Ok(status.code().unwrap_or(130))
}
