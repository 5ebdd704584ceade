//! Command-line interface: `build` compiles a source file to a native
//! executable through the system C compiler, `view` prints the generated C.
//!
//! Exit codes: 0 on success, 1 when a diagnostic was reported, 130 on
//! interrupt.

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use clap::{Parser, Subcommand, ValueEnum};
use numerobis::{backend, link_program, Loader, Resolver};

#[derive(Parser)]
#[command(name = "numerobis", version, about = "Compiler for the Numerobis language")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OptLevel {
    #[value(name = "0")]
    O0,
    #[value(name = "1")]
    O1,
    #[value(name = "2")]
    O2,
    #[value(name = "3")]
    O3,
    #[value(name = "s")]
    Os,
}

impl OptLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::O0 => "0",
            Self::O1 => "1",
            Self::O2 => "2",
            Self::O3 => "3",
            Self::Os => "s",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile SOURCE into a native executable.
    Build {
        source: PathBuf,
        /// Output binary path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Execute the produced binary after building.
        #[arg(long)]
        run: bool,
        /// Suppress non-essential compiler output.
        #[arg(long)]
        quiet: bool,
        /// Emit debug information (-g).
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        debug: bool,
        /// Optimization level (passed to the C compiler).
        #[arg(short = 'O', default_value = "0")]
        opt_level: OptLevel,
        /// C compiler to use.
        #[arg(long, default_value = "gcc")]
        cc: String,
    },
    /// Print the generated C code for SOURCE.
    View {
        source: PathBuf,
        /// Write the generated C code to a file instead of printing it.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Show line numbers.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        line_numbers: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Build { source, output, run, quiet, debug, opt_level, cc } => {
            build(&source, output, run, quiet, debug, opt_level, &cc)
        }
        Commands::View { source, output, line_numbers } => view(&source, output, line_numbers),
    }
}

fn compile(source: &Path) -> Result<(Loader, String), ExitCode> {
    let mut loader = Loader::new(Resolver {
        search_paths: vec![source.parent().unwrap_or(Path::new(".")).to_path_buf()],
    });
    match loader.load_file(source) {
        Ok(root) => {
            let code = link_program(&loader, &root);
            Ok((loader, code))
        }
        Err(diagnostic) => {
            eprintln!("{diagnostic}");
            Err(ExitCode::from(1))
        }
    }
}

fn build(
    source: &Path,
    output: Option<PathBuf>,
    run: bool,
    quiet: bool,
    debug: bool,
    opt_level: OptLevel,
    cc: &str,
) -> ExitCode {
    let started = Instant::now();
    let output = output.unwrap_or_else(|| source.with_extension(""));

    let (_loader, code) = match compile(source) {
        Ok(compiled) => compiled,
        Err(code) => return code,
    };

    let options = backend::BuildOptions {
        cc: cc.to_owned(),
        opt_level: opt_level.as_str().to_owned(),
        debug,
    };
    if let Err(err) = backend::build(&code, &output, &options) {
        eprintln!("{err}");
        return ExitCode::from(1);
    }

    if !quiet {
        eprintln!("Built {} ({:.2}s)", output.display(), started.elapsed().as_secs_f64());
    }

    if run {
        return match backend::run(&output) {
            Ok(code) => ExitCode::from(u8::try_from(code.clamp(0, 255)).unwrap_or(1)),
            Err(err) => {
                eprintln!("{err}");
                ExitCode::from(1)
            }
        };
    }
    ExitCode::SUCCESS
}

fn view(source: &Path, output: Option<PathBuf>, line_numbers: bool) -> ExitCode {
    let (_loader, code) = match compile(source) {
        Ok(compiled) => compiled,
        Err(exit) => return exit,
    };

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Err(err) = std::fs::write(&path, &code) {
                eprintln!("failed to write {}: {err}", path.display());
                return ExitCode::from(1);
            }
            eprintln!("Generated C code written to {}", path.display());
        }
        None => {
            for (i, line) in code.lines().enumerate() {
                if line_numbers {
                    println!("{:>5} | {line}", i + 1);
                } else {
                    println!("{line}");
                }
            }
        }
    }
    ExitCode::SUCCESS
}
