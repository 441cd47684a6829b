//! CLI command definitions
//!
//! Defines the clap commands for the debugger CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Debug a program interactively
    Repl {
        /// Program file, `-` for stdin, or code with --exec
        input: String,

        /// Treat INPUT as Jsonnet code instead of a file name
        #[arg(short = 'e', long = "exec")]
        exec: bool,

        /// Stop at the first statement instead of waiting for `run`
        #[arg(long)]
        stop_on_entry: bool,

        #[command(flatten)]
        evaluator: EvaluatorArgs,
    },

    /// Serve the Debug Adapter Protocol for editors
    Dap {
        /// Speak DAP over stdin/stdout instead of TCP
        #[arg(short = 's', long)]
        stdin: bool,

        /// TCP port to listen on (default from config, 54321)
        #[arg(short = 'p', long)]
        port: Option<u16>,

        /// Address to bind (default from config, 127.0.0.1)
        #[arg(long)]
        host: Option<String>,

        /// Log file (stdout carries the protocol in stdio mode)
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    /// Run DAP scenario files against an in-process session
    Test {
        /// Scenario files (YAML)
        #[arg(required = true)]
        scenarios: Vec<PathBuf>,

        /// Print every step as it runs
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Library paths and bindings handed to the evaluator
#[derive(Args, Debug, Default)]
pub struct EvaluatorArgs {
    /// Additional library search dir; repeatable
    #[arg(short = 'J', long = "jpath", value_name = "DIR")]
    pub jpath: Vec<PathBuf>,

    /// JSON object of external variables, as code; repeatable
    #[arg(long = "ext-code", alias = "extCode", value_name = "JSON")]
    pub ext_code: Vec<String>,

    /// JSON object of top-level arguments, as code; repeatable
    #[arg(long = "tla-code", alias = "tlaCode", value_name = "JSON")]
    pub tla_code: Vec<String>,
}
