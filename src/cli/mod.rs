//! CLI command handling
//!
//! Turns parsed command-line arguments into a REPL session, a DAP server, or
//! a scenario run, and returns the process exit code.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::commands::{Commands, EvaluatorArgs};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::engine::{bindings, Bindings, OutlineEngine, SourceInput};
use crate::session::LaunchConfig;
use crate::{dap, repl, testing};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Repl {
            input,
            exec,
            stop_on_entry,
            evaluator,
        } => {
            let from_stdin = !exec && input == "-";
            let source = read_input(&input, exec, tokio::io::stdin()).await?;
            let mut launch = launch_config(source, &evaluator, config)?;
            launch.stop_on_entry = stop_on_entry;

            let output = tokio::io::stdout();
            let exit_code = if from_stdin {
                // Stdin held the program, so there is nobody to type commands
                tracing::info!("Program read from stdin; running without a prompt");
                repl::run(OutlineEngine::new(), launch, &config.repl, &b"run\n"[..], output)
                    .await?
            } else {
                let input = BufReader::new(tokio::io::stdin());
                repl::run(OutlineEngine::new(), launch, &config.repl, input, output).await?
            };
            Ok(exit_code as i32)
        }

        Commands::Dap {
            stdin, port, host, ..
        } => {
            if stdin {
                dap::serve_stdio(OutlineEngine::new()).await?;
            } else {
                let host = host.unwrap_or_else(|| config.dap.host.clone());
                let port = port.unwrap_or(config.dap.port);
                dap::serve_tcp(&host, port, OutlineEngine::new).await?;
            }
            Ok(0)
        }

        Commands::Test { scenarios, verbose } => {
            let passed =
                testing::run_scenarios(&scenarios, verbose, config.testing.await_timeout_secs)
                    .await?;
            Ok(if passed { 0 } else { 1 })
        }
    }
}

/// Resolve the REPL's INPUT argument: a file, `-` for `stdin`, or inline code
pub async fn read_input<R: AsyncRead + Unpin>(
    input: &str,
    exec: bool,
    mut stdin: R,
) -> Result<SourceInput> {
    if exec {
        return Ok(SourceInput::Code {
            name: "<cmdline>".to_string(),
            code: input.to_string(),
        });
    }

    if input == "-" {
        let mut code = String::new();
        stdin
            .read_to_string(&mut code)
            .await
            .map_err(|e| Error::FileRead {
                path: "<stdin>".to_string(),
                error: e.to_string(),
            })?;
        return Ok(SourceInput::Code {
            name: "<stdin>".to_string(),
            code,
        });
    }

    Ok(SourceInput::File(PathBuf::from(input)))
}

/// Build the launch configuration from flags and config
///
/// Search order: `-J` flags, then `[evaluator] jpath`, then the directory of
/// the main file.
pub fn launch_config(
    source: SourceInput,
    args: &EvaluatorArgs,
    config: &Config,
) -> Result<LaunchConfig> {
    let mut search_paths: Vec<PathBuf> = args.jpath.clone();
    search_paths.extend(config.evaluator.jpath.iter().cloned());
    if let SourceInput::File(path) = &source {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            search_paths.push(dir.to_path_buf());
        } else {
            search_paths.push(Path::new(".").to_path_buf());
        }
    }

    let ext_code = merged(&args.ext_code)?;
    let tla_code = merged(&args.tla_code)?;

    let mut launch = LaunchConfig::new(source);
    launch.search_paths = search_paths;
    launch.ext_code = ext_code;
    launch.tla_code = tla_code;
    Ok(launch)
}

fn merged(objects: &[String]) -> Result<Bindings> {
    let mut bindings = Bindings::new();
    for object in objects {
        bindings::merge_code(&mut bindings, object)?;
    }
    Ok(bindings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_input_is_cmdline_code() {
        let source = read_input("{ a: 1 }", true, &b""[..]).await.unwrap();
        assert_eq!(
            source,
            SourceInput::Code {
                name: "<cmdline>".to_string(),
                code: "{ a: 1 }".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_dash_input_reads_stdin() {
        let source = read_input("-", false, &b"{ b: 2 }\n"[..]).await.unwrap();
        assert_eq!(
            source,
            SourceInput::Code {
                name: "<stdin>".to_string(),
                code: "{ b: 2 }\n".to_string()
            }
        );

        let source = read_input("main.jsonnet", false, &b""[..]).await.unwrap();
        assert_eq!(source, SourceInput::File(PathBuf::from("main.jsonnet")));
    }

    #[test]
    fn test_search_path_order() {
        let args = EvaluatorArgs {
            jpath: vec![PathBuf::from("vendor")],
            ..Default::default()
        };
        let config = Config::parse("[evaluator]\njpath = [\"lib\"]").unwrap();
        let source = SourceInput::File(PathBuf::from("app/main.jsonnet"));

        let launch = launch_config(source, &args, &config).unwrap();
        assert_eq!(
            launch.search_paths,
            vec![
                PathBuf::from("vendor"),
                PathBuf::from("lib"),
                PathBuf::from("app")
            ]
        );
    }

    #[test]
    fn test_repeated_binding_flags_merge() {
        let args = EvaluatorArgs {
            ext_code: vec![
                r#"{"env": "dev", "replicas": 1}"#.to_string(),
                r#"{"env": "prod"}"#.to_string(),
            ],
            tla_code: vec![r#"{"debug": true}"#.to_string()],
            ..Default::default()
        };
        let source = SourceInput::Code {
            name: "<cmdline>".to_string(),
            code: "{}".to_string(),
        };

        let launch = launch_config(source, &args, &Config::default()).unwrap();
        assert_eq!(launch.ext_code["env"], "prod");
        assert_eq!(launch.ext_code["replicas"], 1);
        assert_eq!(launch.tla_code["debug"], true);
        assert!(launch.search_paths.is_empty());
    }

    #[test]
    fn test_binding_flags_must_be_objects() {
        let args = EvaluatorArgs {
            ext_code: vec!["[1, 2]".to_string()],
            ..Default::default()
        };
        let source = SourceInput::File(PathBuf::from("main.jsonnet"));

        let err = launch_config(source, &args, &Config::default()).unwrap_err();
        assert_eq!(err.code(), "INVALID_BINDINGS");
    }
}
