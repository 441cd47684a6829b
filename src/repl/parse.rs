//! REPL command-line parsing

use std::path::PathBuf;

use crate::common::{Error, Result};

/// Where a `break` or `clear` command points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineLocation {
    /// A line in the launched program
    Line(u32),
    /// A line in a named file
    FileLine { file: PathBuf, line: u32 },
}

impl LineLocation {
    /// Parse `file:line`, `file line`, or a bare `line`
    pub fn parse(args: &[&str]) -> Result<Self> {
        match args {
            [single] => {
                if let Ok(line) = parse_line(single) {
                    return Ok(Self::Line(line));
                }
                // Last ':' followed by digits only, so "C:\dir\a.jsonnet:3" works
                if let Some(idx) = single.rfind(':') {
                    let (file, line) = single.split_at(idx);
                    let line = &line[1..];
                    if !file.is_empty() && !line.is_empty() && line.chars().all(|c| c.is_ascii_digit()) {
                        return Ok(Self::FileLine {
                            file: PathBuf::from(file),
                            line: parse_line(line)?,
                        });
                    }
                }
                Err(usage(format!("expected a line number, got '{}'", single)))
            }
            [file, line] => Ok(Self::FileLine {
                file: PathBuf::from(file),
                line: parse_line(line)?,
            }),
            [] => Err(usage("missing location")),
            _ => Err(usage("too many arguments")),
        }
    }
}

fn parse_line(s: &str) -> Result<u32> {
    match s.parse::<u32>() {
        Ok(line) if line > 0 => Ok(line),
        _ => Err(usage(format!("invalid line number '{}'", s))),
    }
}

fn usage(message: impl std::fmt::Display) -> Error {
    Error::invalid_arguments("repl", message)
}

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Break(LineLocation),
    /// Clear one location, or every breakpoint
    Clear(Option<LineLocation>),
    Breakpoints,
    Run,
    Continue,
    Next,
    Step,
    Finish,
    Pause,
    Backtrace,
    Scopes(i64),
    Vars(i64),
    Locals,
    Print(String),
    Help,
    Quit,
    /// Blank line
    Empty,
}

impl ReplCommand {
    /// Parse one input line
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match word {
            "" => Self::Empty,
            "break" | "b" => Self::Break(LineLocation::parse(&args)?),
            "clear" => {
                if args.is_empty() {
                    Self::Clear(None)
                } else {
                    Self::Clear(Some(LineLocation::parse(&args)?))
                }
            }
            "breakpoints" | "info" => Self::Breakpoints,
            "run" | "r" => Self::Run,
            "continue" | "c" => Self::Continue,
            "next" | "n" => Self::Next,
            "step" | "s" => Self::Step,
            "finish" | "out" => Self::Finish,
            "pause" => Self::Pause,
            "backtrace" | "bt" | "where" => Self::Backtrace,
            "scopes" => Self::Scopes(reference(&args, "scopes <frame>")?),
            "vars" | "variables" => Self::Vars(reference(&args, "vars <reference>")?),
            "locals" => Self::Locals,
            "print" | "p" => {
                if rest.is_empty() {
                    return Err(usage("usage: print <expression>"));
                }
                Self::Print(rest.to_string())
            }
            "help" | "h" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(usage(format!("unknown command '{}', try 'help'", other))),
        };

        Ok(command)
    }
}

fn reference(args: &[&str], usage_text: &str) -> Result<i64> {
    match args {
        [id] => id
            .parse()
            .map_err(|_| usage(format!("invalid reference '{}'", id))),
        _ => Err(usage(format!("usage: {}", usage_text))),
    }
}

pub const HELP: &str = "\
Commands:
  break <file>:<line> | break <file> <line> | break <line>   set a breakpoint (b)
  clear [<location>]     remove one breakpoint, or all of them
  breakpoints            list breakpoints
  run                    start evaluation (r)
  continue               resume until the next breakpoint (c)
  next                   step over nested scopes (n)
  step                   step into nested scopes (s)
  finish                 run until the current scope ends (out)
  pause                  interrupt a running evaluation (also Ctrl-C)
  backtrace              show the stack (bt)
  scopes <frame>         list scopes of a frame
  vars <ref>             list variables of a reference
  locals                 show variables of the innermost frame
  print <expr>           evaluate an expression (p)
  help                   show this text
  quit                   end the session (q)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_break_forms() {
        assert_eq!(
            ReplCommand::parse("break 3").unwrap(),
            ReplCommand::Break(LineLocation::Line(3))
        );
        assert_eq!(
            ReplCommand::parse("b lib/a.jsonnet:12").unwrap(),
            ReplCommand::Break(LineLocation::FileLine {
                file: PathBuf::from("lib/a.jsonnet"),
                line: 12
            })
        );
        assert_eq!(
            ReplCommand::parse("break a.jsonnet 7").unwrap(),
            ReplCommand::Break(LineLocation::FileLine {
                file: PathBuf::from("a.jsonnet"),
                line: 7
            })
        );
    }

    #[test]
    fn test_windows_style_path() {
        assert_eq!(
            LineLocation::parse(&[r"C:\work\a.jsonnet:4"]).unwrap(),
            LineLocation::FileLine {
                file: PathBuf::from(r"C:\work\a.jsonnet"),
                line: 4
            }
        );
    }

    #[test]
    fn test_invalid_locations() {
        assert!(ReplCommand::parse("break").is_err());
        assert!(ReplCommand::parse("break 0").is_err());
        assert!(ReplCommand::parse("break a.jsonnet").is_err());
        assert!(ReplCommand::parse("break a.jsonnet x").is_err());
    }

    #[test]
    fn test_clear_and_aliases() {
        assert_eq!(ReplCommand::parse("clear").unwrap(), ReplCommand::Clear(None));
        assert_eq!(
            ReplCommand::parse("clear 5").unwrap(),
            ReplCommand::Clear(Some(LineLocation::Line(5)))
        );
        assert_eq!(ReplCommand::parse("c").unwrap(), ReplCommand::Continue);
        assert_eq!(ReplCommand::parse("bt").unwrap(), ReplCommand::Backtrace);
        assert_eq!(ReplCommand::parse("out").unwrap(), ReplCommand::Finish);
        assert_eq!(ReplCommand::parse("   ").unwrap(), ReplCommand::Empty);
    }

    #[test]
    fn test_print_keeps_expression_text() {
        assert_eq!(
            ReplCommand::parse("print  std.extVar('env') ").unwrap(),
            ReplCommand::Print("std.extVar('env')".to_string())
        );
        assert!(ReplCommand::parse("p").is_err());
    }

    #[test]
    fn test_references_and_unknown() {
        assert_eq!(ReplCommand::parse("scopes 1").unwrap(), ReplCommand::Scopes(1));
        assert_eq!(ReplCommand::parse("vars 12").unwrap(), ReplCommand::Vars(12));
        assert!(ReplCommand::parse("vars").is_err());
        assert!(ReplCommand::parse("vars x").is_err());

        let err = ReplCommand::parse("frobnicate").unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");
    }
}
