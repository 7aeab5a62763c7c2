//! Process creation payload for the compute service.

use std::collections::HashMap;
use std::path::PathBuf;

use bock_oci::Process;
use serde::Serialize;

/// Parameters for starting a process in a compute system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessParams {
    /// Full command line, already escaped.
    pub command_line: String,
    /// Working directory inside the container.
    pub working_directory: PathBuf,
    /// Environment as a name to value map.
    pub environment: HashMap<String, String>,
    /// Run the process attached to an emulated console.
    pub emulate_console: bool,
    /// Console height and width, when emulating a console.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub console_size: Option<[u32; 2]>,
    /// Open a stdin pipe.
    pub create_std_in_pipe: bool,
    /// Open a stdout pipe.
    pub create_std_out_pipe: bool,
    /// Open a stderr pipe; a console merges stderr into stdout.
    pub create_std_err_pipe: bool,
}

impl ProcessParams {
    /// Parameters that start `process`.
    #[must_use]
    pub fn for_process(process: &Process) -> Self {
        let console_size = process
            .console_size
            .filter(|_| process.terminal)
            .map(|size| [size.height, size.width]);

        Self {
            command_line: args_from_slice(&process.args, process.args_escaped),
            working_directory: process.cwd.clone(),
            environment: setup_environment_variables(&process.env),
            emulate_console: process.terminal,
            console_size,
            create_std_in_pipe: true,
            create_std_out_pipe: true,
            create_std_err_pipe: !process.terminal,
        }
    }
}

/// Turn `KEY=value` strings into a map.
///
/// Entries that do not split into exactly two parts on `=` are dropped, so a
/// value that itself contains `=` is not passed through.
#[must_use]
pub fn setup_environment_variables(env: &[String]) -> HashMap<String, String> {
    env.iter()
        .filter_map(|entry| {
            let mut parts = entry.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Some((key.to_string(), value.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Build a command line from an argument vector.
///
/// Already-escaped arguments are joined with single spaces; otherwise each
/// argument is escaped with [`escape_arg`].
#[must_use]
pub fn args_from_slice(args: &[String], escaped: bool) -> String {
    if escaped {
        return args.join(" ");
    }
    args.iter()
        .map(|a| escape_arg(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape one argument using the Windows command-line parsing rules.
///
/// Backslashes are literal unless they precede a double quote, in which
/// case they are doubled and the quote escaped. Arguments containing a
/// space or tab are wrapped in double quotes.
#[must_use]
pub fn escape_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }

    let needs_quotes = arg.contains([' ', '\t']);
    if !needs_quotes && !arg.contains(['"', '\\']) {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    if needs_quotes {
        out.push('"');
    }

    let mut slashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => {
                slashes += 1;
                out.push(c);
            }
            '"' => {
                for _ in 0..=slashes {
                    out.push('\\');
                }
                slashes = 0;
                out.push(c);
            }
            _ => {
                slashes = 0;
                out.push(c);
            }
        }
    }

    if needs_quotes {
        for _ in 0..slashes {
            out.push('\\');
        }
        out.push('"');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use bock_oci::runtime::ConsoleSize;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn environment_keeps_only_two_part_entries() {
        let env = setup_environment_variables(&strings(&["PATH=C:\\bin", "A=b=c", "NOVALUE", "EMPTY="]));
        assert_eq!(env.get("PATH").map(String::as_str), Some("C:\\bin"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
        assert!(!env.contains_key("A"));
        assert!(!env.contains_key("NOVALUE"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_arg(""), "\"\"");
        assert_eq!(escape_arg("plain"), "plain");
        assert_eq!(escape_arg("a b"), "\"a b\"");
        assert_eq!(escape_arg("a\"b"), "a\\\"b");
        assert_eq!(escape_arg("C:\\dir\\"), "C:\\dir\\");
        assert_eq!(escape_arg("C:\\Program Files\\"), "\"C:\\Program Files\\\\\"");
        assert_eq!(escape_arg("a\\\"b"), "a\\\\\\\"b");
    }

    #[test]
    fn command_line_from_args() {
        let args = strings(&["cmd", "/S", "/C", "echo hello"]);
        assert_eq!(args_from_slice(&args, false), "cmd /S /C \"echo hello\"");
        assert_eq!(args_from_slice(&args, true), "cmd /S /C echo hello");
    }

    #[test]
    fn console_process_merges_stderr() {
        let process = Process {
            terminal: true,
            console_size: Some(ConsoleSize {
                height: 25,
                width: 80,
            }),
            args: strings(&["cmd"]),
            ..Default::default()
        };
        let params = ProcessParams::for_process(&process);
        assert!(params.emulate_console);
        assert!(!params.create_std_err_pipe);
        assert_eq!(params.console_size, Some([25, 80]));

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["CommandLine"], "cmd");
        assert_eq!(json["CreateStdInPipe"], true);
    }
}
