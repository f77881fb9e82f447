//! Remote process enumeration.
//!
//! One `sh` invocation walks `/proc` directly: each numeric entry is a
//! candidate pid and its `cmdline` file holds the NUL-separated argv. A
//! dedicated process-listing tool may be absent from minimal images; the
//! pseudo-filesystem is always there. The script emits one
//! `pid|quoted-argv` line per process and that shape is a strict contract:
//! a line the parser cannot read fails the whole call, it is never dropped.

use tracing::debug;

use crate::cluster::ClusterApi;
use crate::error::{Error, Result};

/// One process observed inside the container. Pids are ephemeral; there is
/// no identity across enumeration calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub argv: Vec<String>,
}

impl ProcessInfo {
    /// The command line as a single space-joined string.
    #[must_use]
    pub fn command(&self) -> String {
        self.argv.join(" ")
    }
}

/// Shell payload emitting `pid|quoted-argv` lines. Argv tokens are
/// single-quoted with embedded quotes escaped the POSIX way (`'\''`). The
/// enumerating shell and its direct children are suppressed, as are kernel
/// threads (empty cmdline).
const LIST_PROCESSES: &str = r#"for f in /proc/[0-9]*/cmdline; do
    pid=${f#/proc/}
    pid=${pid%/cmdline}
    [ "$pid" = "$$" ] && continue
    ppid=$(cut -d' ' -f4 "/proc/$pid/stat" 2>/dev/null)
    [ "$ppid" = "$$" ] && continue
    args=$(tr '\0' '\n' < "$f" 2>/dev/null | sed "s/'/'\\\\''/g; s/^/'/; s/\$/'/" | tr '\n' ' ')
    [ -z "$args" ] && continue
    printf '%s|%s\n' "$pid" "$args"
done
"#;

/// Enumerate the processes running in a container.
///
/// Order is whatever `/proc` iteration produced; it is not stable across
/// calls.
pub async fn enumerate(
    cluster: &ClusterApi,
    pod: &str,
    container: &str,
) -> Result<Vec<ProcessInfo>> {
    let output = cluster
        .exec_capture(
            pod,
            container,
            vec!["sh".to_string(), "-c".to_string(), LIST_PROCESSES.to_string()],
        )
        .await?;
    let processes = parse_listing(&output)?;
    debug!(pod, container, count = processes.len(), "enumerated processes");
    Ok(processes)
}

/// Parse the remote listing. The `pid|quoted-argv` shape is a strict
/// contract with the script above.
pub fn parse_listing(output: &str) -> Result<Vec<ProcessInfo>> {
    let mut processes = Vec::new();
    for line in output.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let malformed = || Error::ProcessListing {
            line: line.to_string(),
        };
        let (pid, rest) = line.split_once('|').ok_or_else(malformed)?;
        let pid: u32 = pid.trim().parse().map_err(|_| malformed())?;
        let argv = unquote_argv(rest).ok_or_else(malformed)?;
        if argv.is_empty() {
            return Err(malformed());
        }
        processes.push(ProcessInfo { pid, argv });
    }
    Ok(processes)
}

/// Split a sequence of single-quoted tokens back into argv. Follows POSIX
/// shell quoting: quotes toggle literal mode, a backslash outside quotes
/// escapes the next character, unquoted whitespace separates tokens.
/// Returns `None` on unbalanced quotes or a dangling escape.
fn unquote_argv(input: &str) -> Option<Vec<String>> {
    let mut argv = Vec::new();
    let mut current: Option<String> = None;
    let mut chars = input.chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quotes = !in_quotes;
                // An opening quote starts a token even when it is empty.
                current.get_or_insert_with(String::new);
            }
            '\\' if !in_quotes => {
                let escaped = chars.next()?;
                current.get_or_insert_with(String::new).push(escaped);
            }
            c if c.is_whitespace() && !in_quotes => {
                if let Some(token) = current.take() {
                    argv.push(token);
                }
            }
            c => {
                current.get_or_insert_with(String::new).push(c);
            }
        }
    }
    if in_quotes {
        return None;
    }
    if let Some(token) = current.take() {
        argv.push(token);
    }
    Some(argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_listing() {
        let listing = "1|'/bin/server' '--port=8080' \n42|'sleep' '300' \n";
        let processes = parse_listing(listing).unwrap();
        assert_eq!(
            processes,
            vec![
                ProcessInfo {
                    pid: 1,
                    argv: vec!["/bin/server".to_string(), "--port=8080".to_string()],
                },
                ProcessInfo {
                    pid: 42,
                    argv: vec!["sleep".to_string(), "300".to_string()],
                },
            ]
        );
        assert_eq!(processes[0].command(), "/bin/server --port=8080");
    }

    #[test]
    fn round_trips_embedded_spaces_and_quotes() {
        // What the remote script produces for argv
        // ["watch", "say \"hi\"", "o'clock"].
        let listing = "7|'watch' 'say \"hi\"' 'o'\\''clock' \n";
        let processes = parse_listing(listing).unwrap();
        assert_eq!(
            processes[0].argv,
            vec!["watch", "say \"hi\"", "o'clock"]
        );
    }

    #[test]
    fn malformed_line_fails_the_whole_call() {
        let listing = "1|'/bin/server' \nnot a listing line\n";
        let err = parse_listing(listing).unwrap_err();
        assert!(matches!(err, Error::ProcessListing { line } if line == "not a listing line"));
    }

    #[test]
    fn non_numeric_pid_is_malformed() {
        let err = parse_listing("abc|'sh' \n").unwrap_err();
        assert!(matches!(err, Error::ProcessListing { .. }));
    }

    #[test]
    fn unbalanced_quotes_are_malformed() {
        let err = parse_listing("9|'sh\n").unwrap_err();
        assert!(matches!(err, Error::ProcessListing { .. }));
    }

    #[test]
    fn empty_argv_is_malformed() {
        let err = parse_listing("9|   \n").unwrap_err();
        assert!(matches!(err, Error::ProcessListing { .. }));
    }

    #[test]
    fn blank_lines_are_ignored() {
        assert!(parse_listing("\n\n").unwrap().is_empty());
    }
}
