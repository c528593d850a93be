//! Exec commands, results, and the per-deployment result collection.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{CoreError, CoreResult};

/// A command to run inside a node or on the host, pre-split into argv.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCmd {
    pub cmd: Vec<String>,
}

impl ExecCmd {
    /// Split a shell-like command string, honouring single and double
    /// quotes and backslash escapes.
    pub fn parse(command: &str) -> CoreResult<Self> {
        let cmd = split_command(command).map_err(|reason| CoreError::InvalidCommand {
            command: command.to_string(),
            reason: reason.to_string(),
        })?;
        if cmd.is_empty() {
            return Err(CoreError::InvalidCommand {
                command: command.to_string(),
                reason: "empty command".to_string(),
            });
        }
        Ok(Self { cmd })
    }

    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cmd: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn command_string(&self) -> String {
        self.cmd.join(" ")
    }
}

fn split_command(input: &str) -> Result<Vec<String>, &'static str> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated single quote"),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch) => current.push(ch),
                            None => return Err("dangling escape"),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err("unterminated double quote"),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => return Err("dangling escape"),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

/// Outcome of one exec command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecResult {
    pub cmd: Vec<String>,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn new(cmd: &ExecCmd) -> Self {
        Self {
            cmd: cmd.cmd.clone(),
            ..Default::default()
        }
    }

    pub fn command_string(&self) -> String {
        self.cmd.join(" ")
    }

    /// JSON view of the result. Stdout that is itself valid JSON is embedded
    /// as a value instead of a quoted string.
    pub fn to_json(&self) -> serde_json::Value {
        let stdout = serde_json::from_str::<serde_json::Value>(&self.stdout)
            .unwrap_or_else(|_| serde_json::Value::String(self.stdout.clone()));
        serde_json::json!({
            "cmd": self.cmd,
            "return-code": self.return_code,
            "stdout": stdout,
            "stderr": self.stderr,
        })
    }
}

impl fmt::Display for ExecResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cmd: {}\nReturnCode: {}",
            self.command_string(),
            self.return_code
        )?;
        if !self.stdout.is_empty() {
            write!(f, "\nStdout: {:?}", self.stdout)?;
        }
        if !self.stderr.is_empty() {
            write!(f, "\nStderr: {:?}", self.stderr)?;
        }
        Ok(())
    }
}

/// Output format for [`ExecCollection::dump`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecFormat {
    Plain,
    Json,
}

/// Thread-safe store of exec results, keyed by the node (or host) they ran on.
#[derive(Debug, Default)]
pub struct ExecCollection {
    entries: RwLock<BTreeMap<String, Vec<ExecResult>>>,
}

impl ExecCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, target: &str, result: ExecResult) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(target.to_string()).or_default().push(result);
    }

    pub fn add_all(&self, target: &str, results: impl IntoIterator<Item = ExecResult>) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.entry(target.to_string()).or_default().extend(results);
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .all(Vec::is_empty)
    }

    /// Snapshot of results recorded for `target`.
    pub fn results_for(&self, target: &str) -> Vec<ExecResult> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(target)
            .cloned()
            .unwrap_or_default()
    }

    /// Emit every result through `tracing`: failures at error level,
    /// successes at info.
    pub fn log(&self) {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        for (target, results) in entries.iter() {
            for result in results {
                if result.return_code == 0 {
                    info!(
                        node = %target,
                        cmd = %result.command_string(),
                        stdout = %result.stdout,
                        "executed command"
                    );
                } else {
                    error!(
                        node = %target,
                        cmd = %result.command_string(),
                        return_code = result.return_code,
                        stderr = %result.stderr,
                        "command failed"
                    );
                }
            }
        }
    }

    pub fn dump(&self, format: ExecFormat) -> String {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        match format {
            ExecFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(target, results)| {
                        let values = results.iter().map(ExecResult::to_json).collect();
                        (target.clone(), serde_json::Value::Array(values))
                    })
                    .collect();
                serde_json::to_string_pretty(&map).unwrap_or_default()
            }
            ExecFormat::Plain => entries
                .iter()
                .flat_map(|(target, results)| {
                    results
                        .iter()
                        .map(move |r| format!("Executed command node={target}\n{r}"))
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Run a command on the control-plane host.
pub async fn run_host_exec(cmd: &ExecCmd) -> CoreResult<ExecResult> {
    let (program, args) = cmd.cmd.split_first().ok_or_else(|| CoreError::InvalidCommand {
        command: String::new(),
        reason: "empty command".to_string(),
    })?;

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await?;

    let mut result = ExecResult::new(cmd);
    result.return_code = output.status.code().unwrap_or(-1);
    result.stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    result.stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_quoted_arguments() {
        let cmd = ExecCmd::parse(r#"sh -c "echo 'hi there'" plain\ arg"#).unwrap();
        assert_eq!(cmd.cmd, vec!["sh", "-c", "echo 'hi there'", "plain arg"]);
    }

    #[test]
    fn parse_rejects_unterminated_quote_and_empty() {
        assert!(matches!(
            ExecCmd::parse("echo 'oops"),
            Err(CoreError::InvalidCommand { .. })
        ));
        assert!(matches!(
            ExecCmd::parse("   "),
            Err(CoreError::InvalidCommand { .. })
        ));
    }

    #[test]
    fn json_dump_embeds_valid_json_stdout() {
        let log = ExecCollection::new();
        let cmd = ExecCmd::from_args(["show", "version"]);
        let mut res = ExecResult::new(&cmd);
        res.stdout = r#"{"version":"1.2"}"#.to_string();
        log.add("r1", res);

        let dumped: serde_json::Value = serde_json::from_str(&log.dump(ExecFormat::Json)).unwrap();
        assert_eq!(dumped["r1"][0]["stdout"]["version"], "1.2");
        assert_eq!(dumped["r1"][0]["return-code"], 0);
    }

    #[test]
    fn plain_dump_keeps_text_stdout() {
        let log = ExecCollection::new();
        let cmd = ExecCmd::from_args(["uptime"]);
        let mut res = ExecResult::new(&cmd);
        res.stdout = "up 3 days".to_string();
        log.add_all("r2", [res]);

        let dumped = log.dump(ExecFormat::Plain);
        assert!(dumped.contains("node=r2"));
        assert!(dumped.contains("Cmd: uptime"));
        assert!(dumped.contains("up 3 days"));
        assert!(!log.is_empty());
        assert_eq!(log.results_for("r2").len(), 1);
    }

    #[tokio::test]
    async fn host_exec_captures_output() {
        let cmd = ExecCmd::from_args(["sh", "-c", "echo out; echo err >&2; exit 3"]);
        let res = run_host_exec(&cmd).await.unwrap();
        assert_eq!(res.return_code, 3);
        assert_eq!(res.stdout.trim(), "out");
        assert_eq!(res.stderr.trim(), "err");
    }
}
