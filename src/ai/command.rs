use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{AppError, Result};
use crate::models::CanonicalItem;

use super::prompt::build_prompt;
use super::Summarize;

/// Summaries from an external program that reads the prompt on stdin and
/// prints the summary on stdout.
pub struct CommandSummarizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    max_content_chars: usize,
}

impl CommandSummarizer {
    pub fn new(command: &[String], timeout_secs: u64, max_content_chars: usize) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::Config("summarizer command is empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout: Duration::from_secs(timeout_secs),
            max_content_chars,
        })
    }

    async fn run(&self, prompt: String) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            // Dropping stdin closes the pipe so the program sees EOF.
        }

        let output = child.wait_with_output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            return Err(AppError::Summarization(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                if stderr.is_empty() { "no error output" } else { stderr }
            )));
        }
        if stdout.is_empty() {
            return Err(AppError::Summarization(format!("{} returned empty output", self.program)));
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Summarize for CommandSummarizer {
    async fn summarize(&self, item: &CanonicalItem) -> Result<String> {
        let prompt = build_prompt(item, self.max_content_chars);
        tokio::time::timeout(self.timeout, self.run(prompt))
            .await
            .map_err(|_| AppError::Summarization(format!("timed out after {:?}", self.timeout)))?
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn item() -> CanonicalItem {
        CanonicalItem {
            source: SourceKind::GitHub,
            url: "https://github.com/a/b".into(),
            source_url: "https://github.com/a/b".into(),
            title: "a/b".into(),
            body: Some("A library".into()),
            published_at: None,
            duplicates: vec![],
            related: vec![],
        }
    }

    fn sh(script: &str, timeout_secs: u64) -> CommandSummarizer {
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        CommandSummarizer::new(&command, timeout_secs, 1000).unwrap()
    }

    #[tokio::test]
    async fn prompt_goes_to_stdin() {
        let summary = sh("grep '^Title:'", 10).summarize(&item()).await.unwrap();
        assert_eq!(summary, "Title: a/b");
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let err = sh("cat >/dev/null; echo boom >&2; exit 3", 10).summarize(&item()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let err = sh("cat >/dev/null; sleep 5", 1).summarize(&item()).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandSummarizer::new(&[], 10, 100).is_err());
    }
}
