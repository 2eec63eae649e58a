use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::config::{SourceKind, SourceSettings};
use crate::error::SourceError;

/// Where raw report text comes from, and where the cleaned text goes back.
pub trait TextSource {
    fn describe(&self) -> String;

    /// Current text. Whitespace-only content is [`SourceError::Empty`].
    fn fetch(&self) -> Result<String, SourceError>;

    fn replace(&self, text: &str) -> Result<(), SourceError>;
}

pub fn build_source(settings: &SourceSettings) -> Box<dyn TextSource> {
    match settings.kind {
        SourceKind::File => Box::new(FileSource::new(&settings.path)),
        SourceKind::Command => Box::new(CommandSource::new(
            settings.fetch_command.clone(),
            settings.replace_command.clone(),
            settings.timeout(),
        )),
    }
}

fn non_empty(text: String) -> Result<String, SourceError> {
    if text.trim().is_empty() {
        Err(SourceError::Empty)
    } else {
        Ok(text)
    }
}

// ── File ──

/// A text or HTML export on disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileSource {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TextSource for FileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }

    fn fetch(&self) -> Result<String, SourceError> {
        let text = fs::read_to_string(&self.path).map_err(|source| SourceError::Read {
            path: self.path.clone(),
            source,
        })?;
        non_empty(text)
    }

    fn replace(&self, text: &str) -> Result<(), SourceError> {
        let write_err = |source: io::Error| SourceError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = NamedTempFile::new_in(&dir).map_err(write_err)?;
        tmp.write_all(text.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

// ── External command ──

/// Runs configured programs, e.g. an `osascript` wrapper around a notes app.
/// Replacement text travels on stdin and is never spliced into the script.
#[derive(Debug, Clone)]
pub struct CommandSource {
    fetch: Vec<String>,
    replace: Vec<String>,
    timeout: Duration,
}

impl CommandSource {
    pub fn new(fetch: Vec<String>, replace: Vec<String>, timeout: Duration) -> Self {
        CommandSource {
            fetch,
            replace,
            timeout,
        }
    }

    fn run(&self, argv: &[String], what: &'static str, input: Option<&str>) -> Result<String, SourceError> {
        let (program, args) = argv.split_first().ok_or(SourceError::NotConfigured(what))?;
        let spawn_err = |source: io::Error| SourceError::Command {
            program: program.clone(),
            source,
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(spawn_err)?;

        runtime.block_on(async {
            let mut child = Command::new(program)
                .args(args)
                .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(spawn_err)?;

            let work = async move {
                if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
                    match stdin.write_all(text.as_bytes()).await {
                        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                        _ => {}
                    }
                    drop(stdin);
                }
                child.wait_with_output().await
            };

            let output = match tokio::time::timeout(self.timeout, work).await {
                Err(_) => return Err(SourceError::Timeout(self.timeout)),
                Ok(result) => result.map_err(spawn_err)?,
            };

            if !output.status.success() {
                return Err(SourceError::Failed {
                    program: program.clone(),
                    status: output.status.to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            debug!(%program, bytes = output.stdout.len(), "command finished");
            Ok::<_, SourceError>(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }
}

impl TextSource for CommandSource {
    fn describe(&self) -> String {
        match self.fetch.first() {
            Some(program) => format!("command {program}"),
            None => "command (unset)".to_string(),
        }
    }

    fn fetch(&self) -> Result<String, SourceError> {
        let mut text = self.run(&self.fetch, "fetch", None)?;
        // tools like osascript terminate their output with one newline
        if text.ends_with('\n') {
            text.pop();
        }
        non_empty(text)
    }

    fn replace(&self, text: &str) -> Result<(), SourceError> {
        self.run(&self.replace, "replace", Some(text)).map(|_| ())
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[test]
    fn file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memo.txt");
        fs::write(&path, "混雑状況 15人 08:30時点\n").unwrap();

        let source = FileSource::new(&path);
        assert_eq!(source.fetch().unwrap(), "混雑状況 15人 08:30時点\n");
        source.replace("残り").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "残り");
    }

    #[test]
    fn file_missing_or_blank() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memo.txt");
        assert!(matches!(FileSource::new(&path).fetch(), Err(SourceError::Read { .. })));
        fs::write(&path, " \n\t").unwrap();
        assert!(matches!(FileSource::new(&path).fetch(), Err(SourceError::Empty)));
    }

    #[cfg(unix)]
    #[test]
    fn command_fetch_strips_one_newline() {
        let source = CommandSource::new(sh("printf 'a\\n\\n'"), vec![], Duration::from_secs(5));
        assert_eq!(source.fetch().unwrap(), "a\n");
    }

    #[cfg(unix)]
    #[test]
    fn command_failure_reports_stderr() {
        let source = CommandSource::new(sh("echo nope >&2; exit 3"), vec![], Duration::from_secs(5));
        match source.fetch() {
            Err(SourceError::Failed { stderr, .. }) => assert_eq!(stderr, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn command_timeout() {
        let source = CommandSource::new(sh("sleep 5"), vec![], Duration::from_millis(200));
        assert!(matches!(source.fetch(), Err(SourceError::Timeout(_))));
    }

    #[cfg(unix)]
    #[test]
    fn command_replace_uses_stdin() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let script = format!("cat > '{}'", out.display());
        let source = CommandSource::new(vec![], sh(&script), Duration::from_secs(5));
        let text = "he said \"hi\"; $(rm -rf /)\n改行";
        source.replace(text).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), text);
    }

    #[test]
    fn unconfigured_commands() {
        let source = CommandSource::new(vec![], vec![], Duration::from_secs(1));
        assert!(matches!(source.fetch(), Err(SourceError::NotConfigured("fetch"))));
        assert!(matches!(source.replace("x"), Err(SourceError::NotConfigured("replace"))));
    }

    #[test]
    fn missing_program() {
        let source = CommandSource::new(
            vec!["/definitely/not/a/program".into()],
            vec![],
            Duration::from_secs(1),
        );
        assert!(matches!(source.fetch(), Err(SourceError::Command { .. })));
    }
}
