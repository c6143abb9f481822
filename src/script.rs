use crate::error::ImportError;
use log::{debug, warn};
use regex::Regex;
use serde_json::Value;
use std::process::{ExitStatus, Stdio};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// 结果行前缀
pub const RESULT_SENTINEL: &str = "RESULT: ";

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Progress: (\d+)%").expect("progress pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

/// 进程退出后的完整输出
#[derive(Debug)]
pub struct ScriptOutput {
    pub status: ExitStatus,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ScriptOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    pub fn stderr_text(&self) -> String {
        self.stderr.join("\n").trim().to_string()
    }

    pub fn result_json(&self) -> Option<Value> {
        find_result_json(&self.stdout)
    }
}

/// 外部脚本进程，逐行读取输出，超过截止时间即终止
pub struct ScriptProcess {
    label: String,
    child: Child,
    lines: mpsc::Receiver<OutputLine>,
    readers: Vec<JoinHandle<()>>,
    timeout: Duration,
    deadline: Instant,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

impl ScriptProcess {
    pub fn spawn(program: &str, args: &[String], timeout: Duration) -> Result<Self, ImportError> {
        let label = program.to_string();
        debug!("[Script] Spawning {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ImportError::Process(format!("Failed to start {}: {}", label, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ImportError::Process(format!("{} stdout not available", label)))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ImportError::Process(format!("{} stderr not available", label)))?;

        let (tx, rx) = mpsc::channel(256);
        let readers = vec![
            pipe_lines(stdout, OutputStream::Stdout, tx.clone()),
            pipe_lines(stderr, OutputStream::Stderr, tx),
        ];

        Ok(Self {
            label,
            child,
            lines: rx,
            readers,
            timeout,
            deadline: Instant::now() + timeout,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    }

    /// 下一行输出，两个管道都关闭后返回 None
    pub async fn next_line(&mut self) -> Result<Option<OutputLine>, ImportError> {
        match tokio::time::timeout_at(self.deadline, self.lines.recv()).await {
            Ok(Some(line)) => {
                match line.stream {
                    OutputStream::Stdout => self.stdout.push(line.text.clone()),
                    OutputStream::Stderr => self.stderr.push(line.text.clone()),
                }
                Ok(Some(line))
            }
            Ok(None) => Ok(None),
            Err(_) => {
                self.kill().await;
                Err(self.timeout_error())
            }
        }
    }

    /// 读完剩余输出并等待退出
    pub async fn wait(mut self) -> Result<ScriptOutput, ImportError> {
        while self.next_line().await?.is_some() {}

        let status = match tokio::time::timeout_at(self.deadline, self.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                self.kill().await;
                return Err(self.timeout_error());
            }
        };

        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        debug!("[Script] {} exited with {}", self.label, status);

        Ok(ScriptOutput {
            status,
            stdout: std::mem::take(&mut self.stdout),
            stderr: std::mem::take(&mut self.stderr),
        })
    }

    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("[Script] Failed to kill {}: {}", self.label, e);
        } else {
            warn!("[Script] Killed {}", self.label);
        }
    }

    fn timeout_error(&self) -> ImportError {
        ImportError::Timeout(format!(
            "{} did not finish within {}",
            self.label,
            humantime::format_duration(self.timeout)
        ))
    }
}

/// 按字节读取，非 UTF-8 内容有损转换；接收端关闭后仍读到 EOF
fn pipe_lines<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        let mut forwarding = true;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if !forwarding {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\n', '\r'])
                        .to_string();
                    if tx.send(OutputLine { stream, text }).await.is_err() {
                        forwarding = false;
                    }
                }
                Err(e) => {
                    debug!("[Script] Failed to read {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}

/// 解析 `Progress: N%`
pub fn parse_progress(line: &str) -> Option<u32> {
    PROGRESS_RE
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// 查找结果对象：优先最后一条 `RESULT: ` 行，否则取最后一行完整的单行 JSON 对象
pub fn find_result_json<S: AsRef<str>>(lines: &[S]) -> Option<Value> {
    let sentinel = lines.iter().rev().find_map(|line| {
        line.as_ref()
            .trim()
            .strip_prefix(RESULT_SENTINEL)
            .and_then(|payload| serde_json::from_str::<Value>(payload).ok())
            .filter(Value::is_object)
    });
    if sentinel.is_some() {
        return sentinel;
    }

    lines.iter().rev().find_map(|line| {
        let line = line.as_ref().trim();
        if line.starts_with('{') && line.ends_with('}') {
            serde_json::from_str::<Value>(line)
                .ok()
                .filter(Value::is_object)
        } else {
            None
        }
    })
}
