//! Combined stdout/stderr pump for one child process.
//!
//! Each stream gets its own reader task so neither pipe can fill up and stall
//! the child. Lines meet in an unbounded channel and a single writer appends
//! them, timestamped, to the case log and echoes them to the console.

use chrono::Local;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const OUTPUT_TARGET: &str = "case_output";

/// `[HH:MM:SS.mmm] line`
pub fn format_log_line(line: &str) -> String {
    format!("[{}] {}\n", Local::now().format("%H:%M:%S%.3f"), line)
}

/// Start pumping. The returned task resolves to the number of lines seen once
/// both streams hit EOF.
pub fn start_pump<O, E>(
    stdout: Option<O>,
    stderr: Option<E>,
    log: File,
    log_path: PathBuf,
    label: String,
) -> JoinHandle<u64>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<String>();

    if let Some(stdout) = stdout {
        tokio::spawn(read_lines(stdout, tx.clone(), "stdout"));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(read_lines(stderr, tx.clone(), "stderr"));
    }
    drop(tx);

    tokio::spawn(write_lines(rx, log, log_path, label))
}

async fn read_lines<R>(stream: R, tx: mpsc::UnboundedSender<String>, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(stream = name, error = %e, "error reading process output");
                break;
            }
        }
    }
}

async fn write_lines(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut log: File,
    log_path: PathBuf,
    label: String,
) -> u64 {
    let mut lines = 0u64;
    let mut file_ok = true;

    while let Some(line) = rx.recv().await {
        lines += 1;
        info!(target: OUTPUT_TARGET, process = %label, "{}", line);

        if !file_ok {
            continue;
        }
        let entry = format_log_line(&line);
        let written = async {
            log.write_all(entry.as_bytes()).await?;
            log.flush().await
        }
        .await;
        if let Err(e) = written {
            // Keep draining the pipes so the child never blocks on a full buffer.
            warn!(path = %log_path.display(), error = %e, "log file write failed, console only from here");
            file_ok = false;
        }
    }

    debug!(process = %label, lines, "output pump finished");
    lines
}
