//! Virtual filesystem and stdio interception.
//!
//! The module's stdout and stderr are wasmtime-wasi output streams backed
//! by in-memory pipes, and `fd_write` stays the adapter's own. Every write
//! to fd 1 or fd 2 is stored in full, then decoded as text and forwarded
//! to the configured callback.

use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use wasmtime_wasi::cli::{IsTerminal, StdoutStream};
use wasmtime_wasi::p2::pipe::MemoryOutputPipe;
use wasmtime_wasi::p2::{OutputStream, Pollable, StreamResult};

use crate::config::RunnerConfig;

/// Callback receiving decoded output text
pub type OutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Output pipes never refuse a write.
const PIPE_CAPACITY: usize = usize::MAX;

/// One intercepted output descriptor.
///
/// Clones share the same pipe and callback.
#[derive(Clone)]
pub struct CapturedOutput {
    pipe: MemoryOutputPipe,
    callback: OutputCallback,
}

impl CapturedOutput {
    /// Create an empty output forwarding to `callback`
    pub fn new(callback: OutputCallback) -> Self {
        Self {
            pipe: MemoryOutputPipe::new(PIPE_CAPACITY),
            callback,
        }
    }

    /// Everything written so far
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.pipe.contents()).into_owned()
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.pipe.contents().len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store one write, then forward exactly those bytes.
    ///
    /// A bare newline is a flush artifact and is not forwarded, neither is
    /// an empty write. Both are still stored.
    pub fn record(&mut self, bytes: Bytes) -> StreamResult<()> {
        self.pipe.write(bytes.clone())?;

        if bytes.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&bytes);
        if text != "\n" {
            (self.callback)(&text);
        }
        Ok(())
    }
}

impl OutputStream for CapturedOutput {
    fn write(&mut self, bytes: Bytes) -> StreamResult<()> {
        self.record(bytes)
    }

    fn flush(&mut self) -> StreamResult<()> {
        self.pipe.flush()
    }

    fn check_write(&mut self) -> StreamResult<usize> {
        self.pipe.check_write()
    }
}

#[async_trait::async_trait]
impl Pollable for CapturedOutput {
    async fn ready(&mut self) {}
}

impl AsyncWrite for CapturedOutput {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let written = self
            .get_mut()
            .record(Bytes::copy_from_slice(buf))
            .map(|()| buf.len())
            .map_err(|e| io::Error::other(format!("{:?}", e)));
        Poll::Ready(written)
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl IsTerminal for CapturedOutput {
    fn is_terminal(&self) -> bool {
        false
    }
}

impl StdoutStream for CapturedOutput {
    fn p2_stream(&self) -> Box<dyn OutputStream> {
        Box::new(self.clone())
    }

    fn async_stream(&self) -> Box<dyn AsyncWrite + Send + Sync> {
        Box::new(self.clone())
    }
}

/// In-memory stdio of one runner
#[derive(Clone)]
pub struct VirtualFs {
    stdout: CapturedOutput,
    stderr: CapturedOutput,
}

impl VirtualFs {
    /// Create the filesystem.
    ///
    /// When console mirroring is enabled the text is echoed to the host's
    /// stdout/stderr before the callback runs.
    pub fn new(config: &RunnerConfig, on_stdout: OutputCallback, on_stderr: OutputCallback) -> Self {
        let (on_stdout, on_stderr) = if config.mirror_console {
            (mirror(on_stdout, false), mirror(on_stderr, true))
        } else {
            (on_stdout, on_stderr)
        };

        Self {
            stdout: CapturedOutput::new(on_stdout),
            stderr: CapturedOutput::new(on_stderr),
        }
    }

    /// Stream installed as the module's fd 1
    pub fn stdout(&self) -> CapturedOutput {
        self.stdout.clone()
    }

    /// Stream installed as the module's fd 2
    pub fn stderr(&self) -> CapturedOutput {
        self.stderr.clone()
    }

    /// Everything written to stdout so far
    pub fn stdout_contents(&self) -> String {
        self.stdout.contents()
    }

    /// Everything written to stderr so far
    pub fn stderr_contents(&self) -> String {
        self.stderr.contents()
    }
}

fn mirror(callback: OutputCallback, to_stderr: bool) -> OutputCallback {
    Arc::new(move |text: &str| {
        let line = text.strip_suffix('\n').unwrap_or(text);
        if to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
        callback(text);
    })
}
