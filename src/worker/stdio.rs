//! Newline-delimited JSON host for a worker runtime.
//!
//! Reads one [`InboundMessage`] per line from a reader, forwards it to a
//! freshly spawned worker, and writes every [`OutboundMessage`] as one JSON
//! line to a writer. With stdin/stdout this lets the worker live in a child
//! process.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing) must be routed to stderr.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;

use super::protocol::{InboundMessage, OutboundMessage};
use super::{WorkerHandle, spawn_worker};
use crate::config::EmberConfig;
use crate::engine::EngineLoader;
use crate::error::{EmberError, ErrorKind, Result};

type SharedWriter<W> = Arc<Mutex<BufWriter<W>>>;

/// Serve a worker over stdin/stdout until stdin closes.
pub async fn run_stdio_worker(loader: Arc<dyn EngineLoader>, config: &EmberConfig) -> Result<()> {
    serve(loader, config, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve a worker over an arbitrary reader/writer pair.
///
/// On EOF the worker stops accepting input, finishes everything already
/// queued, and the remaining outbound messages are flushed before this
/// returns.
pub async fn serve<R, W>(
    loader: Arc<dyn EngineLoader>,
    config: &EmberConfig,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (handle, mut outbound_rx) = spawn_worker(loader, config);
    let writer: SharedWriter<W> = Arc::new(Mutex::new(BufWriter::new(writer)));

    let forward_writer = Arc::clone(&writer);
    let forwarder = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message; skipping");
                    continue;
                }
            };
            let mut w = forward_writer.lock().await;
            if let Err(e) = write_line(&mut w, &json).await {
                tracing::warn!(error = %e, "failed to write outbound message; stopping forwarder");
                break;
            }
        }
    });

    let read_result = run_reader(&handle, reader, &writer).await;

    handle.close().await;
    if let Err(e) = forwarder.await {
        tracing::warn!(error = %e, "outbound forwarder ended abnormally");
    }

    read_result
}

async fn run_reader<R, W>(handle: &WorkerHandle, reader: R, writer: &SharedWriter<W>) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| EmberError::Channel(format!("failed to read inbound line: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("input closed (EOF); closing worker");
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: InboundMessage = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse inbound message");
                let reply = OutboundMessage::Log {
                    text: format!("Ignored malformed message: {e}"),
                    kind: Some(ErrorKind::Config),
                };
                let json = serde_json::to_string(&reply).map_err(|se| {
                    EmberError::Channel(format!("failed to serialize parse-error log: {se}"))
                })?;
                let mut w = writer.lock().await;
                write_line(&mut w, &json).await?;
                continue;
            }
        };

        handle.send(message).await?;
    }
}

/// Write a single JSON line and flush.
async fn write_line<W>(writer: &mut BufWriter<W>, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| EmberError::Channel(format!("failed to write outbound line: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| EmberError::Channel(format!("failed to write newline: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| EmberError::Channel(format!("failed to flush output: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::testing::ScriptedLoader;
    use tokio::io::AsyncReadExt;

    async fn run_session(input: &str, loader: ScriptedLoader) -> Vec<OutboundMessage> {
        let (mut client_in, server_in) = tokio::io::duplex(64 * 1024);
        let (server_out, mut client_out) = tokio::io::duplex(64 * 1024);

        client_in.write_all(input.as_bytes()).await.unwrap();
        drop(client_in);

        serve(Arc::new(loader), &EmberConfig::default(), server_in, server_out)
            .await
            .expect("serve");

        let mut output = String::new();
        client_out.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|l| serde_json::from_str(l).expect("outbound json line"))
            .collect()
    }

    #[tokio::test]
    async fn serves_init_and_prompt_over_lines() {
        let messages = run_session(
            "{\"type\":\"init\"}\n\n{\"type\":\"prompt\",\"prompt\":\"hello\"}\n",
            ScriptedLoader::new(),
        )
        .await;

        assert!(messages.contains(&OutboundMessage::Ready));
        assert!(messages.contains(&OutboundMessage::ResponseFinal {
            text: "echo: hello".into()
        }));
    }

    #[tokio::test]
    async fn malformed_line_is_reported_and_skipped() {
        let messages = run_session(
            "not json\n{\"type\":\"init\"}\n",
            ScriptedLoader::new(),
        )
        .await;

        assert!(messages.iter().any(|m| matches!(
            m,
            OutboundMessage::Log {
                kind: Some(ErrorKind::Config),
                ..
            }
        )));
        assert!(messages.contains(&OutboundMessage::Ready));
    }
}
