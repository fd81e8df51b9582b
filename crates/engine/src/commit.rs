//! The commit pipeline: tar + gzip the workspace, re-chunk, hash, store.
//!
//! A blocking producer walks the workspace into a gzipped tar writer
//! backed by a bounded byte channel; the async consumer re-frames the
//! stream into fixed-size chunks and writes each to storage. Both sides
//! run inside the caller's critical section, coupled by the channel's
//! back-pressure.

use crate::workspace::{CHECKOUT_MARKER, Workspace};
use bytes::{Bytes, BytesMut};
use dcd_core::progress::ProgressSink;
use dcd_core::{ContentHash, OperationError};
use dcd_store::RepoStore;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::{self, Write};
use tokio::sync::mpsc;

/// Buffers in flight between producer and consumer.
const PIPE_DEPTH: usize = 16;

/// Adapts the byte channel into a blocking [`Write`] for the tar writer.
///
/// When the consumer goes away the next write fails with `BrokenPipe`,
/// aborting the producer mid-archive.
struct ChannelWriter {
    tx: mpsc::Sender<Bytes>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Bytes::copy_from_slice(buf))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "chunk consumer closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn build_archive(workspace: &Workspace, tx: mpsc::Sender<Bytes>) -> io::Result<()> {
    let gz = GzEncoder::new(ChannelWriter { tx }, Compression::default());
    let mut builder = tar::Builder::new(gz);

    workspace.walk(|rel, meta, reader| {
        if rel == "." || rel == CHECKOUT_MARKER {
            return Ok(());
        }

        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(meta, tar::HeaderMode::Complete);
        if meta.is_dir() {
            header.set_size(0);
            builder.append_data(&mut header, rel, io::empty())
        } else {
            let reader = reader.expect("regular file without stream");
            builder.append_data(&mut header, rel, reader)
        }
    })?;

    tracing::debug!("archive finished, closing pipe");
    let gz = builder.into_inner()?;
    gz.finish()?;
    Ok(())
}

async fn store_chunk(
    store: &RepoStore,
    chunk: &[u8],
    hashes: &mut Vec<String>,
) -> dcd_core::Result<()> {
    let hash = ContentHash::compute(chunk).to_hex();
    store
        .write_chunk(&hash, chunk)
        .await
        .map_err(OperationError::internal)?;
    hashes.push(hash);
    Ok(())
}

/// Archive the workspace and write it back to storage as chunks.
///
/// Returns the new hash list in chunk order; the published list is not
/// swapped here, callers follow up with
/// [`RepoStore::set_hashes`](dcd_store::RepoStore::set_hashes).
pub async fn commit_workspace(
    store: &RepoStore,
    workspace: &Workspace,
    chunk_size: usize,
    progress: Option<&dyn ProgressSink>,
) -> dcd_core::Result<Vec<String>> {
    let (tx, mut rx) = mpsc::channel::<Bytes>(PIPE_DEPTH);

    let producer = tokio::task::spawn_blocking({
        let workspace = workspace.clone();
        move || build_archive(&workspace, tx)
    });

    let mut hashes_new: Vec<String> = Vec::new();
    let mut pending = BytesMut::new();
    let mut done: i64 = 0;
    let mut failure: Option<OperationError> = None;

    'consume: while let Some(buf) = rx.recv().await {
        pending.extend_from_slice(&buf);
        while pending.len() >= chunk_size {
            let chunk = pending.split_to(chunk_size);
            tracing::debug!(len = chunk.len(), "read full chunk");
            if let Err(e) = store_chunk(store, &chunk, &mut hashes_new).await {
                failure = Some(e);
                break 'consume;
            }
            done += 1;
            if let Some(p) = progress {
                p.set_progress(done);
            }
        }
    }

    if let Some(err) = failure {
        // Closing the receiver breaks the pipe under the producer.
        drop(rx);
        let _ = producer.await;
        return Err(err);
    }

    // Channel drained cleanly; surface any producer-side error before the
    // final short chunk so a truncated archive is never published.
    producer
        .await
        .map_err(OperationError::internal)?
        .map_err(OperationError::from)?;

    if !pending.is_empty() {
        tracing::debug!(len = pending.len(), "read partial chunk");
        store_chunk(store, &pending, &mut hashes_new).await?;
        done += 1;
        if let Some(p) = progress {
            p.set_progress(done);
        }
    }

    tracing::debug!(chunks = hashes_new.len(), "workspace re-chunked");
    Ok(hashes_new)
}
