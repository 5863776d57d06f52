use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use diskherd_core::{Disk, HerdError, Result, TransferPhase, TransferSession};
use diskherd_engine::{Engine, poll_until, wait_for_disk_status};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::proxy::{ChunkSink, ContentRange, HttpsProxy, ProxyTls};

/// Images are streamed in fixed 8 MiB chunks.
pub const CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Anything that can push a local image into a disk. The driver consumes
/// this so callers may substitute their own transport.
#[async_trait]
pub trait ImageUpload: Send + Sync {
    async fn upload(&self, disk: &Disk, image: &Path) -> Result<()>;
}

/// Drives one upload session end to end: initialize, stream, finalize.
///
/// There is no retry and no resume; a failed upload must be re-invoked from
/// scratch against a fresh session.
pub struct ImageUploader<'a, E: Engine + ?Sized> {
    engine: &'a E,
    tls: ProxyTls,
    poll_interval: Duration,
    timeout: Duration,
    chunk_size: u64,
}

impl<'a, E: Engine + ?Sized> ImageUploader<'a, E> {
    pub fn new(engine: &'a E, tls: ProxyTls, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            engine,
            tls,
            poll_interval,
            timeout,
            chunk_size: CHUNK_SIZE,
        }
    }

    #[cfg(test)]
    fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    async fn run(&self, disk: &Disk, image: &Path, sink: &dyn ChunkSink, session_id: &str) -> Result<()> {
        let streamed = self.stream(session_id, sink, image).await;
        // Finalization runs on every exit path. When both the chunk loop and
        // the finalize poll report failure, the chunk error is the root
        // cause and wins.
        let finalized = self.finalize(session_id, disk).await;
        streamed.and(finalized)
    }

    async fn stream(&self, session_id: &str, sink: &dyn ChunkSink, image: &Path) -> Result<()> {
        let total = tokio::fs::metadata(image).await?.len();
        let mut file = File::open(image).await?;
        let mut pos: u64 = 0;

        while pos < total {
            // Idle sessions expire; extend before every chunk.
            self.engine.transfer_extend(session_id).await?;

            let len = (total - pos).min(self.chunk_size) as usize;
            let mut chunk = vec![0u8; len];
            file.read_exact(&mut chunk).await?;

            let range = ContentRange {
                start: pos,
                end: pos + len as u64 - 1,
                total,
            };
            debug!("Uploading chunk {range}");
            let status = sink.put_chunk(&range, Bytes::from(chunk)).await?;
            if status >= 400 {
                return Err(HerdError::TransferChunk {
                    status,
                    range: range.to_string(),
                });
            }
            pos += len as u64;
        }

        Ok(())
    }

    async fn finalize(&self, session_id: &str, disk: &Disk) -> Result<()> {
        self.engine.transfer_finalize(session_id).await?;
        let session = self
            .wait_phase_leaves(
                session_id,
                &[TransferPhase::Transferring, TransferPhase::FinalizingSuccess],
                "transfer finalization",
            )
            .await?;
        if session.phase.is_failure() {
            return Err(HerdError::TransferFailed {
                phase: session.phase,
            });
        }

        // LUN attachment completion is asynchronous relative to the
        // transfer protocol itself.
        if disk.is_lun() {
            wait_for_disk_status(self.engine, &disk.id, self.poll_interval, self.timeout).await?;
        }

        info!("Image transfer {session_id} finished in phase {}", session.phase);
        Ok(())
    }

    async fn wait_phase_leaves(
        &self,
        session_id: &str,
        phases: &[TransferPhase],
        operation: &str,
    ) -> Result<TransferSession> {
        let engine = self.engine;
        poll_until(operation, self.poll_interval, self.timeout, || {
            let engine = engine;
            let session_id = session_id;
            let phases = phases;
            async move {
                let session = engine.transfer_get(session_id).await?;
                Ok(if phases.contains(&session.phase) {
                    None
                } else {
                    Some(session)
                })
            }
        })
        .await
    }
}

#[async_trait]
impl<E: Engine + ?Sized> ImageUpload for ImageUploader<'_, E> {
    async fn upload(&self, disk: &Disk, image: &Path) -> Result<()> {
        info!("Uploading {} into disk {}", image.display(), disk.id);

        let session = self.engine.transfer_start(&disk.id).await?;
        let session = self
            .wait_phase_leaves(
                &session.id,
                &[TransferPhase::Initializing],
                "transfer initialization",
            )
            .await?;

        let sink = HttpsProxy::connect(&session, &self.tls)?;
        self.run(disk, image, &sink, &session.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diskherd_core::{DiskFormat, DiskStatus, DiskStorage, LogicalUnit};
    use diskherd_engine::{ImageTransferService, MemoryEngine, TransferBehavior};
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    struct RecordingSink {
        ranges: Mutex<Vec<ContentRange>>,
        fail_at: Option<usize>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                ranges: Mutex::new(Vec::new()),
                fail_at: None,
            }
        }

        fn failing_at(chunk: usize) -> Self {
            Self {
                ranges: Mutex::new(Vec::new()),
                fail_at: Some(chunk),
            }
        }

        fn ranges(&self) -> Vec<ContentRange> {
            self.ranges.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChunkSink for RecordingSink {
        async fn put_chunk(&self, range: &ContentRange, _body: Bytes) -> Result<u16> {
            let mut ranges = self.ranges.lock().unwrap();
            ranges.push(*range);
            if self.fail_at == Some(ranges.len()) {
                return Ok(500);
            }
            Ok(200)
        }
    }

    fn image_disk(id: &str) -> Disk {
        Disk {
            id: id.to_string(),
            name: Some(id.to_string()),
            description: None,
            status: DiskStatus::Ok,
            shareable: false,
            storage: DiskStorage::Image {
                format: DiskFormat::Cow,
                provisioned_size: 1024,
                storage_domains: vec![],
            },
        }
    }

    fn lun_disk(id: &str) -> Disk {
        Disk {
            id: id.to_string(),
            name: None,
            description: None,
            status: DiskStatus::Ok,
            shareable: false,
            storage: DiskStorage::Lun(LogicalUnit::new("1IET_000d0001")),
        }
    }

    fn temp_image(len: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![0xabu8; len]).unwrap();
        file.flush().unwrap();
        file
    }

    fn uploader(engine: &MemoryEngine) -> ImageUploader<'_, MemoryEngine> {
        ImageUploader::new(
            engine,
            ProxyTls::default(),
            Duration::from_millis(1),
            Duration::from_secs(5),
        )
        .with_chunk_size(4)
    }

    async fn start_session(engine: &MemoryEngine, disk_id: &str) -> String {
        let session = engine.transfer_start(disk_id).await.unwrap();
        // Step past the init phase so run() can begin streaming.
        engine.transfer_get(&session.id).await.unwrap();
        session.id
    }

    #[tokio::test]
    async fn chunk_count_and_ranges() {
        let engine = MemoryEngine::new();
        let disk = image_disk("d1");
        let image = temp_image(10);
        let sink = RecordingSink::new();
        let session_id = start_session(&engine, &disk.id).await;

        uploader(&engine)
            .run(&disk, image.path(), &sink, &session_id)
            .await
            .unwrap();

        let ranges = sink.ranges();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].to_string(), "bytes 0-3/10");
        assert_eq!(ranges[1].to_string(), "bytes 4-7/10");
        assert_eq!(ranges[2].to_string(), "bytes 8-9/10");
        // The final chunk ends on the last byte of the image.
        assert_eq!(ranges[2].end, 9);
    }

    #[tokio::test]
    async fn session_is_extended_before_every_chunk() {
        let engine = MemoryEngine::new();
        let disk = image_disk("d1");
        let image = temp_image(12);
        let sink = RecordingSink::new();
        let session_id = start_session(&engine, &disk.id).await;

        uploader(&engine)
            .run(&disk, image.path(), &sink, &session_id)
            .await
            .unwrap();

        let journal = engine.journal().await;
        let extends = journal
            .iter()
            .filter(|e| e.starts_with("transfer_extend"))
            .count();
        assert_eq!(extends, 3);
    }

    #[tokio::test]
    async fn server_error_aborts_and_still_finalizes() {
        let engine = MemoryEngine::new();
        let disk = image_disk("d1");
        let image = temp_image(12);
        let sink = RecordingSink::failing_at(2);
        let session_id = start_session(&engine, &disk.id).await;

        let err = uploader(&engine)
            .run(&disk, image.path(), &sink, &session_id)
            .await
            .unwrap_err();

        match err {
            HerdError::TransferChunk { status, .. } => assert_eq!(status, 500),
            other => panic!("expected chunk error, got {other}"),
        }
        // No chunk after the failing one.
        assert_eq!(sink.ranges().len(), 2);
        // The session was finalized regardless.
        let journal = engine.journal().await;
        assert!(
            journal
                .iter()
                .any(|e| e.starts_with("transfer_finalize"))
        );
    }

    #[tokio::test]
    async fn cancelled_session_surfaces_its_phase() {
        let engine = MemoryEngine::new();
        engine
            .set_transfer_behavior(TransferBehavior {
                terminal_phase: TransferPhase::Cancelled,
                ..TransferBehavior::default()
            })
            .await;
        let disk = image_disk("d1");
        let image = temp_image(4);
        let sink = RecordingSink::new();
        let session_id = start_session(&engine, &disk.id).await;

        let err = uploader(&engine)
            .run(&disk, image.path(), &sink, &session_id)
            .await
            .unwrap_err();

        match err {
            HerdError::TransferFailed { phase } => assert_eq!(phase, TransferPhase::Cancelled),
            other => panic!("expected transfer failure, got {other}"),
        }
    }

    #[tokio::test]
    async fn lun_disk_waits_for_status_after_finalize() {
        let engine = MemoryEngine::new();
        let disk = lun_disk("d1");
        engine.seed_disk(disk.clone()).await;
        let image = temp_image(4);
        let sink = RecordingSink::new();
        let session_id = start_session(&engine, &disk.id).await;

        uploader(&engine)
            .run(&disk, image.path(), &sink, &session_id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stuck_initialization_times_out() {
        let engine = MemoryEngine::new();
        engine
            .set_transfer_behavior(TransferBehavior {
                init_polls: u32::MAX,
                ..TransferBehavior::default()
            })
            .await;
        engine.seed_disk(image_disk("d1")).await;

        let uploader = ImageUploader::new(
            &engine,
            ProxyTls::default(),
            Duration::from_millis(1),
            Duration::from_millis(20),
        );
        let image = temp_image(4);
        let disk = image_disk("d1");

        let err = uploader.upload(&disk, image.path()).await.unwrap_err();
        assert!(matches!(err, HerdError::TimeoutExceeded { .. }));
    }
}
