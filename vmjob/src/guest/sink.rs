use crate::events::Output;
use std::{io, path::Path};
use tokio::{fs::File, io::AsyncWriteExt, sync::mpsc};

/// Where script output goes: the job's log file, and optionally a live subscriber.
pub struct LogSink {
    file: File,
    subscriber: Option<mpsc::UnboundedSender<Output>>,
}

impl LogSink {
    /// Create (or truncate) the log file at `path`.
    pub async fn create(
        path: &Path,
        subscriber: Option<mpsc::UnboundedSender<Output>>,
    ) -> io::Result<Self> {
        let file = File::create(path).await?;
        Ok(Self { file, subscriber })
    }

    pub async fn write(&mut self, output: Output) -> io::Result<()> {
        self.file.write_all(output.blob()).await?;
        if let Some(subscriber) = &self.subscriber {
            // a subscriber that went away only stops the live copy
            if subscriber.send(output).is_err() {
                self.subscriber = None;
            }
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn interleaves_streams_into_one_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.txt");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = LogSink::create(&path, Some(tx)).await.unwrap();
        sink.write(Output::Stdout(Bytes::from_static(b"out\n")))
            .await
            .unwrap();
        sink.write(Output::Stderr(Bytes::from_static(b"err\n")))
            .await
            .unwrap();
        sink.flush().await.unwrap();
        drop(sink);

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "out\nerr\n");
        assert_eq!(
            rx.recv().await,
            Some(Output::Stdout(Bytes::from_static(b"out\n")))
        );
        assert_eq!(
            rx.recv().await,
            Some(Output::Stderr(Bytes::from_static(b"err\n")))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn truncates_a_previous_log() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("log.txt");
        std::fs::write(&path, "stale output from an earlier run\n").unwrap();
        let mut sink = LogSink::create(&path, None).await.unwrap();
        sink.write(Output::Stdout(Bytes::from_static(b"fresh\n")))
            .await
            .unwrap();
        sink.flush().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }
}
