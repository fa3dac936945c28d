//! Tensorboard logging of training statistics.

use crate::{common::*, utils::RateCounter};

/// A message to the logging worker.
#[derive(Debug, Clone)]
pub struct LoggingMessage {
    pub tag: String,
    pub kind: LoggingMessageKind,
}

#[derive(Debug, Clone)]
pub enum LoggingMessageKind {
    Scalar { step: usize, value: f32 },
    /// One scalar per class, written to `<tag>/<class name>`.
    ClassScalars {
        step: usize,
        values: Vec<(String, f32)>,
    },
}

impl LoggingMessage {
    pub fn new_scalar(tag: impl Into<String>, step: usize, value: impl Into<f64>) -> Self {
        Self {
            tag: tag.into(),
            kind: LoggingMessageKind::Scalar {
                step,
                value: value.into() as f32,
            },
        }
    }

    pub fn new_class_scalars<I, S>(tag: impl Into<String>, step: usize, values: I) -> Self
    where
        I: IntoIterator<Item = (S, R64)>,
        S: Into<String>,
    {
        Self {
            tag: tag.into(),
            kind: LoggingMessageKind::ClassScalars {
                step,
                values: values
                    .into_iter()
                    .map(|(name, value)| (name.into(), value.raw() as f32))
                    .collect(),
            },
        }
    }

    /// The event file key of each scalar in this message.
    pub fn scalars(&self) -> Vec<(String, i64, f32)> {
        match &self.kind {
            LoggingMessageKind::Scalar { step, value } => {
                vec![(self.tag.clone(), *step as i64, *value)]
            }
            LoggingMessageKind::ClassScalars { step, values } => values
                .iter()
                .map(|(name, value)| (format!("{}/{}", self.tag, name), *step as i64, *value))
                .collect(),
        }
    }
}

/// Creates the event directory and returns the worker writing received messages.
///
/// The worker stops when every sender is dropped.
pub async fn logging_worker(
    logging_dir: Arc<Path>,
    mut rx: broadcast::Receiver<LoggingMessage>,
) -> Result<impl Future<Output = Result<()>> + Send> {
    let event_dir = logging_dir.join("events");
    let event_path_prefix = event_dir
        .join("bit-dl")
        .into_os_string()
        .into_string()
        .map_err(|path| format_err!("non-unicode event path {:?}", path))?;

    tokio::fs::create_dir_all(&event_dir).await?;

    let future = async move {
        let mut event_writer = EventWriterInit::default()
            .from_prefix_async(event_path_prefix, None)
            .await?;
        let mut rate_counter = RateCounter::per_second();

        loop {
            let msg = match rx.recv().await {
                Ok(msg) => msg,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("logging worker lagged, {} messages skipped", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            for (tag, step, value) in msg.scalars() {
                event_writer.write_scalar_async(tag, step, value).await?;
            }

            rate_counter.add(1.0);
            if let Some(rate) = rate_counter.rate() {
                debug!("processed {:.2} logging events/s", rate);
            }
        }

        info!("logging worker finished");
        Fallible::Ok(())
    };

    Ok(future)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_scalar_keys() {
        let msg = LoggingMessage::new_class_scalars(
            "test/ap",
            7,
            vec![("cat", r64(0.5)), ("dog", r64(0.25))],
        );
        assert_eq!(
            msg.scalars(),
            vec![
                ("test/ap/cat".to_owned(), 7, 0.5),
                ("test/ap/dog".to_owned(), 7, 0.25)
            ]
        );

        let msg = LoggingMessage::new_scalar("train/loss", 3, 1.5f32);
        assert_eq!(msg.scalars(), vec![("train/loss".to_owned(), 3, 1.5)]);
    }

    #[tokio::test]
    async fn worker_stops_when_senders_drop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let logging_dir: Arc<Path> = dir.path().into();
        let (tx, rx) = broadcast::channel(4);

        let worker = logging_worker(logging_dir, rx).await?;
        let handle = tokio::spawn(worker);
        tx.send(LoggingMessage::new_scalar("train/lr", 0, 0.1))
            .map_err(|_| format_err!("logging worker is gone"))?;
        drop(tx);
        handle.await??;

        let num_files = std::fs::read_dir(dir.path().join("events"))?.count();
        assert_eq!(num_files, 1);
        Ok(())
    }

    #[tokio::test]
    async fn worker_survives_lagging() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let logging_dir: Arc<Path> = dir.path().into();
        let (tx, rx) = broadcast::channel(2);

        // overflow the channel before the worker starts receiving
        for step in 0..5 {
            tx.send(LoggingMessage::new_scalar("train/loss", step, 1.0))
                .map_err(|_| format_err!("logging worker is gone"))?;
        }
        drop(tx);

        let worker = logging_worker(logging_dir, rx).await?;
        worker.await?;
        Ok(())
    }
}
