use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

pub(crate) const LOG_CHANNEL_CAPACITY: usize = 500;

/// `MakeWriter` that copies every formatted line onto a broadcast channel
/// (for `GET /api/logs`) and, unless suppressed, to stdout.
#[derive(Clone)]
pub(crate) struct LogBroadcastWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for LogBroadcastWriter {
    type Writer = LogLineWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogLineWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub(crate) struct LogLineWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for LogLineWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let line = String::from_utf8_lossy(buf).trim_end().to_string();
        if !line.is_empty() {
            let _ = self.sender.send(line); // no subscribers is fine
        }
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber and hand back the log channel. A second
/// call keeps the first subscriber.
pub(crate) fn init(level: Level, suppress_stdout: bool) -> broadcast::Sender<String> {
    let (log_tx, _) = broadcast::channel::<String>(LOG_CHANNEL_CAPACITY);
    let writer = LogBroadcastWriter {
        sender: log_tx.clone(),
        suppress_stdout,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_ansi(!suppress_stdout)
        .with_writer(writer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_tx
}
