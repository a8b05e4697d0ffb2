use std::{fmt::Display, io::Write, sync::Arc, time::Duration};

use colored::Colorize;
use tokio::{sync::mpsc, task::JoinHandle};

/// Default refresh rate of the progress line.
pub const PROGRESS_REFRESH_MILLIS: u64 = 50;

pub fn header(message: &str) {
    println!("{}", format!("===== {} =====", message).bright_green());
}

pub fn field(label: &str, value: impl Display) {
    println!("{} {}", format!("{}:", label).bright_white(), value.to_string().bright_yellow());
}

pub fn note(message: &str) {
    println!("{}", format!("[#] {}", message).bright_cyan());
}

pub fn warning(message: &str) {
    println!("{}", format!("[#] {}", message).bright_yellow());
}

pub fn danger(message: &str) {
    println!("{}", format!("[#] {}", message).bright_red());
}

#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("Display channel closed")]
    ChannelClosed,

    #[error("Display task failed, {0}")]
    TaskJoinFailure(#[from] tokio::task::JoinError),

    #[error("Failed to write display output, {0}")]
    Output(#[from] std::io::Error),
}

impl<T> From<mpsc::error::SendError<T>> for DisplayError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        DisplayError::ChannelClosed
    }
}

pub trait DisplayCounters: Send + Sync + 'static {
    fn current(&self) -> usize;
    fn total(&self) -> Option<usize>;
}

pub enum DisplayMessage<R, C> {
    Result(R),
    Progress {
        counters: Arc<C>,
        current: usize,
        total: Option<usize>,
    },
    Exit,
}

/// Renders a message for the given verbosity, `None` hides it.
pub type DisplayMessageProcessor<R, C> = fn(DisplayMessage<R, C>, u8) -> Option<String>;

/// Prints results and a live progress line from a dedicated task.
pub struct DisplayManager<R, C> {
    tx: Option<mpsc::Sender<DisplayMessage<R, C>>>,
    counters: Arc<C>,
    display_message_processor: DisplayMessageProcessor<R, C>,
    display_message_consumer: Option<JoinHandle<std::io::Result<()>>>,
    progress_message_producer: Option<JoinHandle<()>>,
    progress_refresh_millis: Option<u64>,
    pub disabled: bool,
    pub verbosity: u8,
    pub buffer_size: usize,
}

impl<R, C> DisplayManager<R, C>
where
    R: Send + 'static,
    C: DisplayCounters,
{
    pub fn new(counters: Arc<C>, message_processor: DisplayMessageProcessor<R, C>) -> Self {
        Self {
            tx: None,
            counters,
            display_message_processor: message_processor,
            display_message_consumer: None,
            progress_message_producer: None,
            progress_refresh_millis: None,
            disabled: false,
            verbosity: 0,
            buffer_size: 1024,
        }
    }

    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Enables the progress line, `None` leaves it off.
    pub fn with_progress(mut self, refresh_millis: Option<u64>) -> Self {
        self.progress_refresh_millis = refresh_millis;
        self
    }

    pub fn start(&mut self) {
        if self.disabled {
            return;
        }

        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.display_message_consumer = Some(tokio::spawn(display_message_consumer(
            rx,
            self.display_message_processor,
            self.verbosity,
        )));

        if let Some(refresh_millis) = self.progress_refresh_millis {
            self.progress_message_producer = Some(tokio::spawn(progress_message_producer(
                tx.clone(),
                self.counters.clone(),
                refresh_millis,
            )));
        }

        self.tx = Some(tx);
    }

    pub async fn report_result(&self, result: R) -> Result<(), DisplayError> {
        if let Some(tx) = &self.tx {
            tx.send(DisplayMessage::Result(result)).await?;
        }

        Ok(())
    }

    /// Prints the final progress line and waits for everything queued to be shown.
    pub async fn stop(&mut self) -> Result<(), DisplayError> {
        if let Some(handle) = self.progress_message_producer.take() {
            handle.abort();
        }

        if let Some(tx) = self.tx.take() {
            if self.progress_refresh_millis.is_some() {
                tx.send(DisplayMessage::Progress {
                    counters: self.counters.clone(),
                    current: self.counters.current(),
                    total: self.counters.total(),
                })
                .await?;
            }
            tx.send(DisplayMessage::Exit).await?;
        }

        if let Some(handle) = self.display_message_consumer.take() {
            handle.await??;
        }

        Ok(())
    }
}

async fn display_message_consumer<R, C>(
    mut rx: mpsc::Receiver<DisplayMessage<R, C>>,
    message_processor: DisplayMessageProcessor<R, C>,
    verbosity: u8,
) -> std::io::Result<()> {
    let mut progress_line: Option<String> = None;

    while let Some(message) = rx.recv().await {
        if matches!(message, DisplayMessage::Exit) {
            break;
        }

        let is_progress = matches!(message, DisplayMessage::Progress { .. });
        let Some(rendered) = message_processor(message, verbosity) else {
            continue;
        };

        if progress_line.is_some() {
            print!("\r\x1B[K");
        }

        if is_progress {
            print!("{}", rendered);
            progress_line = Some(rendered);
        } else {
            println!("{}", rendered);
            if let Some(line) = &progress_line {
                print!("{}", line);
            }
        }

        std::io::stdout().flush()?;
    }

    if progress_line.is_some() {
        println!();
    }

    Ok(())
}

async fn progress_message_producer<R, C: DisplayCounters>(
    tx: mpsc::Sender<DisplayMessage<R, C>>,
    counters: Arc<C>,
    refresh_millis: u64,
) {
    let mut last_progress = None;
    let mut interval = tokio::time::interval(Duration::from_millis(refresh_millis));

    loop {
        interval.tick().await;

        let current = counters.current();
        if last_progress != Some(current) {
            last_progress = Some(current);
            let message = DisplayMessage::Progress {
                counters: counters.clone(),
                current,
                total: counters.total(),
            };
            if tx.send(message).await.is_err() {
                break;
            }
        }
    }
}
