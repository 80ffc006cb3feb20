//! Producer/consumer pair sharing one backpressure controller.

use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolflow_config::schema::StreamSettings;
use toolflow_config::{ConfigError, ConfigResult};

use crate::backpressure::{BackpressureController, BackpressureState};
use crate::event::{StreamEvent, StreamEventKind};
use crate::{StreamError, StreamResult};

/// Creates a connected producer and consumer.
///
/// The underlying queue is unbounded; the [`BackpressureController`] is what
/// bounds it to `high_water_mark` items. Cancelling `cancel` (or calling
/// [`StreamConsumer::cancel`]) stops both sides promptly.
#[must_use]
pub fn event_channel(
    high_water_mark: NonZeroUsize,
    cancel: CancellationToken,
) -> (StreamProducer, StreamConsumer) {
    let (sender, receiver) = mpsc::unbounded_channel();
    let controller = Arc::new(BackpressureController::new(high_water_mark));
    (
        StreamProducer {
            sender,
            controller: Arc::clone(&controller),
            cancel: cancel.clone(),
        },
        StreamConsumer {
            receiver,
            controller,
            cancel,
        },
    )
}

/// Creates a channel pausing at the configured `stream.high_water_mark`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the high-water mark is zero.
pub fn event_channel_from_settings(
    settings: &StreamSettings,
    cancel: CancellationToken,
) -> ConfigResult<(StreamProducer, StreamConsumer)> {
    let high_water_mark =
        NonZeroUsize::new(settings.high_water_mark).ok_or(ConfigError::Invalid {
            field: "stream.high_water_mark",
            reason: "must be greater than zero",
        })?;
    Ok(event_channel(high_water_mark, cancel))
}

/// Sending half of an event channel.
#[derive(Debug, Clone)]
pub struct StreamProducer {
    sender: mpsc::UnboundedSender<StreamEvent>,
    controller: Arc<BackpressureController>,
    cancel: CancellationToken,
}

impl StreamProducer {
    /// Stamps and sends `kind`, waiting while the consumer is behind.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Cancelled`] once the stream is cancelled and
    /// [`StreamError::Closed`] if the consumer has been dropped.
    pub async fn emit(&self, kind: StreamEventKind) -> StreamResult<()> {
        self.send(StreamEvent::now(kind)).await
    }

    /// Sends an already stamped event.
    ///
    /// # Errors
    ///
    /// See [`emit`](Self::emit).
    pub async fn send(&self, event: StreamEvent) -> StreamResult<()> {
        if self.sender.is_closed() {
            return Err(StreamError::Closed);
        }
        // A paused producer must also wake when the consumer is dropped.
        tokio::select! {
            biased;
            admitted = self.controller.acquire_or_cancel(&self.cancel) => admitted?,
            () = self.sender.closed() => return Err(StreamError::Closed),
        }
        if self.sender.send(event).is_err() {
            // Nobody will ever consume the admitted slot.
            self.controller.release();
            return Err(StreamError::Closed);
        }
        Ok(())
    }

    /// Returns true once the stream has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the cancellation token shared with the consumer.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the current backpressure counters.
    #[must_use]
    pub fn backpressure(&self) -> BackpressureState {
        self.controller.state()
    }
}

/// Receiving half of an event channel.
#[derive(Debug)]
pub struct StreamConsumer {
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
    controller: Arc<BackpressureController>,
    cancel: CancellationToken,
}

impl StreamConsumer {
    /// Returns the next event, or `None` once every producer is gone or the
    /// stream was cancelled.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let event = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            event = self.receiver.recv() => event,
        }?;
        self.controller.release();
        Some(event)
    }

    /// Cancels the stream, unblocking any paused producer.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.receiver.close();
    }

    /// Returns true once the stream has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns the current backpressure counters.
    #[must_use]
    pub fn backpressure(&self) -> BackpressureState {
        self.controller.state()
    }

    /// Adapts the consumer into a [`Stream`].
    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        futures::stream::unfold(self, |mut consumer| async move {
            let event = consumer.next().await?;
            Some((event, consumer))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    fn content(n: usize) -> StreamEventKind {
        StreamEventKind::Content {
            delta: n.to_string(),
        }
    }

    #[tokio::test]
    async fn slow_consumer_sees_every_event_in_order() {
        let (producer, consumer) = event_channel(NonZeroUsize::new(4).unwrap(), CancellationToken::new());

        let task = tokio::spawn(async move {
            for n in 0..50 {
                producer.emit(content(n)).await.unwrap();
                assert!(producer.backpressure().buffered <= 4);
            }
            producer.backpressure()
        });

        let mut received = Vec::new();
        let mut stream = Box::pin(consumer.into_stream());
        while received.len() < 50 {
            let event = stream.next().await.unwrap();
            if received.len() % 10 == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            received.push(event);
        }

        let state = task.await.unwrap();
        assert!(state.pause_count > 0);
        let deltas: Vec<String> = received
            .into_iter()
            .map(|event| match event.into_kind() {
                StreamEventKind::Content { delta } => delta,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|n: usize| n.to_string()).collect();
        assert_eq!(deltas, expected);
    }

    #[tokio::test]
    async fn consumer_cancel_stops_a_paused_producer() {
        let (producer, mut consumer) =
            event_channel(NonZeroUsize::new(1).unwrap(), CancellationToken::new());
        producer.emit(content(0)).await.unwrap();

        let blocked = {
            let producer = producer.clone();
            tokio::spawn(async move { producer.emit(content(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        consumer.cancel();

        assert!(matches!(blocked.await.unwrap(), Err(StreamError::Cancelled)));
        assert!(consumer.next().await.is_none());
        assert!(producer.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_the_consumer_unblocks_a_paused_producer() {
        let (producer, consumer) = event_channel(NonZeroUsize::new(1).unwrap(), CancellationToken::new());
        producer.emit(content(0)).await.unwrap();

        let blocked = {
            let producer = producer.clone();
            tokio::spawn(async move { producer.emit(content(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());
        drop(consumer);

        let result = tokio::time::timeout(Duration::from_millis(500), blocked)
            .await
            .expect("paused producer should stop once the consumer is gone")
            .unwrap();
        assert!(matches!(result, Err(StreamError::Closed)));
        assert_eq!(producer.backpressure().produced, 1);
    }

    #[tokio::test]
    async fn settings_drive_the_high_water_mark() {
        let settings = StreamSettings {
            high_water_mark: 3,
            ..StreamSettings::default()
        };
        let (producer, _consumer) = event_channel_from_settings(&settings, CancellationToken::new()).unwrap();
        assert_eq!(producer.backpressure().high_water_mark, 3);

        let invalid = StreamSettings {
            high_water_mark: 0,
            ..StreamSettings::default()
        };
        assert!(matches!(
            event_channel_from_settings(&invalid, CancellationToken::new()),
            Err(ConfigError::Invalid { field: "stream.high_water_mark", .. })
        ));
    }

    #[tokio::test]
    async fn dropped_consumer_closes_the_producer() {
        let (producer, consumer) = event_channel(NonZeroUsize::new(8).unwrap(), CancellationToken::new());
        drop(consumer);
        assert!(matches!(producer.emit(content(0)).await, Err(StreamError::Closed)));
    }
}
