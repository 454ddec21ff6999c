use futures::channel::mpsc::{Receiver, Sender};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::spawn;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::device::transport::Transport;
use crate::device::types::{DeviceHandle, TransportEvent};
use crate::error::ConnectionError;
use crate::session::core::Session;
use crate::session::scheduler::TimerKind;
use crate::session::types::SessionEvent;

async fn publish(senders: &mut Vec<Sender<SessionEvent>>, events: Vec<SessionEvent>) {
    for event in events {
        for sender in senders.iter_mut() {
            if let Err(err) = sender.send(event.clone()).await {
                debug!("Dropping SessionEvent for closed subscriber: {}", err);
            }
        }
    }
}

/// Owner side of a running session task.
pub struct SessionHandle {
    cancel: CancellationToken,
    stopped: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Tear the session down and wait until its task has stopped. No transport or timer message
    /// reaches the session after this returns. Calling it again does nothing.
    pub async fn teardown(&mut self) {
        self.cancel.cancel();

        if let Some(handle) = self.handle.take() {
            info!("Waiting for session task to stop");
            if let Err(err) = handle.await {
                error!("Session task failed: {}", err);
            }
            info!("Session task stopped");
        }
    }

    /// Resolves once the session has ended, for whatever reason.
    pub async fn stopped(&self) {
        self.stopped.cancelled().await
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }
}

/// Connect `session` to `device` and run it on its own task.
///
/// Transport events and timer ticks are handled strictly one at a time, and every resulting
/// [`SessionEvent`] is sent to all `senders`.
pub fn start_session<T: Transport + Send + 'static>(
    mut session: Session<T>,
    device: DeviceHandle,
    mut transport_events: Receiver<TransportEvent>,
    mut ticks: Receiver<TimerKind>,
    mut senders: Vec<Sender<SessionEvent>>,
) -> Result<SessionHandle, ConnectionError> {
    let initial_events = session.connect(device)?;
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    let stopped = CancellationToken::new();
    let task_stopped = stopped.clone();

    let handle = spawn(async move {
        publish(&mut senders, initial_events).await;

        'mainloop: loop {
            let events = tokio::select! {
                biased;

                _ = task_cancel.cancelled() => {
                    session.teardown()
                },
                Some(event) = transport_events.next() => {
                    session.handle_transport(event)
                },
                Some(kind) = ticks.next() => {
                    session.handle_tick(kind, Instant::now())
                },
                else => {
                    debug!("All session channels closed");
                    session.teardown()
                },
            };

            publish(&mut senders, events).await;

            if session.is_finished() {
                break 'mainloop;
            }
        }

        task_stopped.cancel();
    });

    Ok(SessionHandle { cancel, stopped, handle: Some(handle) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::channel;
    use uuid::Uuid;

    use crate::config::types::Config;
    use crate::device::constants::EVENT_CHANNEL_CAPACITY;
    use crate::device::transport::mock::{MockTransport, TransportCall};
    use crate::device::types::{CharacteristicInfo, LinkState};
    use crate::session::scheduler::Scheduler;

    struct Harness {
        handle: SessionHandle,
        transport: MockTransport,
        transport_tx: Sender<TransportEvent>,
        events: Receiver<SessionEvent>,
    }

    fn start(transport: MockTransport) -> Result<Harness, ConnectionError> {
        let (transport_tx, transport_rx) = channel(EVENT_CHANNEL_CAPACITY);
        let (tick_tx, tick_rx) = channel(EVENT_CHANNEL_CAPACITY);
        let (event_tx, events) = channel(EVENT_CHANNEL_CAPACITY);

        let session = Session::new(transport.clone(), Scheduler::new(tick_tx), &Config::default(), 12.0, Instant::now());
        let handle = start_session(
            session,
            DeviceHandle::new("inverter", "AA:BB:CC:DD:EE:FF"),
            transport_rx,
            tick_rx,
            vec![event_tx],
        )?;

        Ok(Harness { handle, transport, transport_tx, events })
    }

    // elapsed ticks arrive every second of (paused) time, skip them
    async fn next_event(events: &mut Receiver<SessionEvent>) -> Option<SessionEvent> {
        loop {
            match events.next().await {
                Some(SessionEvent::ElapsedHours(_)) => continue,
                other => return other,
            }
        }
    }

    async fn make_ready(harness: &mut Harness) {
        let characteristic = CharacteristicInfo { service: Uuid::from_u128(1), uuid: Uuid::from_u128(10), notify: true, has_cccd: true };

        harness.transport_tx.send(TransportEvent::LinkChanged(LinkState::Connected)).await.unwrap();
        harness.transport_tx.send(TransportEvent::ServicesDiscovered(Ok(vec![characteristic]))).await.unwrap();
        harness.transport_tx.send(TransportEvent::DescriptorWritten { characteristic: Uuid::from_u128(10), result: Ok(()) }).await.unwrap();

        assert_eq!(next_event(&mut harness.events).await, Some(SessionEvent::MetricsReset));
        assert_eq!(next_event(&mut harness.events).await, Some(SessionEvent::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn test_notification_reaches_chart() {
        let mut harness = start(MockTransport::new()).expect("start");
        make_ready(&mut harness).await;

        harness.transport_tx.send(TransportEvent::Notification {
            characteristic: Uuid::from_u128(10),
            value: b"215.5, 0, 1200, 8".to_vec(),
        }).await.unwrap();

        assert!(matches!(next_event(&mut harness.events).await, Some(SessionEvent::Metrics(_))));
        assert_eq!(next_event(&mut harness.events).await, Some(SessionEvent::CumulativeOutput(8.0)));
        match next_event(&mut harness.events).await {
            Some(SessionEvent::Chart(feed)) => assert_eq!(feed.line, vec![(12.0, 8.0)]),
            other => panic!("unexpected event {:?}", other),
        }

        // the processing ticker re-publishes the cached sample
        assert!(matches!(next_event(&mut harness.events).await, Some(SessionEvent::Metrics(_))));

        harness.handle.teardown().await;
        assert_eq!(next_event(&mut harness.events).await, Some(SessionEvent::Ended(None)));
        assert_eq!(next_event(&mut harness.events).await, None);
        assert_eq!(harness.transport.count(&TransportCall::Release), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_is_idempotent() {
        let mut harness = start(MockTransport::new()).expect("start");
        make_ready(&mut harness).await;

        harness.handle.teardown().await;
        harness.handle.teardown().await;
        assert!(harness.handle.is_finished());
        assert_eq!(harness.transport.count(&TransportCall::Release), 1);

        // the task is gone, late transport callbacks can not be delivered
        assert!(harness.transport_tx.send(TransportEvent::LinkChanged(LinkState::Disconnected)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_ends_task() {
        let mut harness = start(MockTransport::new()).expect("start");
        make_ready(&mut harness).await;

        harness.transport_tx.send(TransportEvent::LinkChanged(LinkState::Disconnected)).await.unwrap();
        harness.handle.stopped().await;

        assert!(matches!(next_event(&mut harness.events).await, Some(SessionEvent::Notice(_))));
        assert_eq!(next_event(&mut harness.events).await, Some(SessionEvent::Ended(Some(ConnectionError::LinkLost))));
        assert_eq!(next_event(&mut harness.events).await, None);

        harness.handle.teardown().await;
        assert_eq!(harness.transport.count(&TransportCall::Release), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_without_adapter() {
        let result = start(MockTransport::failing(ConnectionError::NoAdapter));
        assert!(matches!(result, Err(ConnectionError::NoAdapter)));
    }
}
