use log::{debug, info, warn};
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::chart::buffer::AggregationBuffer;
use crate::chart::timeline::ChartTimeline;
use crate::config::types::{ChartConfig, Config, TimingConfig};
use crate::device::connection::{ConnectionState, ConnectionStateMachine, MachineOutput};
use crate::device::transport::Transport;
use crate::device::types::{DeviceHandle, TransportEvent};
use crate::error::{ConnectionError, SampleError};
use crate::session::scheduler::{Scheduler, TimerKind};
use crate::session::types::SessionEvent;
use crate::telemetry::decoder::{decode, RawSample};
use crate::telemetry::metrics::{CumulativeAverage, MetricDeriver};

/// Hour of day (local time if known, UTC otherwise) used as the origin of the chart axis.
pub fn session_start_hour() -> f64 {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    f64::from(now.hour())
}

/// All state of one detail session. Only the session task mutates it, one message at a time.
pub struct Session<T: Transport> {
    machine: ConnectionStateMachine<T>,
    scheduler: Scheduler,
    deriver: MetricDeriver,
    cumulative: CumulativeAverage,
    buffer: AggregationBuffer,
    timeline: ChartTimeline,
    latest_sample: Option<RawSample>,
    first_point_flushed: bool,
    timing: TimingConfig,
    chart: ChartConfig,
    started_at: Instant,
    finished: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, scheduler: Scheduler, config: &Config, start_hour: f64, started_at: Instant) -> Self {
        Session {
            machine: ConnectionStateMachine::new(transport),
            scheduler,
            deriver: MetricDeriver::new(config.calibration),
            cumulative: CumulativeAverage::new(),
            buffer: AggregationBuffer::new(config.timing.window()),
            timeline: ChartTimeline::new(start_hour),
            latest_sample: None,
            first_point_flushed: false,
            timing: config.timing,
            chart: config.chart,
            started_at,
            finished: false,
        }
    }

    pub fn buffer(&self) -> &AggregationBuffer {
        &self.buffer
    }

    pub fn timeline(&self) -> &ChartTimeline {
        &self.timeline
    }

    pub fn cumulative(&self) -> &CumulativeAverage {
        &self.cumulative
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn connect(&mut self, device: DeviceHandle) -> Result<Vec<SessionEvent>, ConnectionError> {
        if let Err(err) = self.machine.connect(device) {
            warn!("Could not start connecting: {}", err);
            self.scheduler.cancel_all();
            self.finished = true;
            return Err(err);
        }

        self.scheduler.start(TimerKind::Elapsed, self.timing.elapsed_tick());
        Ok(vec![SessionEvent::MetricsReset, SessionEvent::ElapsedHours(0.0)])
    }

    pub fn handle_transport(&mut self, event: TransportEvent) -> Vec<SessionEvent> {
        if self.finished {
            debug!("Ignoring transport event after teardown");
            return vec![];
        }

        match self.machine.handle_event(event) {
            MachineOutput::Nothing => vec![],
            MachineOutput::Ready => {
                self.scheduler.start(TimerKind::Processing, self.timing.processing_tick());
                vec![SessionEvent::Ready]
            },
            MachineOutput::Notification(payload) => self.process_notification(&payload),
            MachineOutput::Failed(err) => self.end(Some(err)),
        }
    }

    pub fn handle_tick(&mut self, kind: TimerKind, now: Instant) -> Vec<SessionEvent> {
        if self.finished {
            debug!("Ignoring {:?} tick after teardown", kind);
            return vec![];
        }

        match kind {
            TimerKind::Elapsed => vec![SessionEvent::ElapsedHours(self.elapsed_hours(now))],
            TimerKind::Processing => self.republish_latest(),
            TimerKind::WindowFlush => self.flush_window(),
        }
    }

    /// Stop the timers and release the device. Calling it again does nothing.
    pub fn teardown(&mut self) -> Vec<SessionEvent> {
        if self.finished {
            return vec![];
        }
        self.end(None)
    }

    fn end(&mut self, reason: Option<ConnectionError>) -> Vec<SessionEvent> {
        self.scheduler.cancel_all();
        self.machine.teardown();
        self.finished = true;

        let mut events = Vec::new();
        if let Some(err) = &reason {
            events.push(SessionEvent::Notice(format!("Connection ended: {}", err)));
        }
        info!("Session ended after {} chart points", self.timeline.len());
        events.push(SessionEvent::Ended(reason));
        events
    }

    fn elapsed_hours(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.started_at).as_secs_f64() / 3600.0
    }

    fn process_notification(&mut self, payload: &[u8]) -> Vec<SessionEvent> {
        let sample = decode(payload);

        let metrics = match self.deriver.derive(&sample) {
            Ok(metrics) => metrics,
            Err(SampleError::Empty) => {
                warn!("{}; resetting display", SampleError::Empty);
                self.latest_sample = None;
                self.cumulative.reset();
                return vec![SessionEvent::MetricsReset];
            },
            Err(err) => {
                warn!("{}; skipping", err);
                return vec![];
            },
        };

        let mut events = vec![
            SessionEvent::Metrics(metrics),
            SessionEvent::CumulativeOutput(self.cumulative.add(metrics.current)),
        ];

        self.buffer.push(metrics.current);
        self.latest_sample = Some(sample);

        // the chart should not stay empty for a whole window
        if !self.first_point_flushed {
            self.first_point_flushed = true;
            events.extend(self.flush_window());
            self.scheduler.start(TimerKind::WindowFlush, self.timing.window());
        }

        events
    }

    fn republish_latest(&mut self) -> Vec<SessionEvent> {
        if !self.machine.is_ready() {
            return vec![];
        }

        match &self.latest_sample {
            Some(sample) => match self.deriver.derive(sample) {
                Ok(metrics) => vec![SessionEvent::Metrics(metrics)],
                Err(err) => {
                    debug!("Cached sample can not be derived: {}", err);
                    vec![]
                },
            },
            None => vec![],
        }
    }

    fn flush_window(&mut self) -> Vec<SessionEvent> {
        match self.timeline.flush_from(&mut self.buffer) {
            Some(point) => {
                info!("Chart point at +{}h: {:.2}", point.hour_offset, point.value);
                vec![SessionEvent::Chart(self.timeline.feed(&self.chart))]
            },
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc::{channel, Receiver};
    use tokio::time::Duration;
    use uuid::Uuid;

    use crate::device::constants::EVENT_CHANNEL_CAPACITY;
    use crate::device::transport::mock::{MockTransport, TransportCall};
    use crate::device::types::{CharacteristicInfo, LinkState};

    const START_HOUR: f64 = 9.0;

    fn notification(payload: &str) -> TransportEvent {
        TransportEvent::Notification { characteristic: Uuid::from_u128(10), value: payload.as_bytes().to_vec() }
    }

    fn new_session(transport: MockTransport) -> (Session<MockTransport>, Receiver<TimerKind>) {
        let (tx, rx) = channel(EVENT_CHANNEL_CAPACITY);
        let session = Session::new(transport, Scheduler::new(tx), &Config::default(), START_HOUR, Instant::now());
        (session, rx)
    }

    fn ready_session() -> (Session<MockTransport>, MockTransport, Receiver<TimerKind>) {
        let transport = MockTransport::new();
        let (mut session, rx) = new_session(transport.clone());

        let events = session.connect(DeviceHandle::new("inverter", "AA:BB:CC:DD:EE:FF")).expect("connect");
        assert_eq!(events, vec![SessionEvent::MetricsReset, SessionEvent::ElapsedHours(0.0)]);

        session.handle_transport(TransportEvent::LinkChanged(LinkState::Connected));
        session.handle_transport(TransportEvent::ServicesDiscovered(Ok(vec![CharacteristicInfo {
            service: Uuid::from_u128(1),
            uuid: Uuid::from_u128(10),
            notify: true,
            has_cccd: true,
        }])));
        let events = session.handle_transport(TransportEvent::DescriptorWritten { characteristic: Uuid::from_u128(10), result: Ok(()) });
        assert_eq!(events, vec![SessionEvent::Ready]);

        (session, transport, rx)
    }

    fn chart_events(events: &[SessionEvent]) -> usize {
        events.iter().filter(|event| matches!(event, SessionEvent::Chart(_))).count()
    }

    #[tokio::test]
    async fn test_first_sample_flushes_once() {
        let (mut session, _, _rx) = ready_session();
        let now = Instant::now();

        let events = session.handle_transport(notification("200,0,1500,10"));
        assert_eq!(chart_events(&events), 1);
        assert_eq!(session.timeline().len(), 1);
        assert_eq!(session.timeline().points()[0].value, 10.0);
        assert!(session.buffer().is_empty());

        let events = session.handle_transport(notification("200,0,1500,20"));
        assert_eq!(chart_events(&events), 0);
        let events = session.handle_transport(notification("200,0,1500,40"));
        assert_eq!(chart_events(&events), 0);
        assert_eq!(session.timeline().len(), 1);
        assert_eq!(session.buffer().samples(), &[20.0, 40.0]);

        let events = session.handle_tick(TimerKind::WindowFlush, now);
        let feed = match events.as_slice() {
            [SessionEvent::Chart(feed)] => feed.clone(),
            other => panic!("unexpected events {:?}", other),
        };
        assert_eq!(feed.line, vec![(START_HOUR, 10.0), (START_HOUR + 1.0, 30.0)]);
        assert_eq!(feed.scroll_to, Some(START_HOUR + 1.0));
    }

    #[tokio::test]
    async fn test_empty_window_tick_adds_nothing() {
        let (mut session, _, _rx) = ready_session();
        let now = Instant::now();

        session.handle_transport(notification("200,0,1500,10"));
        assert!(session.handle_tick(TimerKind::WindowFlush, now).is_empty());
        assert_eq!(session.timeline().len(), 1);
        assert_eq!(session.timeline().current_x(), 1.0);
    }

    #[tokio::test]
    async fn test_notification_publishes_metrics() {
        let (mut session, _, _rx) = ready_session();

        let events = session.handle_transport(notification("230.0, 0, 3200, 11"));
        let metrics = match &events[0] {
            SessionEvent::Metrics(metrics) => *metrics,
            other => panic!("unexpected event {:?}", other),
        };
        assert_eq!(metrics.voltage, 220.0);
        assert_eq!(metrics.voltage_percent, 100.0);
        assert_eq!(metrics.power_percent, 100.0);
        assert_eq!(metrics.efficiency_percent, 5.0);
        assert_eq!(events[1], SessionEvent::CumulativeOutput(11.0));
    }

    #[tokio::test]
    async fn test_empty_payload_resets_display_only() {
        let (mut session, _, _rx) = ready_session();
        let now = Instant::now();

        session.handle_transport(notification("200,0,1500,10"));
        session.handle_transport(notification("200,0,1500,20"));

        let events = session.handle_transport(notification(" , abc"));
        assert_eq!(events, vec![SessionEvent::MetricsReset]);
        assert_eq!(session.buffer().samples(), &[20.0]);
        assert_eq!(session.timeline().len(), 1);
        assert_eq!(session.cumulative().count(), 0);

        // nothing stale is re-published
        assert!(session.handle_tick(TimerKind::Processing, now).is_empty());
    }

    #[tokio::test]
    async fn test_incomplete_payload_is_skipped() {
        let (mut session, _, _rx) = ready_session();

        let events = session.handle_transport(notification("200,0,1500"));
        assert!(events.is_empty());
        assert!(session.buffer().is_empty());
        assert!(session.timeline().is_empty());
    }

    #[tokio::test]
    async fn test_processing_tick_republishes_latest() {
        let (mut session, _, _rx) = ready_session();
        let now = Instant::now();

        assert!(session.handle_tick(TimerKind::Processing, now).is_empty());

        let events = session.handle_transport(notification("100,0,1550,5"));
        let published = events[0].clone();

        assert_eq!(session.handle_tick(TimerKind::Processing, now), vec![published]);
        assert_eq!(session.cumulative().count(), 1);
        assert_eq!(session.buffer().len(), 0);
    }

    #[tokio::test]
    async fn test_elapsed_tick() {
        let (mut session, _, _rx) = ready_session();
        let later = Instant::now() + Duration::from_secs(90 * 60);

        match session.handle_tick(TimerKind::Elapsed, later).as_slice() {
            [SessionEvent::ElapsedHours(hours)] => assert!((hours - 1.5).abs() < 0.01),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_teardown_twice_and_late_ticks() {
        let (mut session, transport, _rx) = ready_session();
        let now = Instant::now();

        session.handle_transport(notification("200,0,1500,10"));
        session.handle_transport(notification("200,0,1500,30"));

        assert_eq!(session.teardown(), vec![SessionEvent::Ended(None)]);
        assert!(session.teardown().is_empty());
        assert_eq!(session.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.count(&TransportCall::Release), 1);

        assert!(session.handle_tick(TimerKind::WindowFlush, now).is_empty());
        assert!(session.handle_tick(TimerKind::Elapsed, now).is_empty());
        assert!(session.handle_transport(notification("200,0,1500,50")).is_empty());
        assert_eq!(session.buffer().samples(), &[30.0]);
        assert_eq!(session.timeline().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_ends_session() {
        let transport = MockTransport::new();
        let (mut session, _rx) = new_session(transport.clone());

        session.connect(DeviceHandle::new("inverter", "AA:BB:CC:DD:EE:FF")).expect("connect");
        session.handle_transport(TransportEvent::LinkChanged(LinkState::Connected));
        let events = session.handle_transport(TransportEvent::ServicesDiscovered(Err("gatt error".to_string())));

        assert_eq!(events, vec![
            SessionEvent::Notice("Connection ended: Service discovery failed".to_string()),
            SessionEvent::Ended(Some(ConnectionError::DiscoveryFailed)),
        ]);
        assert!(session.is_finished());
        assert!(session.teardown().is_empty());
        assert_eq!(transport.count(&TransportCall::Release), 1);
    }

    #[tokio::test]
    async fn test_device_not_found_notice() {
        let transport = MockTransport::new();
        let (mut session, _rx) = new_session(transport.clone());

        session.connect(DeviceHandle::new("inverter", "AA:BB:CC:DD:EE:FF")).expect("connect");
        let events = session.handle_transport(TransportEvent::ConnectFailed("Bluetooth operation took too long".to_string()));

        assert_eq!(events, vec![
            SessionEvent::Notice("Connection ended: Could not connect to the device".to_string()),
            SessionEvent::Ended(Some(ConnectionError::ConnectFailed)),
        ]);
        assert_eq!(transport.count(&TransportCall::Release), 1);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let (mut session, _rx) = new_session(MockTransport::failing(ConnectionError::PermissionDenied));

        let result = session.connect(DeviceHandle::new("inverter", "AA:BB:CC:DD:EE:FF"));
        assert_eq!(result, Err(ConnectionError::PermissionDenied));
        assert!(session.is_finished());
    }
}
