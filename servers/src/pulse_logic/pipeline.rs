//! # Pipeline Task
//!
//! Owns the stream client, the running stats and the activity notifier, and
//! drives all three from a single `select!` loop:
//! stream events, activity login completion, settings changes, shutdown.
//! Activity I/O runs on the notifier's channel task and is never awaited here.

use crate::pulse_logic::state::Control;
use lib_pulse::activity::{ActivityNotifier, ChannelFactory, NotifyOutcome};
use lib_pulse::configs::{SettingsChange, SettingsProvider};
use lib_pulse::core::{DeliveryReport, Dispatcher, Sample, SampleUpdate, StatsAggregator, StatusSnapshot};
use lib_pulse::ingestors::{Connector, StreamClient, StreamEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

/// How long shutdown waits for the activity channel to clear and close.
pub const ACTIVITY_CLOSE_GRACE: Duration = Duration::from_secs(2);

pub struct Pipeline<C: Connector, F: ChannelFactory> {
    client: StreamClient<C>,
    notifier: ActivityNotifier<F>,
    stats: StatsAggregator,
    settings: Arc<dyn SettingsProvider>,
    dispatcher: Arc<Dispatcher>,
    status_tx: watch::Sender<StatusSnapshot>,
}

impl<C: Connector, F: ChannelFactory> Pipeline<C, F> {
    pub fn new(
        client: StreamClient<C>,
        notifier: ActivityNotifier<F>,
        settings: Arc<dyn SettingsProvider>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot::default());
        let pipeline = Self {
            client,
            notifier,
            stats: StatsAggregator::new(),
            settings,
            dispatcher,
            status_tx,
        };
        pipeline.status_tx.send_replace(pipeline.snapshot());
        pipeline
    }

    /// Latest status, for readers outside the pipeline task.
    pub fn status_receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    pub async fn run(
        mut self,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        self.client.start();
        self.notifier.ensure();
        self.publish_status();

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Pipeline received shutdown signal.");
                    break;
                }
                event = self.client.next_event() => match event {
                    StreamEvent::Sample(sample) => self.on_sample(sample),
                    StreamEvent::Status(state) => {
                        log::info!("Stream connection is now {:?}.", state);
                        self.publish_status();
                    }
                },
                state = self.notifier.login_complete() => {
                    log::info!("Activity channel is now {:?}.", state);
                    self.publish_status();
                }
                Some(control) = control_rx.recv() => match control {
                    Control::SettingsChanged(change) => self.on_settings_changed(change),
                },
            }
        }

        self.client.stop();
        if self.notifier.teardown()
            && tokio::time::timeout(ACTIVITY_CLOSE_GRACE, self.notifier.closed()).await.is_err()
        {
            log::warn!("Activity channel did not close within {:?}.", ACTIVITY_CLOSE_GRACE);
        }
        self.publish_status();
        log::info!("Pipeline stopped.");
    }

    fn snapshot(&self) -> StatusSnapshot {
        let settings = self.settings.snapshot();
        StatusSnapshot::new(
            settings.streaming_enabled,
            settings.activity_enabled,
            self.client.state(),
            self.notifier.state(),
            self.stats.stats().clone(),
        )
    }

    fn publish_status(&self) {
        let snapshot = self.snapshot();
        self.status_tx.send_replace(snapshot.clone());
        let report = self.dispatcher.broadcast_status(snapshot);
        log_report("status", report);
    }

    fn on_sample(&mut self, sample: Sample) {
        let stats = self.stats.update(sample.value).clone();
        let report = self.dispatcher.broadcast_sample(SampleUpdate::new(&sample, &stats));
        log_report("sample", report);
        self.status_tx.send_replace(self.snapshot());

        match self.notifier.notify(&sample) {
            NotifyOutcome::Queued => log::debug!("Activity update queued: {} bpm.", sample.value),
            NotifyOutcome::Lost => {
                log::info!("Activity channel lost; logging in again.");
                self.notifier.ensure();
                self.publish_status();
            }
            NotifyOutcome::Throttled | NotifyOutcome::NotReady => {}
        }
    }

    fn on_settings_changed(&mut self, change: SettingsChange) {
        if change.streaming {
            log::info!("Streaming settings changed; restarting stream client.");
            self.client.stop();
            self.client.start();
        }
        if change.activity {
            log::info!("Activity settings changed; re-initializing activity channel.");
            self.notifier.teardown();
            self.notifier.ensure();
        }
        self.publish_status();
    }
}

fn log_report(kind: &str, report: DeliveryReport) {
    if report.failed > 0 || report.pruned > 0 {
        log::debug!(
            "Broadcast {}: {} delivered, {} failed, {} pruned.",
            kind,
            report.delivered,
            report.failed,
            report.pruned
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use lib_pulse::activity::{ActivityChannel, ActivityError};
    use lib_pulse::configs::{Settings, SettingsPatch, SettingsStore};
    use futures_util::StreamExt;
    use futures_util::future::BoxFuture;
    use lib_pulse::core::{ActivityState, ConnectionState, HubMessage};
    use lib_pulse::ingestors::connector::ConnectFuture;
    use lib_pulse::ingestors::{Frame, StreamConfig, WsConnector};
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite::Message;

    /// A platform without any presence transport.
    struct NoActivity;

    struct NeverChannel;

    impl ActivityChannel for NeverChannel {
        fn open<'a>(&'a mut self, _: &'a str) -> futures_util::future::BoxFuture<'a, Result<(), ActivityError>> {
            Box::pin(async { Err(ActivityError::NotOpen) })
        }
        fn set_state<'a>(&'a mut self, _: &'a str, _: &'a str) -> futures_util::future::BoxFuture<'a, Result<(), ActivityError>> {
            Box::pin(async { Err(ActivityError::NotOpen) })
        }
        fn clear(&mut self) -> futures_util::future::BoxFuture<'_, Result<(), ActivityError>> {
            Box::pin(async { Ok(()) })
        }
        fn close(&mut self) -> futures_util::future::BoxFuture<'_, Result<(), ActivityError>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl ChannelFactory for NoActivity {
        type Channel = NeverChannel;

        fn create(&self) -> Result<NeverChannel, ActivityError> {
            Err(ActivityError::Unavailable("test platform".into()))
        }
    }

    /// Logs in fine, then never answers an activity update.
    struct WedgedActivity;

    struct WedgedChannel;

    impl ActivityChannel for WedgedChannel {
        fn open<'a>(&'a mut self, _: &'a str) -> BoxFuture<'a, Result<(), ActivityError>> {
            Box::pin(async { Ok(()) })
        }
        fn set_state<'a>(&'a mut self, _: &'a str, state: &'a str) -> BoxFuture<'a, Result<(), ActivityError>> {
            let wedged = state.ends_with("bpm");
            Box::pin(async move {
                if wedged {
                    std::future::pending::<()>().await;
                }
                Ok(())
            })
        }
        fn clear(&mut self) -> BoxFuture<'_, Result<(), ActivityError>> {
            Box::pin(async { Ok(()) })
        }
        fn close(&mut self) -> BoxFuture<'_, Result<(), ActivityError>> {
            Box::pin(async { Ok(()) })
        }
    }

    impl ChannelFactory for WedgedActivity {
        type Channel = WedgedChannel;

        fn create(&self) -> Result<WedgedChannel, ActivityError> {
            Ok(WedgedChannel)
        }
    }

    /// Accepts one connection after a short delay and delivers a burst of
    /// frames on it at once; the connection then stays open and quiet.
    struct BurstConnector {
        burst: Mutex<Option<Vec<Frame>>>,
    }

    impl Connector for BurstConnector {
        fn connect(&self, _url: &str) -> ConnectFuture {
            let burst = self.burst.lock().unwrap().take();
            Box::pin(async move {
                let Some(frames) = burst else {
                    return std::future::pending().await;
                };
                tokio::time::sleep(Duration::from_millis(100)).await;
                let frames = futures_util::stream::iter(frames.into_iter().map(Ok))
                    .chain(futures_util::stream::pending());
                Ok(frames.boxed())
            })
        }
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<Arc<HubMessage>>) -> Arc<HubMessage> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a broadcast")
            .expect("dispatcher dropped the client")
    }

    #[tokio::test]
    async fn relays_samples_with_stats_and_status() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            ws.send(Message::Text("72".into())).await.unwrap();
            ws.send(Message::Text("garbage".into())).await.unwrap();
            ws.send(Message::Text(r#"{"data":{"heart_rate":88}}"#.into())).await.unwrap();
            let _ = release_rx.await;
        });

        let settings = Arc::new(SettingsStore::new(Settings {
            access_token: "tok".into(),
            endpoint_template: format!("ws://{}/?access_token={{token}}", addr),
            ..Settings::default()
        }));
        let dispatcher = Arc::new(Dispatcher::new());
        let (_id, mut rx) = dispatcher.add_client("test");

        let client = StreamClient::new(WsConnector, settings.clone(), StreamConfig::default());
        let notifier = ActivityNotifier::new(NoActivity, settings.clone());
        let pipeline = Pipeline::new(client, notifier, settings.clone(), dispatcher.clone());
        let status_rx = pipeline.status_receiver();

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let task = tokio::spawn(pipeline.run(control_rx, shutdown_tx.subscribe()));

        let mut samples = Vec::new();
        let mut saw_connected = false;
        while samples.len() < 2 {
            match next_message(&mut rx).await.as_ref() {
                HubMessage::Sample(update) => samples.push(update.clone()),
                HubMessage::Status(status) => saw_connected |= status.connected,
            }
        }

        assert!(saw_connected);
        assert_eq!(samples[0].hr, 72);
        assert_eq!(samples[1].hr, 88);
        assert_eq!(samples[1].stats.count, 2);
        assert_eq!(samples[1].stats.min, Some(72));
        assert_eq!(samples[1].stats.max, Some(88));
        assert_eq!(samples[1].stats.average, Some(80.0));
        assert_eq!(status_rx.borrow().stats.last, Some(88));

        // Turning streaming off stops the client and announces it.
        settings.apply(SettingsPatch { streaming_enabled: Some(false), ..SettingsPatch::default() });
        control_tx
            .send(Control::SettingsChanged(SettingsChange { streaming: true, activity: false }))
            .unwrap();
        loop {
            if let HubMessage::Status(status) = next_message(&mut rx).await.as_ref() {
                if !status.streaming_enabled {
                    assert_eq!(status.connection, ConnectionState::Disconnected);
                    break;
                }
            }
        }

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        let _ = release_tx.send(());
    }

    #[tokio::test(start_paused = true)]
    async fn wedged_activity_channel_does_not_delay_samples() {
        let settings = Arc::new(SettingsStore::new(Settings {
            access_token: "tok".into(),
            activity_enabled: true,
            ..Settings::default()
        }));
        let dispatcher = Arc::new(Dispatcher::new());
        let (_id, mut rx) = dispatcher.add_client("test");

        let connector = BurstConnector {
            burst: Mutex::new(Some((60..70).map(|v| Frame::Text(v.to_string())).collect())),
        };
        let client = StreamClient::new(connector, settings.clone(), StreamConfig::default());
        let notifier = ActivityNotifier::new(WedgedActivity, settings.clone());
        let pipeline = Pipeline::new(client, notifier, settings.clone(), dispatcher.clone());
        let status_rx = pipeline.status_receiver();

        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let started = Instant::now();
        let task = tokio::spawn(pipeline.run(control_rx, shutdown_tx.subscribe()));

        let mut values = Vec::new();
        while values.len() < 10 {
            if let HubMessage::Sample(update) = next_message(&mut rx).await.as_ref() {
                values.push(update.hr);
            }
        }
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(1), "samples took {:?}", elapsed);
        assert_eq!(values, (60..70).collect::<Vec<u32>>());
        assert_eq!(status_rx.borrow().activity, ActivityState::Ready);
        assert_eq!(status_rx.borrow().stats.count, 10);

        let stopping = Instant::now();
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        assert!(stopping.elapsed() <= ACTIVITY_CLOSE_GRACE);
    }
}
