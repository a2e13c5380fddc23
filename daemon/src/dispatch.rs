//! Controller dispatcher.
//!
//! Each compiled [`ControllerOutput`] becomes one JSON state request to its
//! controller. Requests for the controllers of one batch run concurrently and
//! each one has its own timeout, so a dead controller only costs its own
//! timeout window. Failures are logged with the controller id and never
//! affect siblings. There is no retry; the next trigger is the retry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::compiler::{ControllerOutput, LightState};
use crate::model::{Config, Controller};

/// Request body for `POST /json/state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateBody {
    pub on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    /// Transition in protocol units of 100 ms.
    pub transition: u16,
    pub seg: Vec<SegmentBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentBody {
    pub id: u16,
    pub on: bool,
    pub bri: u8,
    /// Primary colour only.
    pub col: [[u8; 3]; 1],
}

impl From<&LightState> for SegmentBody {
    fn from(state: &LightState) -> Self {
        Self {
            id: state.segment,
            on: state.on,
            bri: state.brightness,
            col: [state.color.to_array()],
        }
    }
}

impl StateBody {
    pub fn new(states: &[LightState], master_brightness: Option<u8>, transition_ms: u32) -> Self {
        Self {
            on: states.iter().any(|s| s.on),
            bri: master_brightness,
            transition: transition_units(transition_ms),
            seg: states.iter().map(SegmentBody::from).collect(),
        }
    }
}

/// Converts milliseconds into 100 ms protocol units, rounding to nearest.
pub fn transition_units(ms: u32) -> u16 {
    let units = (u64::from(ms) + 50) / 100;
    u16::try_from(units).unwrap_or(u16::MAX)
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("controller '{0}' is not configured")]
    UnknownController(String),
    #[error("request failed: {0}")]
    Http(String),
    #[error("controller answered with status {0}")]
    Status(u16),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

/// Sends one state request to one controller.
pub trait LightTransport: Send + Sync {
    fn send_state(
        &self,
        controller: &Controller,
        body: &StateBody,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

/// WLED JSON API over HTTP.
#[derive(Clone)]
pub struct WledTransport {
    http: reqwest::Client,
}

impl WledTransport {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Http(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { http })
    }

    pub fn state_url(controller: &Controller) -> String {
        format!("http://{}:{}/json/state", controller.host, controller.port)
    }
}

impl LightTransport for WledTransport {
    async fn send_state(&self, controller: &Controller, body: &StateBody) -> Result<(), DispatchError> {
        let response = self
            .http
            .post(Self::state_url(controller))
            .json(body)
            .send()
            .await
            .map_err(|e| DispatchError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Outcome of one controller's request within a batch.
#[derive(Debug)]
pub struct DispatchReport {
    pub controller: String,
    pub result: Result<(), DispatchError>,
}

pub struct Dispatcher<T> {
    config: Arc<Config>,
    transport: T,
    timeout: Duration,
}

impl<T: LightTransport> Dispatcher<T> {
    pub fn new(config: Arc<Config>, transport: T) -> Self {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        Self { config, transport, timeout }
    }

    /// Sends `states` to a single controller.
    pub async fn dispatch(
        &self,
        controller_id: &str,
        states: &[LightState],
        master_brightness: Option<u8>,
        transition_ms: u32,
    ) -> Result<(), DispatchError> {
        let controller = self
            .config
            .controller(controller_id)
            .ok_or_else(|| DispatchError::UnknownController(controller_id.to_string()))?;
        let body = StateBody::new(states, master_brightness, transition_ms);

        match tokio::time::timeout(self.timeout, self.transport.send_state(controller, &body)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.timeout)),
        }
    }

    /// Sends every output of a compiled batch, one request per controller, concurrently.
    pub async fn dispatch_batch(&self, outputs: &[ControllerOutput]) -> Vec<DispatchReport> {
        let requests = outputs.iter().map(|output| async move {
            let result = self
                .dispatch(
                    &output.controller,
                    &output.states,
                    output.master_brightness,
                    output.transition_ms,
                )
                .await;
            let name = self
                .config
                .controller(&output.controller)
                .map_or(output.controller.as_str(), Controller::display_name);
            match &result {
                Ok(()) => debug!(controller = %output.controller, name, segments = output.states.len(), "State delivered"),
                Err(e) => warn!(controller = %output.controller, name, "Dispatch failed: {e}"),
            }
            DispatchReport { controller: output.controller.clone(), result }
        });
        join_all(requests).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compiler::tests::sample_config;
    use crate::model::Rgb;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    /// Records every request; controllers listed in `failing` answer with an error
    /// and controllers in `hanging` never answer.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub sent: Arc<Mutex<Vec<(String, StateBody)>>>,
        pub failing: Vec<String>,
        pub hanging: Vec<String>,
    }

    impl MockTransport {
        pub(crate) fn sent(&self) -> Vec<(String, StateBody)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl LightTransport for MockTransport {
        async fn send_state(&self, controller: &Controller, body: &StateBody) -> Result<(), DispatchError> {
            if self.hanging.contains(&controller.id) {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(&controller.id) {
                return Err(DispatchError::Http("connection refused".into()));
            }
            self.sent.lock().unwrap().push((controller.id.clone(), body.clone()));
            Ok(())
        }
    }

    fn output(controller: &str) -> ControllerOutput {
        ControllerOutput {
            controller: controller.into(),
            states: vec![LightState::new(0, Rgb::new(1, 2, 3), 9)],
            master_brightness: None,
            transition_ms: 700,
        }
    }

    // ── wire format ───────────────────────────────────────────────────────────

    #[test]
    fn transition_is_rounded_to_100ms_units() {
        assert_eq!(transition_units(0), 0);
        assert_eq!(transition_units(700), 7);
        assert_eq!(transition_units(749), 7);
        assert_eq!(transition_units(750), 8);
        assert_eq!(transition_units(u32::MAX), u16::MAX);
    }

    #[test]
    fn state_body_serializes_wled_shape() {
        let states = [
            LightState::new(0, Rgb::new(0, 255, 0), 200),
            LightState::new(1, Rgb::BLACK, 0),
        ];
        let json = serde_json::to_value(StateBody::new(&states, None, 300)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "on": true,
                "transition": 3,
                "seg": [
                    { "id": 0, "on": true, "bri": 200, "col": [[0, 255, 0]] },
                    { "id": 1, "on": false, "bri": 0, "col": [[0, 0, 0]] }
                ]
            })
        );
    }

    #[test]
    fn master_brightness_is_serialized_when_set() {
        let states = [LightState::new(0, Rgb::new(255, 0, 0), 0)];
        let json = serde_json::to_value(StateBody::new(&states, Some(0), 0)).unwrap();
        assert_eq!(json["bri"], 0);
        assert_eq!(json["on"], false);
    }

    // ── failure isolation ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn one_failing_controller_does_not_block_siblings() {
        let transport = MockTransport { failing: vec!["C1".into()], ..Default::default() };
        let dispatcher = Dispatcher::new(Arc::new(sample_config()), transport.clone());

        let reports = dispatcher.dispatch_batch(&[output("C1"), output("C2")]).await;

        assert!(reports[0].result.is_err());
        assert!(reports[1].result.is_ok());
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "C2");
    }

    #[tokio::test]
    async fn hanging_controller_times_out_alone() {
        let mut config = sample_config();
        config.request_timeout_ms = 50;
        let transport = MockTransport { hanging: vec!["C1".into()], ..Default::default() };
        let dispatcher = Dispatcher::new(Arc::new(config), transport.clone());

        let reports = dispatcher.dispatch_batch(&[output("C1"), output("C2")]).await;

        assert!(matches!(reports[0].result, Err(DispatchError::Timeout(_))));
        assert!(reports[1].result.is_ok());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn unknown_controller_is_reported() {
        let dispatcher = Dispatcher::new(Arc::new(sample_config()), MockTransport::default());
        let err = dispatcher.dispatch("nope", &[], None, 0).await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownController(_)));
    }

    // ── real HTTP transport ───────────────────────────────────────────────────

    type Received = Arc<Mutex<Vec<serde_json::Value>>>;

    async fn spawn_controller(status: StatusCode) -> (u16, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/json/state",
                post(
                    |State((seen, status)): State<(Received, StatusCode)>,
                     Json(body): Json<serde_json::Value>| async move {
                        seen.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state((received.clone(), status));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (port, received)
    }

    fn local_controller(id: &str, port: u16) -> Controller {
        Controller {
            id: id.into(),
            name: None,
            host: "127.0.0.1".into(),
            port,
            segments: vec![crate::model::Segment { id: 0, label: None }],
        }
    }

    #[tokio::test]
    async fn wled_transport_posts_json_state() {
        let (port, received) = spawn_controller(StatusCode::OK).await;
        let transport = WledTransport::new(Duration::from_secs(2)).unwrap();
        let body = StateBody::new(&[LightState::new(0, Rgb::new(0, 255, 0), 200)], None, 700);

        transport.send_state(&local_controller("C1", port), &body).await.unwrap();

        let seen = received.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["transition"], 7);
        assert_eq!(seen[0]["seg"][0]["col"][0][1], 255);
    }

    #[tokio::test]
    async fn wled_transport_reports_error_status() {
        let (port, _) = spawn_controller(StatusCode::INTERNAL_SERVER_ERROR).await;
        let transport = WledTransport::new(Duration::from_secs(2)).unwrap();
        let body = StateBody::new(&[], None, 0);

        let err = transport.send_state(&local_controller("C1", port), &body).await.unwrap_err();
        assert!(matches!(err, DispatchError::Status(500)));
    }

    #[tokio::test]
    async fn unreachable_controller_does_not_block_reachable_one() {
        let (port, received) = spawn_controller(StatusCode::OK).await;
        // Bind then drop to get a port nobody listens on.
        let dead_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let config = Config {
            controllers: vec![local_controller("dead", dead_port), local_controller("live", port)],
            ..Config::default()
        };
        let dispatcher = Dispatcher::new(
            Arc::new(config),
            WledTransport::new(Duration::from_secs(2)).unwrap(),
        );

        let reports = dispatcher.dispatch_batch(&[output("dead"), output("live")]).await;

        assert!(reports[0].result.is_err());
        assert!(reports[1].result.is_ok());
        assert_eq!(received.lock().unwrap().len(), 1);
    }
}
