//! # Operator Console
//!
//! JSON Lines on stdin, one command per line, one JSON reply per line on
//! stdout:
//!
//! ```text
//! {"command":"generate_schedule","tle":"ISS\n1 25544U ...\n2 25544 ...","hours":12}
//! {"command":"list_passes"}
//! {"command":"start_scheduled","pass_id":1}
//! {"command":"start_sun","azimuth_deg_s":0.5,"elevation_deg_s":0.5}
//! {"command":"emergency_stop"}
//! ```
//!
//! Schedule generation is CPU heavy and runs on the blocking pool; the
//! finished passes are handed to the orchestrator in one request.

use chrono::{Duration, Utc};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::MAX_HORIZON_HOURS;
use crate::ephemeris::Window;
use crate::error::Result;
use crate::geometry::AzEl;
use crate::icd::protocol::{AxisMask, BandMask, ManualMove};
use crate::tracking::{EngineHandle, EngineReply, EngineRequest, ScheduleBuilder, SunSpeeds};

/// One operator command line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OperatorCommand {
    StartScheduled {
        pass_id: u32,
    },
    StopScheduled,
    StartSun {
        #[serde(default = "default_sun_speed")]
        azimuth_deg_s: f32,
        #[serde(default = "default_sun_speed")]
        elevation_deg_s: f32,
    },
    StopSun,
    EmergencyStop {
        #[serde(default = "default_engage")]
        engage: bool,
    },
    ManualMove(ManualMove),
    PositionOffset {
        axes: AxisMask,
        #[serde(default)]
        azimuth: f32,
        #[serde(default)]
        elevation: f32,
        #[serde(default)]
        train: f32,
    },
    TimeOffset {
        seconds: f32,
    },
    Feed {
        bands: BandMask,
        on: bool,
    },
    GenerateSchedule {
        tle: String,
        hours: Option<f64>,
    },
    AddGeostationary {
        name: String,
        azimuth_deg: f64,
        elevation_deg: f64,
        hours: Option<f64>,
    },
    ListPasses,
    ClearPasses,
    Status,
}

fn default_sun_speed() -> f32 {
    SunSpeeds::default().azimuth_deg_s
}

fn default_engage() -> bool {
    true
}

/// Executes operator commands against a running orchestrator
#[derive(Debug, Clone)]
pub struct OperatorConsole {
    engine: EngineHandle,
    builder: ScheduleBuilder,
    horizon_hours: f64,
}

impl OperatorConsole {
    /// # Arguments
    ///
    /// * `engine` - Handle to the running orchestrator
    /// * `builder` - Turns TLEs into pass tables
    /// * `horizon_hours` - Prediction window when a command gives none
    #[must_use]
    pub fn new(engine: EngineHandle, builder: ScheduleBuilder, horizon_hours: f64) -> Self {
        Self {
            engine,
            builder,
            horizon_hours,
        }
    }

    /// Run one command to completion
    pub async fn execute(&self, command: OperatorCommand) -> EngineReply {
        let request = match command {
            OperatorCommand::StartScheduled { pass_id } => EngineRequest::StartScheduled { pass_id },
            OperatorCommand::StopScheduled => EngineRequest::StopScheduled,
            OperatorCommand::StartSun {
                azimuth_deg_s,
                elevation_deg_s,
            } => EngineRequest::StartSun {
                speeds: SunSpeeds {
                    azimuth_deg_s,
                    elevation_deg_s,
                },
            },
            OperatorCommand::StopSun => EngineRequest::StopSun,
            OperatorCommand::EmergencyStop { engage } => EngineRequest::EmergencyStop { engage },
            OperatorCommand::ManualMove(motion) => EngineRequest::ManualMove(motion),
            OperatorCommand::PositionOffset {
                axes,
                azimuth,
                elevation,
                train,
            } => EngineRequest::PositionOffset {
                axes,
                azimuth,
                elevation,
                train,
            },
            OperatorCommand::TimeOffset { seconds } => EngineRequest::TimeOffset { seconds },
            OperatorCommand::Feed { bands, on } => EngineRequest::Feed { bands, on },
            OperatorCommand::GenerateSchedule { tle, hours } => {
                match self.generate(tle, hours.unwrap_or(self.horizon_hours)).await {
                    Ok(request) => request,
                    Err(message) => return EngineReply::Error { message },
                }
            }
            OperatorCommand::AddGeostationary {
                name,
                azimuth_deg,
                elevation_deg,
                hours,
            } => {
                let window = match self.window(hours.unwrap_or(self.horizon_hours)) {
                    Ok(window) => window,
                    Err(message) => return EngineReply::Error { message },
                };
                let pass = self.builder.geostationary(
                    &name,
                    AzEl::new(azimuth_deg, elevation_deg),
                    window,
                );
                EngineRequest::AddPasses(vec![pass])
            }
            OperatorCommand::ListPasses => EngineRequest::ListPasses,
            OperatorCommand::ClearPasses => EngineRequest::ClearPasses,
            OperatorCommand::Status => EngineRequest::Status,
        };

        self.engine.request(request).await
    }

    /// Prediction window of `hours` from now; `hours` is operator input
    fn window(&self, hours: f64) -> std::result::Result<Window, String> {
        if !(hours > 0.0 && hours <= MAX_HORIZON_HOURS) {
            return Err(format!(
                "hours must be in (0, {}], got {}",
                MAX_HORIZON_HOURS, hours
            ));
        }

        let start = Utc::now();
        let end = start
            .checked_add_signed(Duration::milliseconds((hours * 3_600_000.0) as i64))
            .ok_or_else(|| format!("window of {} h is out of range", hours))?;
        Window::new(start, end).map_err(|e| e.to_string())
    }

    async fn generate(&self, tle: String, hours: f64) -> std::result::Result<EngineRequest, String> {
        let window = self.window(hours)?;
        let builder = self.builder.clone();
        info!("Generating schedule for the next {:.1} h", hours);

        let passes = tokio::task::spawn_blocking(move || builder.build(&tle, window))
            .await
            .map_err(|e| format!("schedule task failed: {}", e))?
            .map_err(|e| e.to_string())?;

        Ok(EngineRequest::AddPasses(passes))
    }

    /// Parse and execute one input line
    pub async fn handle_line(&self, line: &str) -> EngineReply {
        match serde_json::from_str::<OperatorCommand>(line) {
            Ok(command) => {
                debug!("Operator command: {:?}", command);
                self.execute(command).await
            }
            Err(e) => {
                warn!("Unparseable operator command: {}", e);
                EngineReply::Error {
                    message: format!("invalid command: {}", e),
                }
            }
        }
    }
}

/// Serve commands from `input` until it ends or shutdown is signalled.
///
/// # Errors
///
/// Returns error if reading input or writing a reply fails
pub async fn run_console<R, W>(
    console: OperatorConsole,
    input: R,
    mut output: W,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Operator input closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let reply = console.handle_line(line).await;
                let mut json = serde_json::to_string(&reply)?;
                json.push('\n');
                output.write_all(json.as_bytes()).await?;
                output.flush().await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::{GroundStation, NoaaSun};
    use crate::geometry::TiltTrainTransform;
    use crate::icd::protocol::AxisMotion;
    use crate::link::sender::mocks::RecordingSink;
    use crate::link::CommandSink;
    use crate::telemetry::TelemetryStore;
    use crate::tracking::pass::tests::{builder, synthetic_pass, TLE_TEXT};
    use crate::tracking::{run_orchestrator, Orchestrator, SunStrategy, TrackingSettings};
    use std::sync::Arc;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_start_sun_defaults() {
        let cmd: OperatorCommand = serde_json::from_str(r#"{"command":"start_sun"}"#).unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::StartSun {
                azimuth_deg_s: 1.0,
                elevation_deg_s: 1.0
            }
        );
    }

    #[test]
    fn test_parse_manual_move() {
        let cmd: OperatorCommand = serde_json::from_str(
            r#"{"command":"manual_move","axes":3,
                "azimuth":{"angle":10.0,"speed":2.0},
                "elevation":{"angle":45.0,"speed":1.0},
                "train":{"angle":0.0,"speed":0.0}}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::ManualMove(ManualMove {
                axes: AxisMask::AZ_EL,
                azimuth: AxisMotion::new(10.0, 2.0),
                elevation: AxisMotion::new(45.0, 1.0),
                train: AxisMotion::default(),
            })
        );
    }

    #[test]
    fn test_parse_emergency_stop_engages_by_default() {
        let cmd: OperatorCommand =
            serde_json::from_str(r#"{"command":"emergency_stop"}"#).unwrap();
        assert_eq!(cmd, OperatorCommand::EmergencyStop { engage: true });

        let cmd: OperatorCommand =
            serde_json::from_str(r#"{"command":"emergency_stop","engage":false}"#).unwrap();
        assert_eq!(cmd, OperatorCommand::EmergencyStop { engage: false });
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        assert!(serde_json::from_str::<OperatorCommand>(r#"{"command":"fly"}"#).is_err());
        assert!(serde_json::from_str::<OperatorCommand>(r#"{"pass_id":1}"#).is_err());
    }

    #[tokio::test]
    async fn test_out_of_range_hours_are_rejected() {
        let (handle, _requests_rx) = EngineHandle::channel(1);
        let start = Utc::now() + Duration::hours(1);
        let console = OperatorConsole::new(
            handle,
            builder(vec![synthetic_pass(start, 100.0, 300)]),
            24.0,
        );

        for hours in ["1e12", "-1", "0", "169"] {
            let line = format!(
                r#"{{"command":"add_geostationary","name":"GEO","azimuth_deg":180.0,"elevation_deg":30.0,"hours":{}}}"#,
                hours
            );
            match console.handle_line(&line).await {
                EngineReply::Error { message } => assert!(message.starts_with("hours must be")),
                other => panic!("hours {} accepted: {:?}", hours, other),
            }
        }

        let generate = serde_json::json!({
            "command": "generate_schedule",
            "tle": TLE_TEXT,
            "hours": 1e12
        });
        assert!(matches!(
            console.handle_line(&generate.to_string()).await,
            EngineReply::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_console_session() {
        let store = TelemetryStore::new(chrono::Duration::seconds(5));
        let sink = Arc::new(RecordingSink::new());
        let sun = SunStrategy::new(
            Arc::new(NoaaSun),
            Arc::new(TiltTrainTransform),
            GroundStation::default(),
        );
        let engine = Orchestrator::new(
            TrackingSettings::default(),
            sun,
            Arc::clone(&sink) as Arc<dyn CommandSink>,
            store.reader(),
        );
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, requests_rx) = EngineHandle::channel(8);
        let (status_tx, _status_rx) = watch::channel(engine.status(Utc::now()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let engine_task = tokio::spawn(run_orchestrator(
            engine,
            tokio::time::Duration::from_millis(50),
            events_rx,
            requests_rx,
            status_tx,
            shutdown_rx.clone(),
        ));

        let start = Utc::now() + Duration::hours(1);
        let console = OperatorConsole::new(
            handle,
            builder(vec![synthetic_pass(start, 100.0, 300)]),
            24.0,
        );

        let generate = serde_json::json!({ "command": "generate_schedule", "tle": TLE_TEXT });
        let input = format!(
            "{}\n\n{}\nnot json\n{}\n",
            generate,
            r#"{"command":"list_passes"}"#,
            r#"{"command":"feed","bands":7,"on":true}"#
        );
        let mut output = Vec::new();
        run_console(
            console,
            BufReader::new(input.as_bytes()),
            &mut output,
            shutdown_rx,
        )
        .await
        .unwrap();

        let replies: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0]["reply"], "passes_added");
        assert_eq!(replies[0]["ids"], serde_json::json!([1]));
        assert_eq!(replies[1]["reply"], "passes");
        assert_eq!(replies[1]["passes"][0]["satellite"], "TESTSAT");
        assert_eq!(replies[2]["reply"], "error");
        assert_eq!(replies[3]["reply"], "ok");
        assert!(sink.commands().contains(&crate::icd::Command::Feed {
            bands: BandMask::ALL,
            on: true
        }));

        shutdown_tx.send(true).unwrap();
        engine_task.await.unwrap();
    }
}
