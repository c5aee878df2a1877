//! Synchronous entry point for the operator.
//!
//! The hub answers `DO <operation> <args>` and `GET <attribute>` requests on
//! a REP socket and expands each operation into named broadcasts. Devices can
//! route through it as well by publishing `hub <operation> <args>` on the bus.

use crate::bus_log::{BusLog, LOGGER};
use crate::dispatch_pending;
use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use shared::reactor::{CancelHandle, Reactor, Wake};
use shared::rpc::{ArgKind, Args, DispatchTable, ProtocolError};
use shared::zmq::{Publisher, Server, Subscriber};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const COMPLETED: &str = "request completed.";
pub const TOO_SHORT: &str = "Command should at least have 2 parts.";
pub const BAD_VERB: &str = "Commands should start with 'DO' or 'GET'.";

/// LEDs that gate the behavior camera and are not recorded per writer.
const BEHAVIOR_LED: &str = "b";

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Device names and stage axis directions the hub routes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub x_dir: i32,
    pub y_dir: i32,
    pub z_dir: i32,
    pub writers: Vec<String>,
    pub cameras: Vec<String>,
    /// The first tracker is the one operator tracking commands go to; all of
    /// them receive `shutdown`.
    pub trackers: Vec<String>,
    /// Devices that only relay commands (input controllers and the like).
    pub relays: Vec<String>,
    pub stage: String,
    pub logger: String,
    pub shutdown_pause_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            x_dir: 1,
            y_dir: 1,
            z_dir: 1,
            writers: names(&["writer_behavior", "writer_gcamp"]),
            cameras: names(&["camera_behavior", "camera_gcamp"]),
            trackers: names(&["tracker_behavior", "tracker_gcamp"]),
            relays: names(&["commands"]),
            stage: "stage".to_string(),
            logger: LOGGER.to_string(),
            shutdown_pause_ms: 500,
        }
    }
}

impl HubConfig {
    /// Load from JSON. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, DeviceError> {
        if !path.exists() {
            info!("{} not found, using default hub config", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: HubConfig = serde_json::from_str(&text)
            .map_err(|e| DeviceError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DeviceError> {
        for (axis, dir) in [("x", self.x_dir), ("y", self.y_dir), ("z", self.z_dir)] {
            if dir != 1 && dir != -1 {
                return Err(DeviceError::Config(format!(
                    "{}_dir must be 1 or -1, got {}",
                    axis, dir
                )));
            }
        }
        Ok(())
    }
}

/// Hub state and the broadcast expansion of every operation.
pub struct HubCore {
    name: String,
    config: HubConfig,
    publisher: Arc<Publisher>,
    log: BusLog,
    cancel: Option<CancelHandle>,
    running: bool,
    statuses: BTreeMap<String, String>,
}

impl HubCore {
    pub fn new(name: impl Into<String>, config: HubConfig, publisher: Arc<Publisher>) -> Self {
        let name = name.into();
        Self {
            log: BusLog::new(name.clone(), publisher.clone()),
            name,
            config,
            publisher,
            cancel: None,
            running: true,
            statuses: BTreeMap::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Last status each device reported.
    pub fn statuses(&self) -> &BTreeMap<String, String> {
        &self.statuses
    }

    fn send(&self, message: String) {
        debug!("hub -> {}", message);
        self.publisher.send(message);
    }

    fn send_all(&self, devices: &[String], body: &str) {
        for device in devices {
            self.send(format!("{} {}", device, body));
        }
    }

    /// Cameras an operation addresses: every camera for an empty selector,
    /// else the one named `selector` or ending in `_<selector>`.
    fn cameras(&self, selector: &str) -> Result<Vec<String>, ProtocolError> {
        if selector.is_empty() {
            return Ok(self.config.cameras.clone());
        }
        let suffix = format!("_{}", selector);
        self.config
            .cameras
            .iter()
            .find(|c| *c == selector || c.ends_with(&suffix))
            .map(|c| vec![c.clone()])
            .ok_or_else(|| ProtocolError::Handler(format!("unknown camera '{}'", selector)))
    }

    fn primary_tracker(&self, body: &str) {
        match self.config.trackers.first() {
            Some(tracker) => self.send(format!("{} {}", tracker, body)),
            None => warn!("no tracker configured, dropping '{}'", body),
        }
    }

    fn pause(&self) {
        if self.config.shutdown_pause_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.shutdown_pause_ms));
        }
    }

    /// Ordered shutdown: writers, cameras, trackers, relays, then after a
    /// pause for the serial line to flush, the stage and the logger.
    pub fn shutdown(&mut self) {
        info!("shutting down all devices");
        self.log.send("shutdown");
        self.send_all(&self.config.writers, "shutdown");
        self.send_all(&self.config.cameras, "shutdown");
        self.send_all(&self.config.trackers, "shutdown");
        self.send_all(&self.config.relays, "shutdown");
        self.pause();
        self.send(format!("{} shutdown", self.config.stage));
        self.pause();
        self.send(format!("{} shutdown", self.config.logger));
        self.running = false;
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }

    fn set_leds_on_writers(&self, led: &str, state: i64) {
        if led != BEHAVIOR_LED {
            self.send_all(
                &self.config.writers,
                &format!("set_led_state {} {}", led, state),
            );
        }
    }

    /// Value of a `GET` attribute.
    pub fn get(&self, attribute: &str) -> Result<String, ProtocolError> {
        let value = match attribute {
            "name" => self.name.clone(),
            "running" => self.running.to_string(),
            "x_sign" => self.config.x_dir.to_string(),
            "y_sign" => self.config.y_dir.to_string(),
            "z_sign" => self.config.z_dir.to_string(),
            "statuses" => serde_json::to_string(&self.statuses)
                .map_err(|e| ProtocolError::Handler(e.to_string()))?,
            other => {
                return Err(ProtocolError::Handler(format!(
                    "'{}' has no attribute '{}'",
                    self.name, other
                )))
            }
        };
        Ok(value)
    }
}

fn shutdown(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.shutdown();
    Ok(())
}

fn set_directories(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let directory = args.text(0)?;
    let body = format!("set_directory {}", directory);
    hub.send_all(&hub.config.writers, &body);
    hub.send(format!("{} {}", hub.config.logger, body));
    Ok(())
}

fn device_status(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let device = args.text(0)?.to_string();
    let status = args.text(1)?.to_string();
    debug!("status {}: {}", device, status);
    hub.statuses.insert(device, status);
    Ok(())
}

fn writer_start(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.send_all(&hub.config.writers, "start");
    Ok(())
}

fn writer_stop(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.send_all(&hub.config.writers, "stop");
    Ok(())
}

fn writer_set_every_n(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let n = args.int(0)?;
    if n < 1 {
        return Err(ProtocolError::Handler(format!(
            "every_n must be at least 1, got {}",
            n
        )));
    }
    hub.send_all(&hub.config.writers, &format!("set_every_n {}", n));
    Ok(())
}

// Camera operations take an optional trailing camera selector.

fn camera_start(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let cameras = hub.cameras(args.text(0)?)?;
    hub.send_all(&cameras, "start");
    Ok(())
}

fn camera_stop(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let cameras = hub.cameras(args.text(0)?)?;
    hub.send_all(&cameras, "stop");
    Ok(())
}

fn camera_set_region(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let values = (0..6).map(|i| args.int(i)).collect::<Result<Vec<_>, _>>()?;
    let cameras = hub.cameras(args.text(6)?)?;
    let body = format!(
        "set_region {} {} {} {} {} {}",
        values[0], values[1], values[2], values[3], values[4], values[5]
    );
    hub.send_all(&cameras, &body);
    Ok(())
}

fn camera_set_exposure_framerate(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let exposure_ms = args.float(0)?;
    let rate = args.float(1)?;
    let cameras = hub.cameras(args.text(2)?)?;
    let exposure_us = (exposure_ms * 1000.0).round() as i64;
    hub.send_all(
        &cameras,
        &format!("set_exposure_framerate {} {}", exposure_us, rate),
    );
    Ok(())
}

fn tracker_start(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker("start");
    Ok(())
}

fn tracker_stop(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker("stop");
    Ok(())
}

fn tracker_set_point(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker(&format!("set_point {}", args.int(0)?));
    Ok(())
}

fn tracker_get_curr_pos(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker("get_curr_pos");
    Ok(())
}

fn tracker_set_offset_z(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker(&format!("set_offset_z {}", args.float(0)?));
    Ok(())
}

fn tracker_set_tracking_mode(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker(&format!("set_tracking_mode {}", args.text(0)?));
    Ok(())
}

fn tracker_set_focus_mode(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker(&format!("set_focus_mode {}", args.text(0)?));
    Ok(())
}

fn tracker_interpolate_z_tracking(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker(&format!("interpolate_z_tracking {}", args.bool(0)?));
    Ok(())
}

fn tracker_set_z_autofocus_tracking(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.primary_tracker(&format!("set_z_autofocus_tracking {}", args.bool(0)?));
    Ok(())
}

fn tracker_set_z_autofocus_tracking_offset(
    hub: &mut HubCore,
    args: &Args,
) -> Result<(), ProtocolError> {
    hub.primary_tracker(&format!(
        "set_z_autofocus_tracking_offset {}",
        args.float(0)?
    ));
    Ok(())
}

fn stage_move(hub: &HubCore, axis: char, velocity: i64) {
    let sign = match axis {
        'x' => hub.config.x_dir,
        'y' => hub.config.y_dir,
        _ => hub.config.z_dir,
    };
    hub.send(format!(
        "{} move{} {}",
        hub.config.stage,
        axis,
        velocity * sign as i64
    ));
}

fn stage_movex(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    stage_move(hub, 'x', args.int(0)?);
    Ok(())
}

fn stage_movey(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    stage_move(hub, 'y', args.int(0)?);
    Ok(())
}

fn stage_movez(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    stage_move(hub, 'z', args.int(0)?);
    Ok(())
}

fn stage_set_led(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let led = args.text(0)?;
    let intensity = args.int(1)?;
    hub.send(format!("{} set_led {} {}", hub.config.stage, led, intensity));
    hub.set_leds_on_writers(led, intensity);
    Ok(())
}

fn stage_reset_leds(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.send(format!("{} reset_leds", hub.config.stage));
    for led in ["o", "g"] {
        hub.set_leds_on_writers(led, 0);
    }
    Ok(())
}

fn stage_toggle_led(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.send(format!("{} toggle_led", hub.config.stage));
    Ok(())
}

fn stage_enable(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.send(format!("{} enable", hub.config.stage));
    Ok(())
}

fn stage_disable(hub: &mut HubCore, _: &Args) -> Result<(), ProtocolError> {
    hub.send(format!("{} disable", hub.config.stage));
    Ok(())
}

fn stage_set_motor_limit(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let axis = args.text(0)?;
    let direction = args.text(1)?;
    if !matches!(axis, "x" | "y" | "z") || !matches!(direction, "p" | "n") {
        return Err(ProtocolError::Handler(format!(
            "motor limit needs an axis x/y/z and a direction p/n, got '{} {}'",
            axis, direction
        )));
    }
    hub.send(format!(
        "{} set_motor_limit {} {}",
        hub.config.stage, axis, direction
    ));
    Ok(())
}

fn stage_get_curr_pos(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.send(format!("{} get_curr_pos {}", hub.config.stage, args.text(0)?));
    Ok(())
}

fn stage_get_pos(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.send(format!(
        "{} get_pos {} {}",
        hub.config.stage,
        args.text(0)?,
        args.int(1)?
    ));
    Ok(())
}

fn stage_set_pos(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.send(format!(
        "{} set_pos {} {} {} {}",
        args.text(0)?,
        args.int(1)?,
        args.float(2)?,
        args.float(3)?,
        args.float(4)?
    ));
    Ok(())
}

fn stage_start_z_move(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    let sign = args.int(0)?.signum() * hub.config.z_dir as i64;
    hub.send(format!("{} start_z_move {}", hub.config.stage, sign));
    Ok(())
}

fn stage_change_vel_z(hub: &mut HubCore, args: &Args) -> Result<(), ProtocolError> {
    hub.send(format!(
        "{} change_vel_z {}",
        hub.config.stage,
        args.int(0)?.signum()
    ));
    Ok(())
}

fn register(table: DispatchTable<HubCore>) -> Result<DispatchTable<HubCore>, ProtocolError> {
    use ArgKind::*;
    table
        .verb("shutdown", &[], shutdown)?
        .verb("set_directories", &[Rest], set_directories)?
        .verb("device_status", &[Text, Rest], device_status)?
        .verb("writer_start", &[], writer_start)?
        .verb("writer_stop", &[], writer_stop)?
        .verb("writer_set_every_n", &[Int], writer_set_every_n)?
        .verb("camera_start", &[Rest], camera_start)?
        .verb("camera_stop", &[Rest], camera_stop)?
        .verb(
            "camera_set_region",
            &[Int, Int, Int, Int, Int, Int, Rest],
            camera_set_region,
        )?
        .verb(
            "camera_set_exposure_framerate",
            &[Float, Float, Rest],
            camera_set_exposure_framerate,
        )?
        .verb("tracker_start", &[], tracker_start)?
        .verb("tracker_stop", &[], tracker_stop)?
        .verb("tracker_set_point", &[Int], tracker_set_point)?
        .verb("tracker_get_curr_pos", &[], tracker_get_curr_pos)?
        .verb("tracker_set_offset_z", &[Float], tracker_set_offset_z)?
        .verb("tracker_set_tracking_mode", &[Text], tracker_set_tracking_mode)?
        .verb("tracker_set_focus_mode", &[Text], tracker_set_focus_mode)?
        .verb(
            "tracker_interpolate_z_tracking",
            &[Bool],
            tracker_interpolate_z_tracking,
        )?
        .verb(
            "tracker_set_z_autofocus_tracking",
            &[Bool],
            tracker_set_z_autofocus_tracking,
        )?
        .verb(
            "tracker_set_z_autofocus_tracking_offset",
            &[Float],
            tracker_set_z_autofocus_tracking_offset,
        )?
        .verb("stage_movex", &[Int], stage_movex)?
        .verb("stage_movey", &[Int], stage_movey)?
        .verb("stage_movez", &[Int], stage_movez)?
        .verb("stage_set_led", &[Text, Int], stage_set_led)?
        .verb("stage_reset_leds", &[], stage_reset_leds)?
        .verb("stage_toggle_led", &[], stage_toggle_led)?
        .verb("stage_enable", &[], stage_enable)?
        .verb("stage_disable", &[], stage_disable)?
        .verb("stage_set_motor_limit", &[Text, Text], stage_set_motor_limit)?
        .verb("stage_get_curr_pos", &[Text], stage_get_curr_pos)?
        .verb("stage_get_pos", &[Text, Int], stage_get_pos)?
        .verb("stage_set_pos", &[Text, Int, Float, Float, Float], stage_set_pos)?
        .verb("stage_start_z_move", &[Int], stage_start_z_move)?
        .verb("stage_change_vel_z", &[Int], stage_change_vel_z)
}

/// Routes operator requests and bus messages onto a [`HubCore`].
pub struct HubRouter {
    core: HubCore,
    requests: DispatchTable<HubCore>,
    bus: DispatchTable<HubCore>,
}

impl HubRouter {
    pub fn new(core: HubCore) -> Result<Self, DeviceError> {
        Ok(Self {
            core,
            requests: register(DispatchTable::new())?,
            bus: register(DispatchTable::addressed())?,
        })
    }

    pub fn core(&self) -> &HubCore {
        &self.core
    }

    /// Answer one operator request.
    pub fn handle_request(&mut self, request: &str) -> String {
        let request = request.trim();
        let Some((kind, body)) = request.split_once(char::is_whitespace) else {
            return TOO_SHORT.to_string();
        };
        let body = body.trim();
        if body.is_empty() {
            return TOO_SHORT.to_string();
        }
        match kind {
            "DO" => match self.requests.dispatch(body, &mut self.core) {
                Ok(()) => COMPLETED.to_string(),
                Err(e) => {
                    warn!("request '{}' failed: {}", request, e);
                    e.to_string()
                }
            },
            "GET" => match self.core.get(body) {
                Ok(value) => value,
                Err(e) => e.to_string(),
            },
            _ => BAD_VERB.to_string(),
        }
    }

    /// Dispatch one `hub <operation> <args>` bus message.
    pub fn handle_bus(&mut self, message: &str) -> Result<(), ProtocolError> {
        self.bus.dispatch(message, &mut self.core)
    }
}

/// The hub process: REP server plus bus subscription.
pub struct HubDevice {
    reactor: Reactor,
    server: Server,
    commands: Subscriber,
    router: HubRouter,
}

impl HubDevice {
    pub fn new(
        reactor: Reactor,
        server: Server,
        commands: Subscriber,
        mut core: HubCore,
    ) -> Result<Self, DeviceError> {
        core.cancel = Some(reactor.cancel_handle());
        Ok(Self {
            reactor,
            server,
            commands,
            router: HubRouter::new(core)?,
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.reactor.cancel_handle()
    }

    pub fn run(mut self) -> Result<(), DeviceError> {
        info!("{} running", self.router.core.name);
        while self.router.core.is_running() {
            let ready = match self.reactor.poll(
                &[self.server.socket(), self.commands.socket()],
                Duration::from_secs(1),
            )? {
                Wake::Cancelled => break,
                Wake::Timeout => continue,
                Wake::Ready(ready) => ready,
            };
            if ready.contains(&0) {
                let reply = match self.server.recv() {
                    Ok(Some(request)) => {
                        info!("request: {}", request);
                        Some(self.router.handle_request(&request))
                    }
                    Ok(None) => None,
                    // the REP socket still owes a reply for the bad request
                    Err(e) => {
                        warn!("bad request: {}", e);
                        Some(e.to_string())
                    }
                };
                if let Some(reply) = reply {
                    if let Err(e) = self.server.send(&reply) {
                        warn!("failed to send reply: {}", e);
                    }
                }
            }
            if ready.contains(&1) {
                let log = self.router.core.log.clone();
                dispatch_pending(&self.commands, &self.router.bus, &mut self.router.core, &log);
            }
        }
        info!("{} stopped", self.router.core.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bus {
        _ctx: zmq::Context,
        tap: Subscriber,
    }

    impl Bus {
        fn drain(&self) -> Vec<String> {
            thread::sleep(Duration::from_millis(50));
            let mut out = Vec::new();
            while let Some(msg) = self.tap.try_recv_string() {
                out.push(msg);
            }
            out
        }
    }

    fn router(address: &str, config: HubConfig) -> (HubRouter, Bus) {
        let ctx = zmq::Context::new();
        let pub_socket = ctx.socket(zmq::PUB).unwrap();
        pub_socket.bind(address).unwrap();
        let sub_socket = ctx.socket(zmq::SUB).unwrap();
        sub_socket.connect(address).unwrap();
        let tap = Subscriber::new(sub_socket);
        tap.subscribe("").unwrap();
        thread::sleep(Duration::from_millis(50));

        let core = HubCore::new("hub", config, Arc::new(Publisher::new(pub_socket)));
        (HubRouter::new(core).unwrap(), Bus { _ctx: ctx, tap })
    }

    fn quick_config() -> HubConfig {
        HubConfig {
            shutdown_pause_ms: 0,
            ..HubConfig::default()
        }
    }

    #[test]
    fn test_request_replies() {
        let (mut hub, _bus) = router("inproc://hub-replies", quick_config());
        assert_eq!(hub.handle_request("DO"), TOO_SHORT);
        assert_eq!(hub.handle_request("SET x 1"), BAD_VERB);
        assert_eq!(hub.handle_request("DO camera_start"), COMPLETED);
        assert_eq!(hub.handle_request("GET name"), "hub");
        assert_eq!(hub.handle_request("GET z_sign"), "1");
        assert_eq!(hub.handle_request("DO warp 9"), "unknown verb 'warp'");
        assert!(hub
            .handle_request("DO stage_movex fast")
            .contains("expected integer"));
    }

    #[test]
    fn test_axis_signs_applied() {
        let config = HubConfig {
            x_dir: -1,
            z_dir: -1,
            ..quick_config()
        };
        let (mut hub, bus) = router("inproc://hub-signs", config);
        hub.handle_request("DO stage_movex 12");
        hub.handle_request("DO stage_movey 5");
        hub.handle_bus("hub stage_movez 3").unwrap();
        hub.handle_request("DO stage_start_z_move 1");
        assert_eq!(
            bus.drain(),
            vec![
                "stage movex -12",
                "stage movey 5",
                "stage movez -3",
                "stage start_z_move -1"
            ]
        );
    }

    #[test]
    fn test_shutdown_order() {
        let (mut hub, bus) = router("inproc://hub-shutdown", quick_config());
        assert_eq!(hub.handle_request("DO shutdown"), COMPLETED);
        assert!(!hub.core().is_running());
        let sent: Vec<String> = bus
            .drain()
            .into_iter()
            .filter(|m| !m.starts_with("logger ") || m == "logger shutdown")
            .collect();
        assert_eq!(
            sent,
            vec![
                "writer_behavior shutdown",
                "writer_gcamp shutdown",
                "camera_behavior shutdown",
                "camera_gcamp shutdown",
                "tracker_behavior shutdown",
                "tracker_gcamp shutdown",
                "commands shutdown",
                "stage shutdown",
                "logger shutdown",
            ]
        );
    }

    #[test]
    fn test_led_changes_reach_writers() {
        let (mut hub, bus) = router("inproc://hub-leds", quick_config());
        hub.handle_request("DO stage_set_led o 40");
        hub.handle_request("DO stage_set_led b 10");
        assert_eq!(
            bus.drain(),
            vec![
                "stage set_led o 40",
                "writer_behavior set_led_state o 40",
                "writer_gcamp set_led_state o 40",
                "stage set_led b 10",
            ]
        );
    }

    #[test]
    fn test_expansions() {
        let (mut hub, bus) = router("inproc://hub-expand", quick_config());
        hub.handle_request("DO camera_set_exposure_framerate 18 20");
        hub.handle_request("DO tracker_set_point 2");
        hub.handle_request("DO set_directories /data/run 1");
        hub.handle_bus("hub stage_get_pos tracker_behavior 2").unwrap();
        hub.handle_request("DO stage_set_pos tracker_behavior 3 1 2 3.5");
        assert_eq!(
            bus.drain(),
            vec![
                "camera_behavior set_exposure_framerate 18000 20",
                "camera_gcamp set_exposure_framerate 18000 20",
                "tracker_behavior set_point 2",
                "writer_behavior set_directory /data/run 1",
                "writer_gcamp set_directory /data/run 1",
                "logger set_directory /data/run 1",
                "stage get_pos tracker_behavior 2",
                "tracker_behavior set_pos 3 1 2 3.5",
            ]
        );
    }

    #[test]
    fn test_camera_operations_select_one_camera() {
        let (mut hub, bus) = router("inproc://hub-cameras", quick_config());
        hub.handle_request("DO camera_set_region 1 512 512 1 0 0 behavior");
        hub.handle_request("DO camera_set_exposure_framerate 18 20 gcamp");
        hub.handle_request("DO camera_stop camera_gcamp");
        hub.handle_request("DO camera_start");
        assert_eq!(
            hub.handle_request("DO camera_start thermal"),
            "unknown camera 'thermal'"
        );
        assert_eq!(
            bus.drain(),
            vec![
                "camera_behavior set_region 1 512 512 1 0 0",
                "camera_gcamp set_exposure_framerate 18000 20",
                "camera_gcamp stop",
                "camera_behavior start",
                "camera_gcamp start",
            ]
        );
    }

    #[test]
    fn test_motor_limit_relayed_to_stage() {
        let config = HubConfig {
            x_dir: -1,
            ..quick_config()
        };
        let (mut hub, bus) = router("inproc://hub-motor-limit", config);
        assert_eq!(hub.handle_request("DO stage_set_motor_limit x p"), COMPLETED);
        assert_ne!(hub.handle_request("DO stage_set_motor_limit w p"), COMPLETED);
        assert_ne!(hub.handle_request("DO stage_set_motor_limit z up"), COMPLETED);
        assert_eq!(bus.drain(), vec!["stage set_motor_limit x p"]);
    }

    #[test]
    fn test_undecodable_request_answered_and_hub_keeps_serving() {
        let ctx = zmq::Context::new();
        let requests = ctx.socket(zmq::REP).unwrap();
        requests.bind("inproc://hub-undecodable").unwrap();
        let bus = ctx.socket(zmq::PUB).unwrap();
        bus.bind("inproc://hub-undecodable-bus").unwrap();
        let commands = ctx.socket(zmq::SUB).unwrap();
        commands.connect("inproc://hub-undecodable-bus").unwrap();
        let commands = Subscriber::new(commands);
        commands.subscribe("hub").unwrap();
        let hub = HubDevice::new(
            Reactor::new(&ctx).unwrap(),
            Server::new(requests),
            commands,
            HubCore::new("hub", quick_config(), Arc::new(Publisher::new(bus))),
        )
        .unwrap();
        let hub = thread::spawn(move || hub.run());

        let operator = ctx.socket(zmq::REQ).unwrap();
        operator.set_rcvtimeo(2000).unwrap();
        operator.connect("inproc://hub-undecodable").unwrap();
        operator.send(&[0xffu8, 0xfe, b' ', b'x'][..], 0).unwrap();
        let reply = operator.recv_string(0).unwrap().unwrap();
        assert!(reply.contains("not valid UTF-8"));

        operator.send("GET name", 0).unwrap();
        assert_eq!(operator.recv_string(0).unwrap().unwrap(), "hub");
        operator.send("DO shutdown", 0).unwrap();
        assert_eq!(operator.recv_string(0).unwrap().unwrap(), COMPLETED);
        assert!(hub.join().unwrap().is_ok());
    }

    #[test]
    fn test_device_status_recorded() {
        let (mut hub, _bus) = router("inproc://hub-status", quick_config());
        hub.handle_bus(r#"hub device_status camera_behavior {"running": true}"#)
            .unwrap();
        assert_eq!(
            hub.handle_request("GET statuses"),
            r#"{"camera_behavior":"{\"running\": true}"}"#
        );
    }

    #[test]
    fn test_config_load() {
        let dir = tempfile::tempdir().unwrap();
        let missing = HubConfig::load(&dir.path().join("configs.json")).unwrap();
        assert_eq!(missing, HubConfig::default());

        let path = dir.path().join("signs.json");
        std::fs::write(&path, r#"{"x_dir": -1, "z_dir": -1}"#).unwrap();
        let loaded = HubConfig::load(&path).unwrap();
        assert_eq!((loaded.x_dir, loaded.y_dir, loaded.z_dir), (-1, 1, -1));
        assert_eq!(loaded.stage, "stage");

        std::fs::write(&path, r#"{"y_dir": 2}"#).unwrap();
        assert!(HubConfig::load(&path).is_err());
    }
}
