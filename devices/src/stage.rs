//! Motor and LED controller device.

use crate::bus_log::BusLog;
use crate::dispatch_pending;
use crate::error::DeviceError;
use shared::reactor::{CancelHandle, Reactor, Wake};
use shared::rpc::{ArgKind, Args, DispatchTable, ProtocolError};
use shared::zmq::{Publisher, Subscriber};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracker::calibration::Point3;

pub const LED_NAMES: [&str; 3] = ["b", "o", "g"];
pub const MIN_Z_SPEED: i32 = 1;
pub const MAX_Z_SPEED: i32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn parse(name: &str) -> Option<Axis> {
        match name {
            "x" => Some(Axis::X),
            "y" => Some(Axis::Y),
            "z" => Some(Axis::Z),
            _ => None,
        }
    }
}

/// Side of an axis a travel limit bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSide {
    Negative,
    Positive,
}

impl LimitSide {
    pub fn parse(name: &str) -> Option<LimitSide> {
        match name {
            "n" => Some(LimitSide::Negative),
            "p" => Some(LimitSide::Positive),
            _ => None,
        }
    }
}

/// Motion and illumination hardware behind the stage device.
pub trait StageDriver: Send {
    fn set_velocity(&mut self, axis: Axis, velocity: i32) -> Result<(), DeviceError>;

    /// Current `(x, y, z)` position in stage units.
    fn position(&mut self) -> Result<Point3, DeviceError>;

    fn set_led(&mut self, name: &str, intensity: i64) -> Result<(), DeviceError>;

    /// Make the current position on `axis` the travel limit on `side`.
    fn set_motor_limit(&mut self, axis: Axis, side: LimitSide) -> Result<(), DeviceError>;

    /// Switch the behavior illumination on or off.
    fn set_behavior_light(&mut self, on: bool) -> Result<(), DeviceError>;

    fn enable(&mut self) -> Result<(), DeviceError>;

    fn disable(&mut self) -> Result<(), DeviceError>;
}

/// Stage without hardware: positions integrate commanded velocities.
#[derive(Debug)]
pub struct SimulatedStage {
    position: Point3,
    velocity: [i32; 3],
    /// `(negative, positive)` travel limits per axis.
    limits: [(Option<f64>, Option<f64>); 3],
    leds: BTreeMap<String, i64>,
    behavior_light: bool,
    enabled: bool,
    last_update: Instant,
}

impl Default for SimulatedStage {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedStage {
    pub fn new() -> Self {
        Self {
            position: Point3::zeros(),
            velocity: [0; 3],
            limits: [(None, None); 3],
            leds: LED_NAMES.iter().map(|n| (n.to_string(), 0)).collect(),
            behavior_light: false,
            enabled: true,
            last_update: Instant::now(),
        }
    }

    /// Advance the simulated position by `dt` at the current velocities.
    pub fn integrate(&mut self, dt: Duration) {
        if self.enabled {
            for (i, p) in self.position.iter_mut().enumerate() {
                *p += self.velocity[i] as f64 * dt.as_secs_f64();
                let (low, high) = self.limits[i];
                if let Some(low) = low {
                    *p = p.max(low);
                }
                if let Some(high) = high {
                    *p = p.min(high);
                }
            }
        }
        self.last_update += dt;
    }

    fn catch_up(&mut self) {
        let now = Instant::now();
        let dt = now.saturating_duration_since(self.last_update);
        self.integrate(dt);
    }

    pub fn velocity(&self, axis: Axis) -> i32 {
        self.velocity[axis.index()]
    }

    pub fn led(&self, name: &str) -> Option<i64> {
        self.leds.get(name).copied()
    }

    pub fn behavior_light(&self) -> bool {
        self.behavior_light
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl StageDriver for SimulatedStage {
    fn set_velocity(&mut self, axis: Axis, velocity: i32) -> Result<(), DeviceError> {
        self.catch_up();
        self.velocity[axis.index()] = velocity;
        Ok(())
    }

    fn position(&mut self) -> Result<Point3, DeviceError> {
        self.catch_up();
        Ok(self.position)
    }

    fn set_led(&mut self, name: &str, intensity: i64) -> Result<(), DeviceError> {
        let Some(slot) = self.leds.get_mut(name) else {
            return Err(DeviceError::Stage(format!("unknown LED '{}'", name)));
        };
        *slot = intensity;
        Ok(())
    }

    fn set_motor_limit(&mut self, axis: Axis, side: LimitSide) -> Result<(), DeviceError> {
        self.catch_up();
        let i = axis.index();
        let here = Some(self.position[i]);
        match side {
            LimitSide::Negative => self.limits[i].0 = here,
            LimitSide::Positive => self.limits[i].1 = here,
        }
        Ok(())
    }

    fn set_behavior_light(&mut self, on: bool) -> Result<(), DeviceError> {
        self.behavior_light = on;
        Ok(())
    }

    fn enable(&mut self) -> Result<(), DeviceError> {
        self.catch_up();
        self.enabled = true;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), DeviceError> {
        self.catch_up();
        self.enabled = false;
        Ok(())
    }
}

/// Stage device state. Replies to position queries go straight to the
/// requesting device by name.
pub struct StageCore<D> {
    driver: D,
    publisher: Arc<Publisher>,
    log: BusLog,
    cancel: Option<CancelHandle>,
    running: bool,
    z_speed: i32,
    behavior_light: bool,
}

impl<D: StageDriver> StageCore<D> {
    pub fn new(name: impl Into<String>, driver: D, publisher: Arc<Publisher>) -> Self {
        Self {
            log: BusLog::new(name, publisher.clone()),
            driver,
            publisher,
            cancel: None,
            running: true,
            z_speed: MIN_Z_SPEED,
            behavior_light: false,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn z_speed(&self) -> i32 {
        self.z_speed
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn execute(&mut self, what: &str) {
        self.log.send(format!("executing: {}", what));
    }

    fn move_axis(&mut self, axis: Axis, velocity: i32) -> Result<(), ProtocolError> {
        self.execute(&format!("move {:?} {}", axis, velocity));
        self.driver.set_velocity(axis, velocity).map_err(handler)
    }

    fn position(&mut self) -> Result<Point3, ProtocolError> {
        self.driver.position().map_err(handler)
    }

    fn reset_leds(&mut self) -> Result<(), ProtocolError> {
        self.execute("reset leds");
        self.behavior_light = false;
        self.driver.set_behavior_light(false).map_err(handler)?;
        for led in LED_NAMES {
            self.driver.set_led(led, 0).map_err(handler)?;
        }
        Ok(())
    }

    /// Stop every axis, darken every LED and release the motors.
    pub fn shutdown(&mut self) -> Result<(), ProtocolError> {
        info!("stage shutting down");
        for axis in [Axis::X, Axis::Y, Axis::Z] {
            self.move_axis(axis, 0)?;
        }
        self.reset_leds()?;
        self.driver.disable().map_err(handler)?;
        self.running = false;
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
        Ok(())
    }
}

fn handler(e: DeviceError) -> ProtocolError {
    ProtocolError::Handler(e.to_string())
}

fn velocity_arg(args: &Args) -> Result<i32, ProtocolError> {
    let v = args.int(0)?;
    i32::try_from(v).map_err(|_| ProtocolError::Handler(format!("velocity {} out of range", v)))
}

fn movex<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    stage.move_axis(Axis::X, velocity_arg(args)?)
}

fn movey<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    stage.move_axis(Axis::Y, velocity_arg(args)?)
}

fn movez<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    stage.move_axis(Axis::Z, velocity_arg(args)?)
}

fn set_led<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    let led = args.text(0)?;
    let intensity = args.int(1)?;
    stage.execute(&format!("set led {} {}", led, intensity));
    stage.driver.set_led(led, intensity).map_err(handler)
}

fn set_motor_limit<D: StageDriver>(
    stage: &mut StageCore<D>,
    args: &Args,
) -> Result<(), ProtocolError> {
    let (axis, side) = (args.text(0)?, args.text(1)?);
    let (Some(a), Some(s)) = (Axis::parse(axis), LimitSide::parse(side)) else {
        return Err(ProtocolError::Handler(format!(
            "bad motor limit '{} {}'",
            axis, side
        )));
    };
    stage.execute(&format!("motor limit {:?} {:?}", a, s));
    stage.driver.set_motor_limit(a, s).map_err(handler)
}

fn reset_leds<D: StageDriver>(stage: &mut StageCore<D>, _: &Args) -> Result<(), ProtocolError> {
    stage.reset_leds()
}

fn toggle_led<D: StageDriver>(stage: &mut StageCore<D>, _: &Args) -> Result<(), ProtocolError> {
    stage.behavior_light = !stage.behavior_light;
    stage.execute(&format!("behavior light {}", stage.behavior_light));
    stage
        .driver
        .set_behavior_light(stage.behavior_light)
        .map_err(handler)
}

fn enable<D: StageDriver>(stage: &mut StageCore<D>, _: &Args) -> Result<(), ProtocolError> {
    stage.execute("enable");
    stage.driver.enable().map_err(handler)
}

fn disable<D: StageDriver>(stage: &mut StageCore<D>, _: &Args) -> Result<(), ProtocolError> {
    stage.execute("disable");
    stage.driver.disable().map_err(handler)
}

fn get_pos<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    let device = args.text(0)?;
    let index = args.int(1)?;
    let p = stage.position()?;
    stage
        .publisher
        .send(format!("{} set_pos {} {} {} {}", device, index, p.x, p.y, p.z));
    Ok(())
}

fn get_curr_pos<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    let device = args.text(0)?;
    let p = stage.position()?;
    stage
        .publisher
        .send(format!("{} set_curr_pos {} {} {}", device, p.x, p.y, p.z));
    Ok(())
}

fn start_z_move<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    let sign = args.int(0)?.signum() as i32;
    let velocity = sign * stage.z_speed;
    stage.move_axis(Axis::Z, velocity)
}

fn change_vel_z<D: StageDriver>(stage: &mut StageCore<D>, args: &Args) -> Result<(), ProtocolError> {
    let sign = args.int(0)?.signum();
    stage.z_speed = match sign {
        1 => stage.z_speed.saturating_mul(2),
        -1 => stage.z_speed / 2,
        _ => stage.z_speed,
    }
    .clamp(MIN_Z_SPEED, MAX_Z_SPEED);
    stage.execute(&format!("z speed {}", stage.z_speed));
    Ok(())
}

fn shutdown<D: StageDriver>(stage: &mut StageCore<D>, _: &Args) -> Result<(), ProtocolError> {
    stage.shutdown()
}

pub fn command_table<D: StageDriver>() -> Result<DispatchTable<StageCore<D>>, ProtocolError> {
    use ArgKind::*;
    DispatchTable::addressed()
        .verb("movex", &[Int], movex)?
        .verb("movey", &[Int], movey)?
        .verb("movez", &[Int], movez)?
        .verb("set_led", &[Text, Int], set_led)?
        .verb("reset_leds", &[], reset_leds)?
        .verb("set_motor_limit", &[Text, Text], set_motor_limit)?
        .verb("toggle_led", &[], toggle_led)?
        .verb("enable", &[], enable)?
        .verb("disable", &[], disable)?
        .verb("get_pos", &[Text, Int], get_pos)?
        .verb("get_curr_pos", &[Text], get_curr_pos)?
        .verb("start_z_move", &[Int], start_z_move)?
        .verb("change_vel_z", &[Int], change_vel_z)?
        .verb("shutdown", &[], shutdown)
}

pub struct StageDevice<D> {
    reactor: Reactor,
    commands: Subscriber,
    table: DispatchTable<StageCore<D>>,
    core: StageCore<D>,
}

impl<D: StageDriver> StageDevice<D> {
    pub fn new(
        reactor: Reactor,
        commands: Subscriber,
        mut core: StageCore<D>,
    ) -> Result<Self, DeviceError> {
        core.cancel = Some(reactor.cancel_handle());
        let mut device = Self {
            reactor,
            commands,
            table: command_table()?,
            core,
        };
        device.core.driver.enable()?;
        if let Err(e) = device.core.reset_leds() {
            warn!("failed to reset LEDs: {}", e);
        }
        Ok(device)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.reactor.cancel_handle()
    }

    pub fn run(mut self) -> Result<(), DeviceError> {
        info!("{} running", self.core.log.device());
        while self.core.running {
            match self.reactor.poll(&[self.commands.socket()], Duration::from_secs(1))? {
                Wake::Cancelled => break,
                Wake::Timeout => continue,
                Wake::Ready(_) => {
                    let log = self.core.log.clone();
                    dispatch_pending(&self.commands, &self.table, &mut self.core, &log);
                }
            }
        }
        if self.core.running {
            // Interrupted rather than told to shut down.
            if let Err(e) = self.core.shutdown() {
                warn!("stage shutdown failed: {}", e);
            }
        }
        info!("{} stopped", self.core.log.device());
        Ok(())
    }
}
