//! Direct relay / feedback-pin outlet driver.
//!
//! Each unit owns a relay output and, optionally, a feedback input.  There
//! is no shared link here, so nothing to retry or recover: a pin error is
//! reported as [`DriverError::Pin`] and the control loop re-asserts the
//! relay on its next tick.
//!
//! Pins are anything implementing the `embedded-hal` 1.0 digital traits.
//! Feedback and refuel inputs are active-low (pulled up, closed to ground).

use std::collections::BTreeMap;

use embedded_hal::digital::{InputPin, OutputPin};
use log::{debug, info, warn};

use crate::app::ports::{Feedback, OutletDriver};
use crate::config::{HeaterConfig, SensorConfig};
use crate::error::{DriverError, SensorError};

/// Ambient temperature source wired next to the relays.
pub trait TemperatureProbe {
    fn read_fahrenheit(&mut self) -> Result<f32, SensorError>;
}

struct RelayChannel<O, I> {
    relay: O,
    feedback: Option<I>,
    /// Relay energises on a low level.
    invert: bool,
    commanded: bool,
}

pub struct GpioOutlets<O, I, T> {
    channels: BTreeMap<String, RelayChannel<O, I>>,
    probe: T,
    refuel: Option<I>,
}

impl<O, I, T> GpioOutlets<O, I, T>
where
    O: OutputPin,
    I: InputPin,
    T: TemperatureProbe,
{
    pub fn new(probe: T, refuel: Option<I>) -> Self {
        Self {
            channels: BTreeMap::new(),
            probe,
            refuel,
        }
    }

    /// Wire every unit from the persisted document.
    ///
    /// `output` and `input` turn a pin number into a pin; `probe` gets the
    /// sensor pin.  Units without a `relay_pin` are left unwired and any
    /// command for them reports [`DriverError::UnknownUnit`].
    pub fn from_config<FO, FI, FT>(
        heaters: &BTreeMap<String, HeaterConfig>,
        sensor: &SensorConfig,
        refuel: Option<I>,
        mut output: FO,
        mut input: FI,
        probe: FT,
    ) -> Result<Self, DriverError>
    where
        FO: FnMut(u8) -> Result<O, DriverError>,
        FI: FnMut(u8) -> Result<I, DriverError>,
        FT: FnOnce(u8) -> Result<T, DriverError>,
    {
        let mut gpio = Self::new(probe(sensor.pin)?, refuel);
        for (name, heater) in heaters {
            let Some(relay_pin) = heater.relay_pin else {
                warn!("GPIO: {} has no relay pin, not wired", name);
                continue;
            };
            let relay = output(relay_pin)?;
            let feedback = heater.feedback_pin.map(&mut input).transpose()?;
            gpio.add_unit(name, relay, feedback, heater.invert);
        }
        Ok(gpio)
    }

    /// Wire a unit.  Without a feedback pin the commanded state is reported
    /// as feedback.
    pub fn add_unit(&mut self, name: &str, relay: O, feedback: Option<I>, invert: bool) {
        info!(
            "GPIO: {} wired{}{}",
            name,
            if invert { ", active-low" } else { "" },
            if feedback.is_some() { ", with feedback" } else { "" }
        );
        self.channels.insert(
            name.to_owned(),
            RelayChannel {
                relay,
                feedback,
                invert,
                commanded: false,
            },
        );
    }

    fn channel(&mut self, unit: &str) -> Result<&mut RelayChannel<O, I>, DriverError> {
        self.channels.get_mut(unit).ok_or(DriverError::UnknownUnit)
    }
}

impl<O, I, T> OutletDriver for GpioOutlets<O, I, T>
where
    O: OutputPin,
    I: InputPin,
    T: TemperatureProbe,
{
    fn set_output(&mut self, unit: &str, on: bool) -> Result<(), DriverError> {
        let ch = self.channel(unit)?;
        let level = on != ch.invert;
        let res = if level {
            ch.relay.set_high()
        } else {
            ch.relay.set_low()
        };
        res.map_err(|_| DriverError::Pin)?;
        ch.commanded = on;
        debug!("GPIO: {} relay {}", unit, if level { "high" } else { "low" });
        Ok(())
    }

    fn read_feedback(&mut self, unit: &str) -> Result<Feedback, DriverError> {
        let ch = self.channel(unit)?;
        let Some(pin) = ch.feedback.as_mut() else {
            return Ok(if ch.commanded {
                Feedback::Active
            } else {
                Feedback::Inactive
            });
        };
        Ok(match pin.is_low() {
            Ok(true) => Feedback::Active,
            Ok(false) => Feedback::Inactive,
            Err(_) => Feedback::Unknown,
        })
    }

    fn read_temperature(&mut self) -> Result<f32, SensorError> {
        self.probe.read_fahrenheit()
    }

    fn refuel_signal(&mut self) -> Result<bool, DriverError> {
        match self.refuel.as_mut() {
            Some(pin) => pin.is_low().map_err(|_| DriverError::Pin),
            None => Ok(false),
        }
    }
}
