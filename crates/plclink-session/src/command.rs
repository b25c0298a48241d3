//! Command codes and their acknowledgment classes.
//!
//! Code 0 means "no command". Momentary commands clear themselves once the
//! device echoes them; continuous commands (axis jogs) stay active until the
//! input that produced them returns to neutral.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Radius of the joystick dead zone, as a fraction of full deflection.
pub const JOYSTICK_DEADZONE: f64 = 0.3;

/// How a command's lifecycle ends after the device acknowledges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandClass {
    /// Cleared immediately after one acknowledged round trip.
    Momentary,
    /// Held at the acknowledged code until released.
    Continuous,
}

/// Named commands understood by the reference device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Command {
    Initialize = 1,
    Start = 2,
    DriverPowerOn = 3,
    DriverPowerOff = 4,
    ServoModuleOn = 5,
    ServoModuleOff = 6,
    XPlus = 7,
    XMinus = 8,
    YPlus = 9,
    YMinus = 10,
    ZPlus = 11,
    ZMinus = 12,
}

impl Command {
    pub const ALL: [Command; 12] = [
        Command::Initialize,
        Command::Start,
        Command::DriverPowerOn,
        Command::DriverPowerOff,
        Command::ServoModuleOn,
        Command::ServoModuleOff,
        Command::XPlus,
        Command::XMinus,
        Command::YPlus,
        Command::YMinus,
        Command::ZPlus,
        Command::ZMinus,
    ];

    /// Wire code of this command.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Look up a named command by wire code.
    pub fn from_code(code: u16) -> Option<Command> {
        Command::ALL.iter().copied().find(|cmd| cmd.code() == code)
    }

    /// Display name shown to operators.
    pub fn name(self) -> &'static str {
        match self {
            Command::Initialize => "Initialize",
            Command::Start => "Start",
            Command::DriverPowerOn => "Driver Power ON",
            Command::DriverPowerOff => "Driver Power OFF",
            Command::ServoModuleOn => "Servo Module ON",
            Command::ServoModuleOff => "Servo Module OFF",
            Command::XPlus => "X+",
            Command::XMinus => "X-",
            Command::YPlus => "Y+",
            Command::YMinus => "Y-",
            Command::ZPlus => "Z+",
            Command::ZMinus => "Z-",
        }
    }

    /// Acknowledgment class of this command.
    pub fn class(self) -> CommandClass {
        match self {
            Command::XPlus
            | Command::XMinus
            | Command::YPlus
            | Command::YMinus
            | Command::ZPlus
            | Command::ZMinus => CommandClass::Continuous,
            _ => CommandClass::Momentary,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = SessionError;

    /// Accepts a wire code (`"5"`) or a name, ignoring case, spaces,
    /// dashes and underscores (`"servo-module-on"`, `"X+"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u16>() {
            return Command::from_code(code)
                .ok_or_else(|| SessionError::UnknownCommand(trimmed.to_string()));
        }

        let wanted = normalize(trimmed);
        Command::ALL
            .iter()
            .copied()
            .find(|cmd| normalize(cmd.name()) == wanted || normalize(&format!("{cmd:?}")) == wanted)
            .ok_or_else(|| SessionError::UnknownCommand(trimmed.to_string()))
    }
}

fn normalize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let (stem, suffix) = if let Some(stem) = lower.strip_suffix('+') {
        (stem, "plus")
    } else if let Some(stem) = lower.strip_suffix('-') {
        (stem, "minus")
    } else {
        (lower.as_str(), "")
    };
    stem.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .chain(suffix.chars())
        .collect()
}

/// Explicit code → class table.
///
/// Starts with the classes of [`Command::ALL`]; codes outside the table are
/// momentary unless overridden.
#[derive(Debug, Clone)]
pub struct CommandTable {
    classes: BTreeMap<u16, CommandClass>,
}

impl Default for CommandTable {
    fn default() -> Self {
        let classes = Command::ALL
            .iter()
            .map(|cmd| (cmd.code(), cmd.class()))
            .collect();
        Self { classes }
    }
}

impl CommandTable {
    /// Class for a wire code.
    pub fn class_of(&self, code: u16) -> CommandClass {
        self.classes
            .get(&code)
            .copied()
            .unwrap_or(CommandClass::Momentary)
    }

    /// Override or add the class of a code.
    pub fn set_class(&mut self, code: u16, class: CommandClass) {
        self.classes.insert(code, class);
    }

    /// Display name for a code, falling back to `Command <n>`.
    pub fn name_of(&self, code: u16) -> String {
        match Command::from_code(code) {
            Some(cmd) => cmd.name().to_string(),
            None => format!("Command {code}"),
        }
    }
}

/// Jog command for a joystick position, `None` inside the dead zone.
///
/// `x` and `y` are normalized deflections (right and up positive); a
/// deflection longer than 1 is scaled back onto the unit circle. The
/// dominant axis picks the direction, ties going to Y.
pub fn joystick_command(x: f64, y: f64, deadzone: f64) -> Option<Command> {
    let mut x = x;
    let mut y = y;
    let magnitude = x.hypot(y);
    if magnitude > 1.0 {
        x /= magnitude;
        y /= magnitude;
    }
    if !(x.hypot(y) >= deadzone) {
        return None;
    }

    if x.abs() > y.abs() {
        Some(if x > 0.0 { Command::XPlus } else { Command::XMinus })
    } else {
        Some(if y > 0.0 { Command::YPlus } else { Command::YMinus })
    }
}

/// Jog command for a Z slider position: positive raises, negative lowers,
/// zero is neutral.
pub fn slider_command(value: i32) -> Option<Command> {
    match value {
        v if v > 0 => Some(Command::ZPlus),
        v if v < 0 => Some(Command::ZMinus),
        _ => None,
    }
}
