use crate::error::AppError;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// A wall-clock minute at which the scheduler is allowed to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Checkpoint {
    hour: u8,
    minute: u8,
}

pub const DEFAULT_CHECKPOINTS: [Checkpoint; 3] = [
    Checkpoint { hour: 0, minute: 1 },
    Checkpoint { hour: 12, minute: 1 },
    Checkpoint { hour: 20, minute: 0 },
];

impl Checkpoint {
    pub fn new(hour: u8, minute: u8) -> Result<Self, AppError> {
        if hour > 23 {
            return Err(AppError::invalid_input(format!(
                "checkpoint hour {hour} is out of range"
            )));
        }
        if minute > 59 {
            return Err(AppError::invalid_input(format!(
                "checkpoint minute {minute} is out of range"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn matches(&self, now: OffsetDateTime) -> bool {
        now.hour() == self.hour && now.minute() == self.minute
    }
}

impl FromStr for Checkpoint {
    type Err = AppError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let invalid = || AppError::invalid_input(format!("checkpoint '{trimmed}' must be HH:MM"));

        let (hour, minute) = trimmed.split_once(':').ok_or_else(invalid)?;
        let well_formed = (1..=2).contains(&hour.len())
            && minute.len() == 2
            && hour.chars().all(|ch| ch.is_ascii_digit())
            && minute.chars().all(|ch| ch.is_ascii_digit());
        if !well_formed {
            return Err(invalid());
        }

        let hour = hour.parse::<u8>().map_err(|_| invalid())?;
        let minute = minute.parse::<u8>().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Parse, sort and de-duplicate a list of `HH:MM` values.
pub fn parse_checkpoints<S: AsRef<str>>(values: &[S]) -> Result<Vec<Checkpoint>, AppError> {
    let mut checkpoints = values
        .iter()
        .map(|value| value.as_ref().parse::<Checkpoint>())
        .collect::<Result<Vec<_>, _>>()?;
    if checkpoints.is_empty() {
        return Err(AppError::invalid_input("at least one checkpoint is required"));
    }
    checkpoints.sort();
    checkpoints.dedup();
    Ok(checkpoints)
}

pub fn matching_checkpoint(checkpoints: &[Checkpoint], now: OffsetDateTime) -> Option<Checkpoint> {
    checkpoints
        .iter()
        .copied()
        .find(|checkpoint| checkpoint.matches(now))
}
