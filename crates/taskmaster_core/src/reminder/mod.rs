//! Due-date reminders: checkpoint gating, the due-today/cooldown predicate,
//! message construction and the periodic scheduler that ties them together.

pub mod checkpoint;
pub mod clock;
pub mod due;
pub mod message;
pub mod scheduler;
pub mod settings;

pub use checkpoint::Checkpoint;
pub use clock::{Clock, FixedClock, SystemClock};
pub use due::{ReminderState, evaluate};
pub use message::ReminderMessage;
pub use scheduler::{CycleOutcome, CycleReport, DeliveryFailure, ReminderScheduler, SchedulerHandle};
pub use settings::ReminderSettings;
