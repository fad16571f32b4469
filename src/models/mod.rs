pub mod record;
pub mod training;
pub mod workout;

pub use record::PersonalRecord;
pub use training::{Injury, InjuryStatus, PlannedSession, TrainingBlock, WorkoutFeedback};
pub use workout::{NewWorkout, Workout};
