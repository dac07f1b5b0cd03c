mod controller;
mod outcome;

pub use controller::ExamController;
pub use outcome::{ExamStart, ExamSummary};
