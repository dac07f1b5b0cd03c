#![forbid(unsafe_code)]

pub mod error;
pub mod exam;
pub mod rotation;
pub mod selector;

pub use exam_core::Clock;

pub use error::ExamError;
pub use exam::{ExamController, ExamStart, ExamSummary};
pub use rotation::TopicRotator;
pub use selector::{QuestionSelector, SlotMatch, SlotRequest};
