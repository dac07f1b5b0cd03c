mod ids;
mod question;
mod session;
mod topic;

pub use ids::QuestionId;
pub use question::{Question, QuestionContent, QuestionError, QuestionKind, ROTATING_TYPE_NUMBER};
pub use session::{ExamPhase, SessionState};
pub use topic::{TopicError, TopicGroup, TopicName, TopicPoolEntry};
