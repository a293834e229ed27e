mod context;
pub mod dead_letter;
pub mod queue;
pub mod serve;

pub use dead_letter::DeadLetterCommand;
pub use queue::QueueCommand;
pub use serve::ServeCommand;
