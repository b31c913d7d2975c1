pub mod profiling;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ShutdownMessage {
    // only use in initialize.
    Init,
    Drain(String),
}

impl ShutdownMessage {
    pub fn is_drain(&self) -> bool {
        matches!(self, ShutdownMessage::Drain(_))
    }
}
