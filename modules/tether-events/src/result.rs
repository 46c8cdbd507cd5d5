/// Outcome of delivering one event to one listener, or to a whole pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ListenerResult {
    /// Keep delivering to the remaining listeners.
    #[default]
    Propagate,
    /// Swallow the event; later listeners in this pass are skipped.
    Stop,
}

impl ListenerResult {
    pub fn is_stop(self) -> bool {
        self == ListenerResult::Stop
    }

    pub fn is_propagate(self) -> bool {
        self == ListenerResult::Propagate
    }
}

impl std::fmt::Display for ListenerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerResult::Propagate => f.write_str("propagate"),
            ListenerResult::Stop => f.write_str("stop"),
        }
    }
}
