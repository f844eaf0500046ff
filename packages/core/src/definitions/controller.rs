/// Network-management operations started via `begin_controller_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerCommand {
    AddDevice,
    RemoveDevice,
}

/// Progress of a controller command, reported through the callback the
/// application passed to `begin_controller_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Starting,
    /// Waiting for a user action on the device (e.g. pressing its button).
    Waiting,
    InProgress,
    Completed,
    Failed,
    Cancel,
}
