//! Per-resource load state machine.

/// Lifecycle state of a cached texture resource.
///
/// Plain loads move `NotStarted -> Loading -> {Uploaded | LoadFinished |
/// LoadFailed}`. Masked loads pass through `WaitingForMask`, `MaskApplying`
/// and `MaskApplied` before `Uploaded`. Dropping the last reference while
/// background work is in flight parks the entry in `Cancelled` or
/// `MaskCancelled` until the completion arrives and is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// No load attempt has been made yet.
    #[default]
    NotStarted,
    /// A decode is in flight on the worker pool.
    Loading,
    /// Pixels are decoded and kept CPU-side (terminal for buffer storage).
    LoadFinished,
    /// Decoded, waiting for the alpha mask to finish loading.
    WaitingForMask,
    /// A mask blend is in flight on the worker pool.
    MaskApplying,
    /// The mask blend finished; upload is imminent.
    MaskApplied,
    /// Uploaded to the GPU (terminal for texture storage).
    Uploaded,
    /// Last reference dropped mid-load; result will be discarded.
    Cancelled,
    /// Last reference dropped mid-mask-blend; result will be discarded.
    MaskCancelled,
    /// The load attempt failed.
    LoadFailed,
}

impl LoadState {
    /// True for states with background work still in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Loading | Self::WaitingForMask | Self::MaskApplying | Self::MaskApplied
        )
    }

    /// True for the cancelled pair.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::MaskCancelled)
    }

    /// True once a load attempt produced usable pixels.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, Self::Uploaded | Self::LoadFinished)
    }
}

impl std::fmt::Display for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "NotStarted",
            Self::Loading => "Loading",
            Self::LoadFinished => "LoadFinished",
            Self::WaitingForMask => "WaitingForMask",
            Self::MaskApplying => "MaskApplying",
            Self::MaskApplied => "MaskApplied",
            Self::Uploaded => "Uploaded",
            Self::Cancelled => "Cancelled",
            Self::MaskCancelled => "MaskCancelled",
            Self::LoadFailed => "LoadFailed",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_states() {
        assert!(LoadState::Loading.is_in_flight());
        assert!(LoadState::WaitingForMask.is_in_flight());
        assert!(LoadState::MaskApplying.is_in_flight());
        assert!(LoadState::MaskApplied.is_in_flight());
        assert!(!LoadState::NotStarted.is_in_flight());
        assert!(!LoadState::Uploaded.is_in_flight());
        assert!(!LoadState::Cancelled.is_in_flight());
    }

    #[test]
    fn test_cancelled_states() {
        assert!(LoadState::Cancelled.is_cancelled());
        assert!(LoadState::MaskCancelled.is_cancelled());
        assert!(!LoadState::Loading.is_cancelled());
    }

    #[test]
    fn test_terminal_success_states() {
        assert!(LoadState::Uploaded.is_terminal_success());
        assert!(LoadState::LoadFinished.is_terminal_success());
        assert!(!LoadState::LoadFailed.is_terminal_success());
        assert!(!LoadState::Loading.is_terminal_success());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", LoadState::WaitingForMask), "WaitingForMask");
        assert_eq!(format!("{}", LoadState::Uploaded), "Uploaded");
    }

    #[test]
    fn test_default_is_not_started() {
        assert_eq!(LoadState::default(), LoadState::NotStarted);
    }
}
