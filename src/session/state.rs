use crate::error::SessionError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Initializing,
    Active,
    Switching,
    Error(SessionError),
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initializing => "initializing",
            SessionState::Active => "active",
            SessionState::Switching => "switching",
            SessionState::Error(_) => "error",
        }
    }

    /// Camera and detector are being (re)acquired.
    pub fn is_starting(&self) -> bool {
        matches!(self, SessionState::Initializing | SessionState::Switching)
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionState::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Readiness of the selected design's sprite, separate from camera readiness.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpriteStatus {
    Loading,
    Ready,
    Failed(SessionError),
}

/// What the surrounding UI should render.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionView<'a> {
    Starting,
    Live,
    Failed(&'a SessionError),
}

impl<'a> From<&'a SessionState> for SessionView<'a> {
    fn from(state: &'a SessionState) -> Self {
        match state {
            SessionState::Active => SessionView::Live,
            SessionState::Error(err) => SessionView::Failed(err),
            SessionState::Idle | SessionState::Initializing | SessionState::Switching => {
                SessionView::Starting
            }
        }
    }
}
