//! Input Signals
//!
//! Classified input events arriving from the compositor thread and the
//! input stream state machine that decides whether user-visible
//! interaction looks imminent.

/// Classified input event kinds, as reported by the compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputEventKind {
    /// Synthetic kind used for input-driven compositor animation ticks
    Undefined,
    MouseDown,
    MouseUp,
    MouseMove,
    MouseEnter,
    MouseLeave,
    MouseWheel,
    KeyDown,
    KeyUp,
    Char,
    TouchStart,
    TouchMove,
    TouchEnd,
    TouchCancel,
    GestureScrollBegin,
    GestureScrollUpdate,
    GestureScrollEnd,
    GestureFlingStart,
    GestureFlingCancel,
    GestureTap,
    GestureTapDown,
    GestureShowPress,
    GesturePinchBegin,
    GesturePinchUpdate,
    GesturePinchEnd,
}

impl InputEventKind {
    /// True for pointer events other than the wheel. Wheel scrolling is
    /// real user input; plain pointer movement is not.
    pub fn is_mouse_kind(self) -> bool {
        matches!(
            self,
            Self::MouseDown | Self::MouseUp | Self::MouseMove | Self::MouseEnter | Self::MouseLeave
        )
    }

    pub fn is_keyboard_kind(self) -> bool {
        matches!(self, Self::KeyDown | Self::KeyUp | Self::Char)
    }
}

/// An input event as delivered to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    /// Classified kind
    pub kind: InputEventKind,
    /// Whether the left mouse button was held during the event
    pub left_button_down: bool,
}

impl InputEvent {
    /// Event with no modifier state
    pub fn new(kind: InputEventKind) -> Self {
        Self {
            kind,
            left_button_down: false,
        }
    }

    /// Mark the left mouse button as held
    pub fn with_left_button_down(mut self) -> Self {
        self.left_button_down = true;
        self
    }
}

/// Whether the recent input stream suggests imminent interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStreamState {
    /// No recent qualifying input
    Inactive,
    /// Input is flowing; compositor work should stay responsive
    Active,
    /// A touch sequence started and the page has not responded yet
    ActiveAwaitingTouchstartResponse,
}

impl InputStreamState {
    /// State name for logs and snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::ActiveAwaitingTouchstartResponse => "active_and_awaiting_touchstart_response",
        }
    }
}

/// Next stream state for a newly received input event.
///
/// Pure function of the current state, the new event kind and the kind
/// of the event before it. Consecutive touchmoves signal that the page
/// is already consuming the gesture, so the touchstart response no
/// longer needs prioritization. Meta gesture events carry no signal of
/// their own and leave the state untouched.
pub fn compute_stream_state(
    current: InputStreamState,
    new_kind: InputEventKind,
    last_kind: InputEventKind,
) -> InputStreamState {
    match new_kind {
        InputEventKind::TouchStart => {
            return InputStreamState::ActiveAwaitingTouchstartResponse;
        }

        InputEventKind::TouchMove => {
            if current == InputStreamState::ActiveAwaitingTouchstartResponse {
                return if last_kind == InputEventKind::TouchMove {
                    InputStreamState::Active
                } else {
                    InputStreamState::ActiveAwaitingTouchstartResponse
                };
            }
        }

        InputEventKind::GestureTapDown
        | InputEventKind::GestureShowPress
        | InputEventKind::GestureFlingCancel
        | InputEventKind::GestureScrollEnd => {
            return current;
        }

        _ => {}
    }
    InputStreamState::Active
}
