//! Remote actions, device operations, and capability tables.
//!
//! Clients speak in [`RemoteAction`]s: the fixed set of buttons a remote
//! exposes.  Sessions execute [`RemoteOperation`]s.  The mapping between the
//! two is static, and so is the table of which operations a given protocol
//! can carry ([`Capabilities`]).  Nothing here probes a device at runtime.
//!
//! ```text
//! "tv" ──parse──► RemoteAction::Tv ──operation()──► RemoteOperation::Home
//!                                                        │
//!                              Capabilities::supports ◄──┘
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::device::Protocol;
use crate::error::RemoteError;

/// A button press requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteAction {
    Up,
    Down,
    Left,
    Right,
    Select,
    Menu,
    Home,
    TopMenu,
    /// The TV button; an alias for [`RemoteAction::Home`].
    Tv,
    Play,
    Pause,
    PlayPause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
}

impl RemoteAction {
    /// Every action, in the order clients usually list them.
    pub const ALL: [RemoteAction; 16] = [
        RemoteAction::Up,
        RemoteAction::Down,
        RemoteAction::Left,
        RemoteAction::Right,
        RemoteAction::Select,
        RemoteAction::Menu,
        RemoteAction::Home,
        RemoteAction::TopMenu,
        RemoteAction::Tv,
        RemoteAction::Play,
        RemoteAction::Pause,
        RemoteAction::PlayPause,
        RemoteAction::Next,
        RemoteAction::Previous,
        RemoteAction::VolumeUp,
        RemoteAction::VolumeDown,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RemoteAction::Up => "up",
            RemoteAction::Down => "down",
            RemoteAction::Left => "left",
            RemoteAction::Right => "right",
            RemoteAction::Select => "select",
            RemoteAction::Menu => "menu",
            RemoteAction::Home => "home",
            RemoteAction::TopMenu => "top_menu",
            RemoteAction::Tv => "tv",
            RemoteAction::Play => "play",
            RemoteAction::Pause => "pause",
            RemoteAction::PlayPause => "play_pause",
            RemoteAction::Next => "next",
            RemoteAction::Previous => "previous",
            RemoteAction::VolumeUp => "volume_up",
            RemoteAction::VolumeDown => "volume_down",
        }
    }

    /// The single device operation this action invokes.
    pub fn operation(self) -> RemoteOperation {
        match self {
            RemoteAction::Up => RemoteOperation::Up,
            RemoteAction::Down => RemoteOperation::Down,
            RemoteAction::Left => RemoteOperation::Left,
            RemoteAction::Right => RemoteOperation::Right,
            RemoteAction::Select => RemoteOperation::Select,
            RemoteAction::Menu => RemoteOperation::Menu,
            RemoteAction::Home | RemoteAction::Tv => RemoteOperation::Home,
            RemoteAction::TopMenu => RemoteOperation::TopMenu,
            RemoteAction::Play => RemoteOperation::Play,
            RemoteAction::Pause => RemoteOperation::Pause,
            RemoteAction::PlayPause => RemoteOperation::PlayPause,
            RemoteAction::Next => RemoteOperation::Next,
            RemoteAction::Previous => RemoteOperation::Previous,
            RemoteAction::VolumeUp => RemoteOperation::VolumeUp,
            RemoteAction::VolumeDown => RemoteOperation::VolumeDown,
        }
    }
}

impl fmt::Display for RemoteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteAction {
    type Err = RemoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RemoteAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| RemoteError::UnknownAction(s.to_string()))
    }
}

/// An operation a device session can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RemoteOperation {
    Up,
    Down,
    Left,
    Right,
    Select,
    Menu,
    Home,
    TopMenu,
    Play,
    Pause,
    PlayPause,
    Next,
    Previous,
    VolumeUp,
    VolumeDown,
}

impl RemoteOperation {
    pub const ALL: [RemoteOperation; 15] = [
        RemoteOperation::Up,
        RemoteOperation::Down,
        RemoteOperation::Left,
        RemoteOperation::Right,
        RemoteOperation::Select,
        RemoteOperation::Menu,
        RemoteOperation::Home,
        RemoteOperation::TopMenu,
        RemoteOperation::Play,
        RemoteOperation::Pause,
        RemoteOperation::PlayPause,
        RemoteOperation::Next,
        RemoteOperation::Previous,
        RemoteOperation::VolumeUp,
        RemoteOperation::VolumeDown,
    ];

    /// Command name understood by the device tooling.
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteOperation::Up => "up",
            RemoteOperation::Down => "down",
            RemoteOperation::Left => "left",
            RemoteOperation::Right => "right",
            RemoteOperation::Select => "select",
            RemoteOperation::Menu => "menu",
            RemoteOperation::Home => "home",
            RemoteOperation::TopMenu => "top_menu",
            RemoteOperation::Play => "play",
            RemoteOperation::Pause => "pause",
            RemoteOperation::PlayPause => "play_pause",
            RemoteOperation::Next => "next",
            RemoteOperation::Previous => "previous",
            RemoteOperation::VolumeUp => "volume_up",
            RemoteOperation::VolumeDown => "volume_down",
        }
    }

    /// The substitute tried once when this operation is rejected.
    ///
    /// Devices that refuse the combined play/pause toggle usually accept a
    /// plain play, and devices without a context menu accept top-menu.
    pub fn fallback(self) -> Option<RemoteOperation> {
        match self {
            RemoteOperation::PlayPause => Some(RemoteOperation::Play),
            RemoteOperation::Menu => Some(RemoteOperation::TopMenu),
            _ => None,
        }
    }
}

impl fmt::Display for RemoteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of operations a session variant can carry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capabilities {
    operations: BTreeSet<RemoteOperation>,
}

impl Capabilities {
    /// A session that accepts every operation.
    pub fn full() -> Self {
        Self::from_operations(RemoteOperation::ALL)
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: impl IntoIterator<Item = RemoteOperation>) -> Self {
        Self {
            operations: operations.into_iter().collect(),
        }
    }

    /// Static capability table for a single protocol.
    pub fn for_protocol(protocol: Protocol) -> Self {
        use RemoteOperation as Op;
        match protocol {
            // MRP is tunnelled over AirPlay on current devices.
            Protocol::Mrp | Protocol::AirPlay => Self::full(),
            Protocol::Companion => {
                Self::from_operations(Op::ALL.into_iter().filter(|op| *op != Op::TopMenu))
            }
            Protocol::Dmap => Self::from_operations(
                Op::ALL
                    .into_iter()
                    .filter(|op| !matches!(op, Op::Home | Op::VolumeUp | Op::VolumeDown)),
            ),
            Protocol::Raop => {
                Self::from_operations([Op::Play, Op::Pause, Op::VolumeUp, Op::VolumeDown])
            }
        }
    }

    /// Union of the tables of every protocol a session has open.
    pub fn for_protocols(protocols: impl IntoIterator<Item = Protocol>) -> Self {
        let mut caps = Self::none();
        for protocol in protocols {
            caps.operations.extend(Self::for_protocol(protocol).operations);
        }
        caps
    }

    pub fn supports(&self, operation: RemoteOperation) -> bool {
        self.operations.contains(&operation)
    }

    /// Actions whose operation is admitted by this table.
    pub fn supported_actions(&self) -> Vec<RemoteAction> {
        RemoteAction::ALL
            .into_iter()
            .filter(|action| self.supports(action.operation()))
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_action_round_trips_through_its_name() {
        for action in RemoteAction::ALL {
            assert_eq!(action.as_str().parse::<RemoteAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_unknown_action_name_is_rejected() {
        let result = "eject".parse::<RemoteAction>();
        assert_eq!(result, Err(RemoteError::UnknownAction("eject".to_string())));
    }

    #[test]
    fn test_tv_maps_to_home_operation() {
        assert_eq!(RemoteAction::Tv.operation(), RemoteOperation::Home);
        assert_eq!(RemoteAction::Home.operation(), RemoteOperation::Home);
    }

    #[test]
    fn test_action_serde_name_matches_as_str() {
        let json = serde_json::to_string(&RemoteAction::PlayPause).unwrap();
        assert_eq!(json, "\"play_pause\"");
        let action: RemoteAction = serde_json::from_str("\"volume_down\"").unwrap();
        assert_eq!(action, RemoteAction::VolumeDown);
    }

    #[test]
    fn test_fallback_table_only_covers_play_pause_and_menu() {
        assert_eq!(RemoteOperation::PlayPause.fallback(), Some(RemoteOperation::Play));
        assert_eq!(RemoteOperation::Menu.fallback(), Some(RemoteOperation::TopMenu));

        let others = RemoteOperation::ALL
            .into_iter()
            .filter(|op| !matches!(op, RemoteOperation::PlayPause | RemoteOperation::Menu));
        for op in others {
            assert_eq!(op.fallback(), None, "{op} must have no fallback");
        }
    }

    #[test]
    fn test_mrp_supports_every_operation() {
        let caps = Capabilities::for_protocol(Protocol::Mrp);
        assert!(RemoteOperation::ALL.into_iter().all(|op| caps.supports(op)));
    }

    #[test]
    fn test_companion_lacks_top_menu() {
        let caps = Capabilities::for_protocol(Protocol::Companion);
        assert!(!caps.supports(RemoteOperation::TopMenu));
        assert!(caps.supports(RemoteOperation::Menu));
        assert!(caps.supports(RemoteOperation::VolumeUp));
    }

    #[test]
    fn test_airplay_carries_the_mrp_operations() {
        let caps = Capabilities::for_protocol(Protocol::AirPlay);
        assert_eq!(caps, Capabilities::for_protocol(Protocol::Mrp));
        assert_eq!(caps.supported_actions().len(), RemoteAction::ALL.len());
    }

    #[test]
    fn test_capabilities_union_combines_protocol_tables() {
        let caps = Capabilities::for_protocols([Protocol::Companion, Protocol::Raop]);
        assert!(caps.supports(RemoteOperation::Select));
        assert!(!caps.supports(RemoteOperation::TopMenu));

        let caps = Capabilities::for_protocols([Protocol::Companion, Protocol::Mrp]);
        assert!(caps.supports(RemoteOperation::TopMenu));
    }

    #[test]
    fn test_supported_actions_includes_tv_alias_when_home_supported() {
        let caps = Capabilities::from_operations([RemoteOperation::Home]);
        let actions = caps.supported_actions();
        assert_eq!(actions, vec![RemoteAction::Home, RemoteAction::Tv]);
    }
}
