//! Commands broadcast from the AI integrations to the UI consumers.
//!
//! The serialized form mirrors the browser custom events the site dispatches:
//! `{"event": "ai-navigate", "detail": {"page": "/about"}}`.

use std::fmt;

/// `ai-navigate` payload. The page is a free-form alias, resolved by the router.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NavigateDetail {
    pub page: String,
}

/// `ai-change-theme` payload. Anything other than `light` or `dark` means "system".
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ThemeDetail {
    pub mode: String,
}

/// `ai-toggle-scroll` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScrollDetail {
    pub action: ScrollAction,
}

/// `ai-change-accent` payload. The color is a hex code or CSS color name and is never validated.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AccentDetail {
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum ScrollAction {
    Start,
    Stop,
}

impl From<String> for ScrollAction {
    fn from(value: String) -> Self {
        ScrollAction::from(value.as_str())
    }
}

impl From<&str> for ScrollAction {
    // Only an exact "start" starts the scroller.
    fn from(value: &str) -> Self {
        if value == "start" {
            ScrollAction::Start
        } else {
            ScrollAction::Stop
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "event", content = "detail")]
pub enum Command {
    #[serde(rename = "ai-navigate")]
    Navigate(NavigateDetail),
    #[serde(rename = "ai-change-theme")]
    ChangeTheme(ThemeDetail),
    #[serde(rename = "ai-toggle-scroll")]
    ToggleAutoScroll(ScrollDetail),
    #[serde(rename = "ai-change-accent")]
    SetAccentColor(AccentDetail),
}

impl Command {
    pub fn navigate(page: &str) -> Self {
        Command::Navigate(NavigateDetail {
            page: page.to_string(),
        })
    }

    pub fn change_theme(mode: &str) -> Self {
        Command::ChangeTheme(ThemeDetail {
            mode: mode.to_string(),
        })
    }

    pub fn toggle_auto_scroll(action: ScrollAction) -> Self {
        Command::ToggleAutoScroll(ScrollDetail { action })
    }

    pub fn set_accent_color(color: &str) -> Self {
        Command::SetAccentColor(AccentDetail {
            color: color.to_string(),
        })
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Navigate(_) => CommandKind::Navigate,
            Command::ChangeTheme(_) => CommandKind::ChangeTheme,
            Command::ToggleAutoScroll(_) => CommandKind::ToggleAutoScroll,
            Command::SetAccentColor(_) => CommandKind::SetAccentColor,
        }
    }
}

/// The event name a command travels under. Subscribers register per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Navigate,
    ChangeTheme,
    ToggleAutoScroll,
    SetAccentColor,
}

impl CommandKind {
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Navigate,
        CommandKind::ChangeTheme,
        CommandKind::ToggleAutoScroll,
        CommandKind::SetAccentColor,
    ];

    pub fn event_name(&self) -> &'static str {
        match self {
            CommandKind::Navigate => "ai-navigate",
            CommandKind::ChangeTheme => "ai-change-theme",
            CommandKind::ToggleAutoScroll => "ai-toggle-scroll",
            CommandKind::SetAccentColor => "ai-change-accent",
        }
    }

    pub fn from_event_name(name: &str) -> Option<Self> {
        CommandKind::ALL
            .into_iter()
            .find(|kind| kind.event_name() == name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_browser_event() {
        let json = serde_json::to_value(Command::navigate("about")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"event": "ai-navigate", "detail": {"page": "about"}})
        );
    }

    #[test]
    fn parses_accent_event_verbatim() {
        let command: Command = serde_json::from_str(
            r#"{"event": "ai-change-accent", "detail": {"color": "not a color"}}"#,
        )
        .unwrap();
        assert_eq!(command, Command::set_accent_color("not a color"));
        assert_eq!(command.kind(), CommandKind::SetAccentColor);
    }

    #[test]
    fn scroll_action_other_than_start_is_stop() {
        let command: Command = serde_json::from_str(
            r#"{"event": "ai-toggle-scroll", "detail": {"action": "pause"}}"#,
        )
        .unwrap();
        assert_eq!(command, Command::toggle_auto_scroll(ScrollAction::Stop));

        let start = serde_json::to_string(&ScrollDetail {
            action: ScrollAction::Start,
        })
        .unwrap();
        assert_eq!(start, r#"{"action":"start"}"#);
    }

    #[test]
    fn event_names_round_trip_through_kind() {
        for kind in CommandKind::ALL {
            assert_eq!(CommandKind::from_event_name(kind.event_name()), Some(kind));
        }
        assert_eq!(CommandKind::from_event_name("ai-unknown"), None);
    }
}
