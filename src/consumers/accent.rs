use crate::bus::{CommandBus, Subscription};
use crate::types::{Command, CommandKind};

/// The global style variable holding the accent color.
pub const ACCENT_PROPERTY: &str = "--accent";

pub trait StyleSheet: Send + Sync {
    fn set_property(&self, name: &str, value: &str);
}

/// Writes `ai-change-accent` colors straight into the accent variable.
///
/// Values are not validated; a malformed color simply renders wrong.
pub struct AccentStyling {
    _subscription: Subscription,
}

impl AccentStyling {
    pub fn attach<S: StyleSheet + 'static>(bus: &CommandBus, style: S) -> Self {
        let subscription = bus.subscribe(CommandKind::SetAccentColor, move |command| {
            if let Command::SetAccentColor(detail) = command {
                tracing::info!("AI setting accent color to {:?}", detail.color);
                style.set_property(ACCENT_PROPERTY, &detail.color);
            }
            Ok(())
        });
        Self {
            _subscription: subscription,
        }
    }
}
