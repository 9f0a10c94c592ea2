//! UI-side reactions to commands. Each consumer owns its state and only
//! listens to the command kind it cares about.

pub mod accent;
pub mod autoscroll;
pub mod router;
pub mod theme;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

pub use accent::{AccentStyling, StyleSheet, ACCENT_PROPERTY};
pub use autoscroll::{AutoScroll, AutoScrollController, Landmark, LayoutProbe, Rect, Section, Tick};
pub use router::{MemoryHistory, Navigator, Route, RouterAdapter};
pub use theme::{
    ColorScheme, EffectiveTheme, FileStore, MemoryStore, PreferenceStore, ThemeController,
    ThemePreference, ThemeSurface,
};

#[derive(Debug, Default)]
struct RootState {
    attributes: BTreeMap<String, String>,
    classes: BTreeSet<String>,
    style: BTreeMap<String, String>,
}

/// In-memory stand-in for the document root: attributes, class list and inline style.
#[derive(Debug, Clone, Default)]
pub struct RootElement {
    state: Arc<Mutex<RootState>>,
}

impl RootElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(&self, name: &str) -> Option<String> {
        self.state.lock().ok()?.attributes.get(name).cloned()
    }

    pub fn set_attribute(&self, name: &str, value: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.attributes.insert(name.to_string(), value.to_string());
        }
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.classes.contains(class))
            .unwrap_or(false)
    }

    pub fn toggle_class(&self, class: &str, on: bool) {
        if let Ok(mut state) = self.state.lock() {
            if on {
                state.classes.insert(class.to_string());
            } else {
                state.classes.remove(class);
            }
        }
    }

    pub fn style_property(&self, name: &str) -> Option<String> {
        self.state.lock().ok()?.style.get(name).cloned()
    }
}

impl StyleSheet for RootElement {
    fn set_property(&self, name: &str, value: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.style.insert(name.to_string(), value.to_string());
        }
    }
}

impl ThemeSurface for RootElement {
    fn apply(&self, theme: EffectiveTheme) {
        self.set_attribute("data-theme", theme.as_str());
        self.toggle_class("dark", theme == EffectiveTheme::Dark);
    }
}
