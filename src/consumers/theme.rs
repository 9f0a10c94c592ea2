use crate::bus::{CommandBus, Subscription};
use crate::types::{Command, CommandKind};
use anyhow::Context;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Storage key of the persisted preference. Absent means "system".
pub const THEME_KEY: &str = "theme";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThemePreference {
    #[default]
    System,
    Dark,
    Light,
}

impl ThemePreference {
    /// Next state of the toggle button: system, dark, light, then back to system.
    pub fn cycle(self) -> Self {
        match self {
            ThemePreference::System => ThemePreference::Dark,
            ThemePreference::Dark => ThemePreference::Light,
            ThemePreference::Light => ThemePreference::System,
        }
    }

    /// Interprets an `ai-change-theme` mode. Anything unrecognized means system.
    pub fn from_mode(mode: &str) -> Self {
        match mode {
            "dark" => ThemePreference::Dark,
            "light" => ThemePreference::Light,
            _ => ThemePreference::System,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThemePreference::System => "system",
            ThemePreference::Dark => "dark",
            ThemePreference::Light => "light",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ThemePreference::System => "System",
            ThemePreference::Dark => "Dark",
            ThemePreference::Light => "Light",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveTheme {
    Dark,
    Light,
}

impl EffectiveTheme {
    pub fn from_dark(dark: bool) -> Self {
        if dark {
            EffectiveTheme::Dark
        } else {
            EffectiveTheme::Light
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveTheme::Dark => "dark",
            EffectiveTheme::Light => "light",
        }
    }
}

/// Key-value persistence for user preferences.
pub trait PreferenceStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&mut self, key: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, String>,
}

impl MemoryStore {
    pub fn with(key: &str, value: &str) -> Self {
        let mut values = HashMap::new();
        values.insert(key.to_string(), value.to_string());
        Self { values }
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        self.values.remove(key);
        Ok(())
    }
}

/// Preferences kept as a JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FileStore {
    /// Opens (or lazily creates) the store at `path`. A corrupt file is treated as empty.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("ignoring unreadable preferences at {:?}: {}", path, e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read preferences {:?}", path));
            }
        };
        Ok(Self { path, values })
    }

    /// `<config dir>/clouds-ai/preferences.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("clouds-ai").join("preferences.json"))
    }

    fn flush(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {:?}", parent))?;
        }
        let text = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("failed to write preferences {:?}", self.path))
    }
}

impl PreferenceStore for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&mut self, key: &str) -> anyhow::Result<()> {
        if self.values.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }
}

/// The operating system's light/dark signal.
pub trait ColorScheme: Send + Sync {
    fn prefers_dark(&self) -> bool;
}

impl ColorScheme for bool {
    fn prefers_dark(&self) -> bool {
        *self
    }
}

/// Where the effective theme is rendered.
pub trait ThemeSurface: Send + Sync {
    fn apply(&self, theme: EffectiveTheme);
}

struct ThemeState {
    preference: ThemePreference,
    effective: EffectiveTheme,
    store: Box<dyn PreferenceStore>,
    scheme: Box<dyn ColorScheme>,
    surface: Box<dyn ThemeSurface>,
}

impl ThemeState {
    fn set_preference(&mut self, preference: ThemePreference) -> anyhow::Result<()> {
        self.preference = preference;
        let persisted = match preference {
            ThemePreference::System => {
                self.render(EffectiveTheme::from_dark(self.scheme.prefers_dark()));
                self.store.remove(THEME_KEY)
            }
            ThemePreference::Dark => {
                self.render(EffectiveTheme::Dark);
                self.store.set(THEME_KEY, preference.as_str())
            }
            ThemePreference::Light => {
                self.render(EffectiveTheme::Light);
                self.store.set(THEME_KEY, preference.as_str())
            }
        };
        persisted.context("failed to persist theme preference")
    }

    fn render(&mut self, theme: EffectiveTheme) {
        self.effective = theme;
        self.surface.apply(theme);
    }
}

/// Owns the theme preference: restores it at startup, follows the OS while
/// set to system, and reacts to `ai-change-theme`.
pub struct ThemeController {
    state: Arc<Mutex<ThemeState>>,
    _subscription: Subscription,
}

impl ThemeController {
    pub fn attach(
        bus: &CommandBus,
        store: impl PreferenceStore + 'static,
        scheme: impl ColorScheme + 'static,
        surface: impl ThemeSurface + 'static,
    ) -> anyhow::Result<Self> {
        let stored = store.get(THEME_KEY);
        let preference = match stored.as_deref() {
            Some("dark") => ThemePreference::Dark,
            Some("light") => ThemePreference::Light,
            _ => ThemePreference::System,
        };
        let mut state = ThemeState {
            preference,
            effective: EffectiveTheme::Light,
            store: Box::new(store),
            scheme: Box::new(scheme),
            surface: Box::new(surface),
        };
        state.set_preference(preference)?;
        tracing::debug!("restored theme preference {:?}", preference);

        let state = Arc::new(Mutex::new(state));
        let handler_state = state.clone();
        let subscription = bus.subscribe(CommandKind::ChangeTheme, move |command| {
            let Command::ChangeTheme(detail) = command else {
                return Ok(());
            };
            let preference = ThemePreference::from_mode(&detail.mode);
            tracing::info!("AI changing theme to {:?} (mode {:?})", preference, detail.mode);
            let mut state = handler_state
                .lock()
                .map_err(|_| anyhow::anyhow!("theme state poisoned"))?;
            state.set_preference(preference)
        });

        Ok(Self {
            state,
            _subscription: subscription,
        })
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ThemeState) -> T) -> anyhow::Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("theme state poisoned"))?;
        Ok(f(&mut state))
    }

    pub fn preference(&self) -> ThemePreference {
        self.with_state(|s| s.preference).unwrap_or_default()
    }

    pub fn effective(&self) -> Option<EffectiveTheme> {
        self.with_state(|s| s.effective).ok()
    }

    pub fn set_preference(&self, preference: ThemePreference) -> anyhow::Result<()> {
        self.with_state(|s| s.set_preference(preference))?
    }

    /// The toggle button: advance to the next preference.
    pub fn cycle(&self) -> anyhow::Result<ThemePreference> {
        self.with_state(|s| {
            let next = s.preference.cycle();
            s.set_preference(next).map(|_| next)
        })?
    }

    /// OS color-scheme change notification; only followed while on system.
    pub fn os_scheme_changed(&self, prefers_dark: bool) {
        let _ = self.with_state(|s| {
            if s.preference == ThemePreference::System {
                tracing::debug!("following OS color scheme, dark={}", prefers_dark);
                s.render(EffectiveTheme::from_dark(prefers_dark));
            }
        });
    }
}
