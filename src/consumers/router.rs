use crate::bus::{CommandBus, Subscription};
use crate::types::{Command, CommandKind};
use std::fmt;
use std::sync::{Arc, Mutex};

/// The five canonical pages of the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    About,
    Showcase,
    Offerings,
    Contact,
}

const ALIASES: &[(&str, Route)] = &[
    ("home", Route::Home),
    ("/", Route::Home),
    ("about", Route::About),
    ("/about", Route::About),
    ("showcase", Route::Showcase),
    ("products", Route::Showcase),
    ("/showcase", Route::Showcase),
    ("offerings", Route::Offerings),
    ("services", Route::Offerings),
    ("/offerings", Route::Offerings),
    ("contact", Route::Contact),
    ("/contact", Route::Contact),
];

impl Route {
    pub const ALL: [Route; 5] = [
        Route::Home,
        Route::About,
        Route::Showcase,
        Route::Offerings,
        Route::Contact,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::About => "/about",
            Route::Showcase => "/showcase",
            Route::Offerings => "/offerings",
            Route::Contact => "/contact",
        }
    }

    /// Resolves a free-form page name or path. Unknown input lands on Home.
    pub fn resolve(page: &str) -> Route {
        let page = page.to_lowercase();
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == page)
            .map(|(_, route)| *route)
            .unwrap_or(Route::Home)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Whatever actually changes the visible page.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: Route);
}

#[derive(Debug)]
struct HistoryState {
    visits: Vec<Route>,
    scroll_y: f64,
}

/// In-process history. Every navigation scrolls back to the top.
#[derive(Debug, Clone)]
pub struct MemoryHistory {
    state: Arc<Mutex<HistoryState>>,
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HistoryState {
                visits: vec![Route::Home],
                scroll_y: 0.0,
            })),
        }
    }

    pub fn current(&self) -> Route {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.visits.last().copied())
            .unwrap_or(Route::Home)
    }

    pub fn visits(&self) -> Vec<Route> {
        self.state
            .lock()
            .map(|s| s.visits.clone())
            .unwrap_or_default()
    }

    pub fn scroll_y(&self) -> f64 {
        self.state.lock().map(|s| s.scroll_y).unwrap_or_default()
    }

    pub fn set_scroll_y(&self, y: f64) {
        if let Ok(mut state) = self.state.lock() {
            state.scroll_y = y;
        }
    }
}

impl Navigator for MemoryHistory {
    fn navigate(&self, route: Route) {
        if let Ok(mut state) = self.state.lock() {
            state.visits.push(route);
            state.scroll_y = 0.0;
        }
    }
}

/// Turns `ai-navigate` commands into navigations.
pub struct RouterAdapter {
    _subscription: Subscription,
}

impl RouterAdapter {
    pub fn attach<N: Navigator + 'static>(bus: &CommandBus, navigator: N) -> Self {
        let subscription = bus.subscribe(CommandKind::Navigate, move |command| {
            if let Command::Navigate(detail) = command {
                let route = Route::resolve(&detail.page);
                tracing::info!("AI navigating to {} (requested {:?})", route, detail.page);
                navigator.navigate(route);
            }
            Ok(())
        });
        Self {
            _subscription: subscription,
        }
    }
}
