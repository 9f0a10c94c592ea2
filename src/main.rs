use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clouds_ai::bus::CommandBus;
use clouds_ai::chat::{ChatMessage, Chatbot, GeminiChat, GREETING};
use clouds_ai::config::Config;
use clouds_ai::consumers::{
    AccentStyling, AutoScrollController, FileStore, Landmark, LayoutProbe, MemoryHistory,
    MemoryStore, Rect, RootElement, RouterAdapter, ThemeController, ACCENT_PROPERTY,
};
use clouds_ai::types::Command;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "AI command bus for the Clouds Gadgets site")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one command, e.g. '{"event":"ai-navigate","detail":{"page":"contact"}}'
    Dispatch { json: String },
    /// Ask the product assistant questions, one line at a time
    Chat,
    /// Control the site by voice until Ctrl-C
    #[cfg(feature = "native")]
    Voice {
        /// Input device name, default device when omitted
        #[arg(long)]
        input_device: Option<String>,
        /// Output device name, default device when omitted
        #[arg(long)]
        output_device: Option<String>,
    },
    /// List microphones the voice command can use
    #[cfg(feature = "native")]
    Devices,
}

/// A page with no pinned or sticky sections.
struct StaticPage {
    viewport: f64,
    document: f64,
    scroll_y: f64,
}

impl LayoutProbe for StaticPage {
    fn viewport_height(&self) -> f64 {
        self.viewport
    }

    fn scroll_y(&self) -> f64 {
        self.scroll_y
    }

    fn document_height(&self) -> f64 {
        self.document
    }

    fn landmark(&self, _: Landmark) -> Option<Rect> {
        None
    }

    fn scroll_by(&mut self, dy: f64) {
        self.scroll_y = (self.scroll_y + dy).clamp(0.0, self.document - self.viewport);
    }
}

/// Every consumer wired to one bus, with in-memory surfaces.
struct Site {
    bus: CommandBus,
    history: MemoryHistory,
    root: RootElement,
    theme: ThemeController,
    scroll: AutoScrollController,
    _router: RouterAdapter,
    _accent: AccentStyling,
}

impl Site {
    fn attach(config: &Config) -> Result<Self> {
        let bus = CommandBus::new();
        let history = MemoryHistory::new();
        let root = RootElement::new();

        let theme = match config.theme_path() {
            Some(path) => {
                tracing::debug!("theme preference file: {}", path.display());
                let store = FileStore::open(&path).context("Failed to open theme preference file")?;
                ThemeController::attach(&bus, store, false, root.clone())?
            }
            None => ThemeController::attach(&bus, MemoryStore::default(), false, root.clone())?,
        };
        let page = StaticPage {
            viewport: 800.0,
            document: 4000.0,
            scroll_y: 0.0,
        };
        let scroll = AutoScrollController::attach(&bus, page, tokio::runtime::Handle::current());

        Ok(Self {
            _router: RouterAdapter::attach(&bus, history.clone()),
            _accent: AccentStyling::attach(&bus, root.clone()),
            bus,
            history,
            root,
            theme,
            scroll,
        })
    }

    fn describe(&self) -> String {
        format!(
            "route:       {}\ntheme:       {} ({})\naccent:      {}\nauto-scroll: {}",
            self.history.current(),
            self.theme.preference().label(),
            self.theme
                .effective()
                .map_or("unknown", |theme| theme.as_str()),
            self.root
                .style_property(ACCENT_PROPERTY)
                .unwrap_or_else(|| "default".to_string()),
            if self.scroll.is_running() { "running" } else { "stopped" },
        )
    }
}

fn dispatch(config: &Config, json: &str) -> Result<()> {
    let command: Command = serde_json::from_str(json).context("Failed to parse command")?;
    let site = Site::attach(config)?;
    let delivery = site.bus.publish(&command);
    println!(
        "{}: delivered={}, failed={}",
        command.kind(),
        delivery.delivered,
        delivery.failed
    );
    println!("{}", site.describe());
    Ok(())
}

/// Text of every model entry after the user's message at `from`.
fn reply_text(transcript: &[ChatMessage], from: usize) -> String {
    transcript
        .iter()
        .skip(from + 1)
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

async fn chat(config: &Config) -> Result<()> {
    let transport = GeminiChat::new(config.api_key()?.expose_secret(), &config.chat_model);
    let bot = Arc::new(Chatbot::new(transport));
    println!("{}", GREETING);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read from stdin")?
    {
        let from = bot.transcript().len();
        let mut updates = bot.subscribe();
        let mut printed = 0;
        let send = bot.send(&line);
        tokio::pin!(send);

        let mut print_new = |transcript: &[ChatMessage]| {
            let text = reply_text(transcript, from);
            if let Some(fresh) = text.get(printed..) {
                print!("{}", fresh);
            }
            printed = text.len();
        };

        loop {
            tokio::select! {
                _ = &mut send => break,
                Ok(()) = updates.changed() => print_new(&updates.borrow_and_update()),
            }
        }
        print_new(&bot.transcript());
        println!();
    }
    Ok(())
}

#[cfg(feature = "native")]
async fn voice(
    config: &Config,
    input_device: Option<String>,
    output_device: Option<String>,
) -> Result<()> {
    use clouds_ai::live::GeminiLive;
    use clouds_ai::voice::{site_setup, NativeAudio, VoiceAgent, VoiceState};

    let live = GeminiLive::new(config.live_config()?);
    let setup = site_setup(live.config());
    let site = Site::attach(config)?;
    let mut agent = VoiceAgent::new(
        site.bus.clone(),
        live,
        NativeAudio::new(input_device, output_device),
    )
    .with_setup(setup);

    let mut status = agent.subscribe();
    agent.start().await.context("Failed to start the voice agent")?;
    println!("Listening. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down...");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::info!("voice state: {:?}", current.state);
                if current.state == VoiceState::Idle {
                    if let Some(error) = current.error {
                        eprintln!("{}", error);
                    }
                    break;
                }
            }
        }
    }

    agent.stop().await;
    println!("{}", site.describe());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).context("Invalid RUST_LOG filter")?,
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();
    tracing::debug!("Configuration loaded: {:?}", config);

    match cli.command {
        Commands::Dispatch { json } => dispatch(&config, &json),
        Commands::Chat => chat(&config).await,
        #[cfg(feature = "native")]
        Commands::Voice {
            input_device,
            output_device,
        } => voice(&config, input_device, output_device).await,
        #[cfg(feature = "native")]
        Commands::Devices => {
            println!("{}", clouds_ai::utils::device::get_available_inputs()?);
            Ok(())
        }
    }
}
