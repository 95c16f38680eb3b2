use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::backend::{Backend, LocalStore, RestBackend};
use crate::browse::EventBrowser;
use crate::chat::ChatRoom;
use crate::config::{AppConfig, ConfigStore};
use crate::feed::Feed;
use crate::models::{Category, EventDraft};
use crate::notify::Notifier;
use crate::organizer::{self, EventWindow, OrganizerDashboard};
use crate::profile::ProfileEditor;
use crate::rsvp::{RsvpCard, ToggleOutcome};
use crate::session::Session;

#[derive(Debug, Parser)]
#[command(name = "event-feed", author, version, about = "Discover local events, RSVP and chat with other attendees")]
pub struct Cli {
    /// Config file to use instead of the per-user default.
    #[arg(long, global = true, env = "EVENT_FEED_CONFIG")]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upcoming events matched to your interests.
    Feed {
        #[arg(long)]
        search: Option<String>,
        /// Toggle a category filter; repeatable.
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Ignore interests and list every upcoming event.
        #[arg(long)]
        all: bool,
    },
    /// Every event, filtered server-side.
    Browse {
        #[arg(long)]
        category: Option<String>,
        /// Calendar day, YYYY-MM-DD.
        #[arg(long)]
        day: Option<NaiveDate>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Toggle your RSVP for an event.
    Rsvp { event_id: String },
    /// Show an event's chat, optionally posting first.
    Chat {
        event_id: String,
        #[arg(long)]
        send: Option<String>,
    },
    /// Your events with RSVP and message counts.
    Organizer {
        #[arg(long, value_enum, default_value_t = EventWindow::All)]
        window: EventWindow,
        #[arg(long)]
        search: Option<String>,
        /// Also print RSVPs per day for this event.
        #[arg(long)]
        rsvps: Option<String>,
        /// Delete this event.
        #[arg(long)]
        delete: Option<String>,
    },
    /// Create an event, or edit one with --edit.
    Create {
        #[arg(long)]
        edit: Option<String>,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        category: String,
        /// Start time, RFC 3339.
        #[arg(long)]
        at: DateTime<Utc>,
        #[arg(long)]
        location: String,
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
    },
    /// Show or edit your profile.
    Profile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        bio: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long = "add-interest")]
        add_interests: Vec<String>,
        #[arg(long = "remove-interest")]
        remove_interests: Vec<String>,
    },
    /// Show or update the stored configuration.
    Config {
        #[arg(long)]
        backend_url: Option<String>,
        #[arg(long)]
        anon_key: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}

/// What every command runs against.
pub struct Context {
    pub config: AppConfig,
    pub backend: Arc<dyn Backend>,
    pub session: Option<Session>,
    pub notifier: Notifier,
}

impl Context {
    pub fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let config = config_store(config_path).read().with_env_overrides();
        let backend = open_backend(&config)?;
        let session = Session::from_config(&config);
        Ok(Self {
            config,
            backend,
            session,
            notifier: Notifier::new(),
        })
    }

    fn debounce(&self) -> Duration {
        Duration::from_millis(self.config.debounce_ms)
    }
}

fn config_store(path: Option<PathBuf>) -> ConfigStore {
    match path {
        Some(path) => ConfigStore::load_from(path),
        None => ConfigStore::load(),
    }
}

pub fn open_backend(config: &AppConfig) -> Result<Arc<dyn Backend>> {
    match config.remote()? {
        Some(settings) => {
            tracing::info!(url = %settings.base_url, "using hosted backend");
            Ok(Arc::new(RestBackend::new(settings)?))
        }
        None => {
            let path = config.database_path();
            tracing::info!(path = %path.display(), "using local store");
            Ok(Arc::new(LocalStore::open(&path)?))
        }
    }
}

pub async fn execute(cli: Cli) -> Result<()> {
    if let Command::Config {
        backend_url,
        anon_key,
        user_id,
        display_name,
        debounce_ms,
    } = cli.command
    {
        return configure(cli.config, backend_url, anon_key, user_id, display_name, debounce_ms);
    }

    let ctx = Context::open(cli.config)?;
    let outcome = match cli.command {
        Command::Feed {
            search,
            categories,
            all,
        } => feed(&ctx, search, categories, all).await,
        Command::Browse {
            category,
            day,
            search,
        } => browse(&ctx, category, day, search).await,
        Command::Rsvp { event_id } => rsvp(&ctx, &event_id).await,
        Command::Chat { event_id, send } => chat(&ctx, &event_id, send).await,
        Command::Organizer {
            window,
            search,
            rsvps,
            delete,
        } => organizer_dashboard(&ctx, window, search, rsvps, delete).await,
        Command::Create {
            edit,
            title,
            description,
            category,
            at,
            location,
            lat,
            lon,
        } => {
            let draft = EventDraft {
                title,
                description,
                category: parse_category(&category)?,
                datetime: at,
                location_name: location,
                latitude: lat,
                longitude: lon,
            };
            save_event(&ctx, edit, draft).await
        }
        Command::Profile {
            name,
            bio,
            location,
            add_interests,
            remove_interests,
        } => profile(&ctx, name, bio, location, add_interests, remove_interests).await,
        Command::Config { .. } => Ok(()),
    };

    for toast in ctx.notifier.drain() {
        eprintln!("[{:?}] {}", toast.kind, toast.message);
    }
    outcome
}

fn configure(
    config_path: Option<PathBuf>,
    backend_url: Option<String>,
    anon_key: Option<String>,
    user_id: Option<String>,
    display_name: Option<String>,
    debounce_ms: Option<u64>,
) -> Result<()> {
    let store = config_store(config_path);
    let changed = backend_url.is_some()
        || anon_key.is_some()
        || user_id.is_some()
        || display_name.is_some()
        || debounce_ms.is_some();
    let config = if changed {
        store.update(|config| {
            if let Some(url) = backend_url {
                config.backend_url = Some(url).filter(|url| !url.trim().is_empty());
            }
            if let Some(key) = anon_key {
                config.anon_key = Some(key);
            }
            if let Some(user_id) = user_id {
                config.user_id = Some(user_id);
            }
            if let Some(name) = display_name {
                config.display_name = Some(name);
            }
            if let Some(ms) = debounce_ms {
                config.debounce_ms = ms;
            }
        })?
    } else {
        store.read()
    };
    config.remote()?;

    let mut shown = config;
    if shown.anon_key.is_some() {
        shown.anon_key = Some("<redacted>".into());
    }
    if shown.access_token.is_some() {
        shown.access_token = Some("<redacted>".into());
    }
    println!("# {}", store.path().display());
    print_json(&shown)
}

async fn feed(
    ctx: &Context,
    search: Option<String>,
    categories: Vec<String>,
    all: bool,
) -> Result<()> {
    let mut feed = Feed::new(Arc::clone(&ctx.backend), ctx.session.clone(), ctx.debounce());
    feed.load().await.map_err(sign_in_hint)?;
    if all {
        feed.toggle_show_all().await;
    }
    for name in &categories {
        if !feed.toggle_category(name) {
            bail!("unknown category {name:?}");
        }
    }
    if let Some(text) = search {
        feed.set_search(&text);
        feed.settle().await;
    }
    print_json(&feed.view())
}

async fn browse(
    ctx: &Context,
    category: Option<String>,
    day: Option<NaiveDate>,
    search: Option<String>,
) -> Result<()> {
    let mut browser = EventBrowser::new(Arc::clone(&ctx.backend));
    let category = category.as_deref().map(parse_category).transpose()?;
    browser.set_category(category).await;
    browser.set_day(day).await;
    browser.set_search(search.as_deref().unwrap_or_default()).await;
    if let Some(message) = browser.error() {
        bail!("{message}");
    }
    print_json(&browser.events())
}

async fn rsvp(ctx: &Context, event_id: &str) -> Result<()> {
    let event = ctx.backend.get_event(event_id).await?;
    let card = RsvpCard::new(
        event,
        ctx.session.clone(),
        Arc::clone(&ctx.backend),
        ctx.notifier.clone(),
    );
    card.mount().await;
    let outcome = card.toggle().await.map_err(sign_in_hint)?;
    tracing::debug!(?outcome, "rsvp toggled");
    if matches!(outcome, ToggleOutcome::Joined | ToggleOutcome::Left) {
        card.next_change().await;
    }
    let view = card.view();
    card.unmount().await;
    print_json(&view)
}

async fn chat(ctx: &Context, event_id: &str, send: Option<String>) -> Result<()> {
    let mut room = ChatRoom::open(Arc::clone(&ctx.backend), ctx.session.as_ref(), event_id)
        .await
        .map_err(sign_in_hint)?;
    if let Some(text) = send {
        if room.send(&text).await?.is_some() {
            room.next_message().await;
        }
    }
    print_json(&room.messages())
}

async fn organizer_dashboard(
    ctx: &Context,
    window: EventWindow,
    search: Option<String>,
    rsvps: Option<String>,
    delete: Option<String>,
) -> Result<()> {
    let mut dashboard = OrganizerDashboard::load(
        Arc::clone(&ctx.backend),
        ctx.session.as_ref(),
        ctx.notifier.clone(),
        window,
    )
    .await
    .map_err(sign_in_hint)?;
    if let Some(event_id) = delete {
        dashboard.delete(&event_id).await?;
    }
    if let Some(text) = search {
        dashboard.search(&text);
    }
    if dashboard.events().is_empty() {
        println!("You haven't created any events yet");
        return Ok(());
    }
    print_json(&dashboard.visible())?;
    if let Some(event_id) = rsvps {
        let days = organizer::rsvps_by_day(ctx.backend.as_ref(), &event_id).await?;
        print_json(&days)?;
    }
    Ok(())
}

async fn save_event(ctx: &Context, edit: Option<String>, draft: EventDraft) -> Result<()> {
    let session = ctx.session.as_ref();
    let saved = match edit {
        Some(event_id) => {
            organizer::update_event(ctx.backend.as_ref(), session, &ctx.notifier, &event_id, &draft).await
        }
        None => organizer::create_event(ctx.backend.as_ref(), session, &ctx.notifier, &draft).await,
    };
    print_json(&saved.map_err(sign_in_hint)?)
}

async fn profile(
    ctx: &Context,
    name: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    add_interests: Vec<String>,
    remove_interests: Vec<String>,
) -> Result<()> {
    let mut editor = ProfileEditor::load(Arc::clone(&ctx.backend), ctx.session.as_ref())
        .await
        .map_err(sign_in_hint)?;
    let changed = name.is_some()
        || bio.is_some()
        || location.is_some()
        || !add_interests.is_empty()
        || !remove_interests.is_empty();
    if let Some(name) = name {
        editor.set_full_name(&name);
    }
    if let Some(bio) = bio {
        editor.set_bio(&bio);
    }
    if let Some(location) = location {
        editor.set_location(&location);
    }
    for tag in &add_interests {
        editor.add_interest(tag);
    }
    for tag in &remove_interests {
        editor.remove_interest(tag);
    }
    if changed {
        editor.save().await?;
    }
    print_json(editor.profile())?;
    let suggestions = editor.available_interests();
    if !suggestions.is_empty() {
        println!("# more interests: {}", suggestions.join(", "));
    }
    Ok(())
}

fn parse_category(name: &str) -> Result<Category> {
    Category::parse(name).ok_or_else(|| {
        let known: Vec<&str> = Category::ALL.iter().map(|category| category.as_str()).collect();
        anyhow!("unknown category {name:?}; expected one of {}", known.join(", "))
    })
}

fn sign_in_hint(err: crate::error::AppError) -> anyhow::Error {
    if err.is_sign_in_required() {
        anyhow!("{err}: run `event-feed config --user-id <id>` to sign in")
    } else {
        err.into()
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("unable to render output")?;
    println!("{rendered}");
    Ok(())
}
