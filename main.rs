/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Command-line entry point: admin operations on the link set and image
//! collection, plus a `run` mode that drives a full page session
//! (page-load batch, rotation ticks, console interactions, unload open).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use bpaf::Bpaf;
use crossbeam_channel::Sender;
use log::warn;

use galleryshell::app::{AdminIntent, GalleryApp, InputEvent};
use galleryshell::gallery::{GalleryImage, IMAGES_KEY};
use galleryshell::persistence::{
    KeyValueStoreRef, MemoryStore, MirroredStore, RedbStore, RemoteStore,
};
use galleryshell::prefs::{self, Prefs};
use galleryshell::rotation::{ALL_KEYS, AdRotationStore};
use galleryshell::tabs::SystemTabOpener;

/// Request timeout for the remote settings mirror.
const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
/// Headless image-gallery site engine with ad-link rotation
struct Options {
    /// Override the settings data directory
    #[bpaf(argument("DIR"))]
    data_dir: Option<PathBuf>,
    /// Base URL of the remote settings mirror
    #[bpaf(argument("URL"))]
    mirror: Option<String>,
    /// Admin key authorizing mutating commands
    #[bpaf(argument("KEY"))]
    admin_key: Option<String>,
    #[bpaf(external)]
    command: Command,
}

#[derive(Debug, Clone, Bpaf)]
enum Command {
    /// Run a page session until 'quit' or end of input
    #[bpaf(command)]
    Run,
    /// Manage the ad link set
    #[bpaf(command)]
    Links {
        #[bpaf(external)]
        links_command: LinksCommand,
    },
    /// Manage the gallery image collection
    #[bpaf(command)]
    Images {
        #[bpaf(external)]
        images_command: ImagesCommand,
    },
    /// Set the rotation frequency in seconds (minimum 5)
    #[bpaf(command)]
    Frequency {
        #[bpaf(positional("SECONDS"))]
        seconds: u64,
    },
}

#[derive(Debug, Clone, Bpaf)]
enum LinksCommand {
    /// List ad links and their active state
    #[bpaf(command)]
    List,
    /// Append a new ad link
    #[bpaf(command)]
    Add {
        #[bpaf(positional("URL"))]
        url: String,
    },
    /// Remove the ad link at INDEX
    #[bpaf(command)]
    Remove {
        #[bpaf(positional("INDEX"))]
        index: usize,
    },
    /// Toggle the active state of the ad link at INDEX
    #[bpaf(command)]
    Toggle {
        #[bpaf(positional("INDEX"))]
        index: usize,
    },
    /// Activate every ad link
    #[bpaf(command("activate-all"))]
    ActivateAll,
    /// Reset to the built-in default link set
    #[bpaf(command)]
    Reset,
}

#[derive(Debug, Clone, Bpaf)]
enum ImagesCommand {
    /// List gallery images
    #[bpaf(command)]
    List,
    /// Add an image by URL (the URL is probed before acceptance)
    #[bpaf(command)]
    Add {
        #[bpaf(positional("URL"))]
        url: String,
    },
    /// Import a local image file, stored inline as a data URL
    #[bpaf(command)]
    Import {
        /// Alt text stored with the image
        #[bpaf(argument("TEXT"))]
        alt: Option<String>,
        #[bpaf(positional("FILE"))]
        path: PathBuf,
    },
    /// Remove an image by id
    #[bpaf(command)]
    Remove {
        #[bpaf(positional("ID"))]
        id: String,
    },
}

fn main() -> ExitCode {
    let opts = options().run();
    let prefs = Prefs::load();
    galleryshell::init_tracing(prefs.tracing_filter.as_deref());

    if mutates_state(&opts.command) && !admin_key_matches(opts.admin_key.as_deref(), &prefs) {
        eprintln!("Invalid admin key. Please try again.");
        return ExitCode::FAILURE;
    }

    let backend = open_backend(&opts, &prefs);
    match opts.command {
        Command::Run => run_session(backend, &prefs),
        Command::Links { links_command } => links(backend, links_command),
        Command::Images { images_command } => images(backend, images_command),
        Command::Frequency { seconds } => {
            apply(backend, AdminIntent::SetFrequency {
                every: Duration::from_secs(seconds),
            })
        },
    }
}

fn mutates_state(command: &Command) -> bool {
    !matches!(
        command,
        Command::Run
            | Command::Links {
                links_command: LinksCommand::List
            }
            | Command::Images {
                images_command: ImagesCommand::List
            }
    )
}

fn admin_key_matches(provided: Option<&str>, prefs: &Prefs) -> bool {
    provided.unwrap_or("").trim() == prefs.admin_key
}

/// Open the local settings store, composing in the remote mirror when one
/// is configured. Every failure degrades rather than aborts.
fn open_backend(opts: &Options, prefs: &Prefs) -> KeyValueStoreRef {
    let data_dir = opts
        .data_dir
        .clone()
        .or_else(|| prefs.data_dir.clone())
        .unwrap_or_else(prefs::default_data_dir);
    let local: KeyValueStoreRef = match RedbStore::open(data_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Falling back to an in-memory settings store: {e}");
            Arc::new(MemoryStore::new())
        },
    };

    let Some(mirror_url) = opts.mirror.clone().or_else(|| prefs.mirror_url.clone()) else {
        return local;
    };
    match RemoteStore::new(&mirror_url, REMOTE_TIMEOUT) {
        Ok(remote) => {
            let mirrored = MirroredStore::new(local, Arc::new(remote));
            let mut keys: Vec<&str> = ALL_KEYS.to_vec();
            keys.push(IMAGES_KEY);
            mirrored.hydrate(&keys);
            Arc::new(mirrored)
        },
        Err(e) => {
            warn!("Ignoring unusable mirror '{mirror_url}': {e}");
            local
        },
    }
}

fn run_session(backend: KeyValueStoreRef, prefs: &Prefs) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start the runtime: {e}");
            return ExitCode::FAILURE;
        },
    };

    let mut app = GalleryApp::new(backend, Arc::new(SystemTabOpener::new()));
    app.store.set_interaction_odds(prefs.interaction_odds);

    let (input_tx, input_rx) = crossbeam_channel::unbounded();
    std::thread::spawn(move || watch_console(input_tx));
    println!("Gallery session running. Press Enter to interact; type 'quit' to leave the page.");

    runtime.block_on(app.run(input_rx));
    ExitCode::SUCCESS
}

/// Each console line counts as one user interaction; 'quit' (or end of
/// input) ends the session.
fn watch_console(input_tx: Sender<InputEvent>) {
    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => {
                let _ = input_tx.send(InputEvent::Shutdown);
                break;
            },
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.eq_ignore_ascii_case("quit") || trimmed.eq_ignore_ascii_case("q") {
                    let _ = input_tx.send(InputEvent::Shutdown);
                    break;
                }
                let _ = input_tx.send(InputEvent::Interaction);
            },
        }
    }
}

fn links(backend: KeyValueStoreRef, command: LinksCommand) -> ExitCode {
    match command {
        LinksCommand::List => {
            let mut store = AdRotationStore::open(
                Arc::clone(&backend),
                Arc::new(SystemTabOpener::new()),
                Arc::new(galleryshell::tabs::PromptBoard::new(
                    galleryshell::tabs::PROMPT_TIMEOUT,
                )),
            );
            let _ = store.resolve_active_links();
            print_links(&store);
            ExitCode::SUCCESS
        },
        LinksCommand::Add { url } => apply_and_list(backend, AdminIntent::AddLink { url }),
        LinksCommand::Remove { index } => {
            apply_and_list(backend, AdminIntent::RemoveLink { index })
        },
        LinksCommand::Toggle { index } => {
            apply_and_list(backend, AdminIntent::ToggleActive { index })
        },
        LinksCommand::ActivateAll => apply_and_list(backend, AdminIntent::ActivateAll),
        LinksCommand::Reset => apply_and_list(backend, AdminIntent::ResetDefaults),
    }
}

fn images(backend: KeyValueStoreRef, command: ImagesCommand) -> ExitCode {
    match command {
        ImagesCommand::List => {
            let app = GalleryApp::new(backend, Arc::new(SystemTabOpener::new()));
            print_images(app.images.images());
            ExitCode::SUCCESS
        },
        ImagesCommand::Add { url } => apply(backend, AdminIntent::AddImageUrl { url }),
        ImagesCommand::Import { alt, path } => {
            apply(backend, AdminIntent::AddImageFile { path, alt })
        },
        ImagesCommand::Remove { id } => apply(backend, AdminIntent::RemoveImage { id }),
    }
}

fn apply(backend: KeyValueStoreRef, intent: AdminIntent) -> ExitCode {
    let mut app = GalleryApp::new(backend, Arc::new(SystemTabOpener::new()));
    match app.handle_intent(intent) {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        },
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        },
    }
}

fn apply_and_list(backend: KeyValueStoreRef, intent: AdminIntent) -> ExitCode {
    let mut app = GalleryApp::new(Arc::clone(&backend), Arc::new(SystemTabOpener::new()));
    match app.handle_intent(intent) {
        Ok(message) => {
            println!("{message}");
            print_links(&app.store);
            ExitCode::SUCCESS
        },
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        },
    }
}

fn print_links(store: &AdRotationStore) {
    if store.links().is_empty() {
        println!("No ad links configured.");
        return;
    }
    println!("Rotation frequency: {}s", store.frequency().as_secs());
    for (index, url) in store.links().iter().enumerate() {
        let marker = if store.is_active(index) { "active" } else { "      " };
        println!("{index:>3} [{marker}] {url}");
    }
}

fn print_images(images: &[GalleryImage]) {
    if images.is_empty() {
        println!("No images added yet.");
        return;
    }
    for image in images {
        println!("{}  {}  {}", image.id, image.created_at, truncated(&image.src));
    }
}

fn truncated(src: &str) -> String {
    const LIMIT: usize = 72;
    if src.chars().count() <= LIMIT {
        return src.to_string();
    }
    let head: String = src.chars().take(LIMIT).collect();
    format!("{head}…")
}
