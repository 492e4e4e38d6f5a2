use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    api::LOOKUP_SENTINEL,
    view::{filter_contacts, find_peer, load_contacts},
    AppView, BackendApi, ChannelStatus, ChatSession, ClientSettings, ContactMode,
    CredentialStore, DeliveryStatus, Direction, HttpBackend, Message, Navigator, PresenceState,
    ServerHealth, SessionCredentials, SessionHandle, SessionPhase, SessionSnapshot, StoredSession,
    WsConnector,
};
use shared::{domain::Peer, protocol::RegisterRequest};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::watch,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "texter", about = "Terminal client for one-to-one chat")]
struct Cli {
    /// Overrides `server_url` from client.toml / the environment.
    #[arg(long, global = true)]
    server_url: Option<String>,
    #[arg(long, global = true)]
    state_path: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    Register {
        username: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Lists everyone, or only users with history when `--recent` is set.
    Contacts {
        #[arg(long)]
        recent: bool,
        #[arg(long, default_value = "")]
        search: String,
    },
    Chat {
        peer: String,
    },
    Logout,
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let mut settings = client_core::load_settings();
    if let Some(server_url) = cli.server_url {
        settings.server_url = server_url;
    }
    if let Some(state_path) = cli.state_path {
        settings.state_path = state_path;
    }
    let store = CredentialStore::new(settings.state_path.clone());
    let backend = HttpBackend::new(&settings.server_url)?;

    match cli.command {
        Command::Login { username, password } => {
            let token = backend
                .login(&username, &password)
                .await
                .context("login failed")?;
            store.save(&StoredSession::new(token.access_token.as_str(), username.as_str()))?;
            println!("logged in as {username}");

            let mut navigator = Navigator::default();
            navigator.logged_in(&username);
            let authed = backend.authenticated(token.access_token);
            navigator.recent_chats_checked(
                authed
                    .list_chat_users(&username)
                    .await
                    .map(|users| users.len()),
            );
            print_dashboard(&navigator);
        }
        Command::Register {
            username,
            first_name,
            last_name,
            email,
            password,
        } => {
            let created = backend
                .register(&RegisterRequest {
                    username,
                    first_name,
                    last_name,
                    email,
                    password,
                })
                .await?;
            println!("registered {} (id {}); log in to continue", created.username, created.id);
        }
        Command::Contacts { recent, search } => {
            let session = require_login(&store)?;
            let authed = backend.authenticated(session.token.as_str());
            let mode = if recent {
                ContactMode::Recent
            } else {
                ContactMode::All
            };
            let contacts = load_contacts(&authed, mode, &session.username).await?;
            let shown = filter_contacts(&contacts, &search);
            if shown.is_empty() {
                println!("no contacts");
            }
            for contact in shown {
                println!("{:>6}  {}", contact.id, contact.username);
            }
        }
        Command::Chat { peer } => {
            let session = require_login(&store)?;
            let authed = Arc::new(backend.authenticated(session.token.as_str()));
            let contacts = authed
                .list_all_users(LOOKUP_SENTINEL)
                .await
                .context("could not load the user directory")?;
            let peer = find_peer(&contacts, &peer)
                .ok_or_else(|| anyhow!("no user named {peer}"))?;
            run_chat(settings, authed, store, session, peer).await?;
        }
        Command::Logout => {
            store.clear()?;
            println!("logged out");
        }
        Command::Health => match backend.health().await {
            Ok(()) => println!("server is up"),
            Err(err) => {
                println!("server is down for maintenance");
                return Err(err);
            }
        },
    }

    Ok(())
}

fn require_login(store: &CredentialStore) -> Result<StoredSession> {
    let mut navigator = Navigator::default();
    let stored = store.load()?;
    navigator.restore(stored.as_ref());
    match (navigator.view(), stored) {
        (AppView::LoggedOut, _) | (_, None) => bail!("not logged in; run `texter login` first"),
        (_, Some(session)) => Ok(session),
    }
}

fn print_dashboard(navigator: &Navigator) {
    match navigator.view() {
        AppView::RecentChats => println!("you have recent chats; `texter contacts --recent` lists them"),
        AppView::Empty => println!("no chats yet; `texter contacts` to start one"),
        other => println!("{other:?}"),
    }
}

async fn run_chat(
    settings: ClientSettings,
    backend: Arc<HttpBackend>,
    store: CredentialStore,
    session: StoredSession,
    peer: Peer,
) -> Result<()> {
    let mut navigator = Navigator::default();
    navigator.restore(Some(&session));
    navigator.recent_chats_checked(
        backend
            .list_chat_users(&session.username)
            .await
            .map(|users| users.len()),
    );
    navigator.select_contact(peer);
    let Some(peer) = navigator.selected_peer().cloned() else {
        bail!("not logged in; run `texter login` first");
    };

    let (mut health, health_task) =
        client_core::spawn_health_monitor(backend.clone(), settings.health_interval);
    let connector = Arc::new(WsConnector::new(settings.clone()));
    let handle = ChatSession::new(
        settings,
        backend,
        connector,
        SessionCredentials {
            username: session.username.clone(),
            token: session.token.clone(),
        },
    )
    .start();
    handle.select_peer(peer.clone()).await?;
    println!("chatting with {} (/quit, /retry, /bottom)", peer.username);

    let mut render_task = tokio::spawn(render(handle.watch(), store));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&handle, &mut navigator, line.trim()).await? {
                    break;
                }
            }
            Ok(()) = health.changed() => {
                if *health.borrow_and_update() == ServerHealth::Down {
                    println!("!! server is down for maintenance");
                } else {
                    println!("!! server is back");
                }
            }
            _ = &mut render_task => break,
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.shutdown().await;
    health_task.abort();
    if !render_task.is_finished() {
        let _ = render_task.await;
    }
    navigator.back_from_chat();
    print_dashboard(&navigator);
    Ok(())
}

/// Returns `false` when the user asked to leave.
async fn handle_line(handle: &SessionHandle, navigator: &mut Navigator, line: &str) -> Result<bool> {
    match line {
        "/quit" => return Ok(false),
        "/retry" => handle.retry_history().await?,
        "/bottom" => handle.scroll_to_bottom().await?,
        "" => handle.input_changed("").await?,
        text => {
            handle.input_changed(text).await?;
            match handle.send_message(text).await {
                Ok(()) => navigator.message_sent(),
                Err(err) => println!("!! not sent: {err}"),
            }
        }
    }
    Ok(true)
}

#[derive(Default)]
struct Renderer {
    printed: HashSet<u64>,
    delivered: HashSet<u64>,
    phase: Option<SessionPhase>,
    channel: Option<ChannelStatus>,
    presence: Option<PresenceState>,
    ever_open: bool,
    new_below: bool,
    remembered: bool,
}

impl Renderer {
    /// Prints whatever changed since the previous snapshot. Returns `false`
    /// once the session can no longer make progress.
    fn render(&mut self, snapshot: &SessionSnapshot, store: &CredentialStore) -> bool {
        if let (Some(local_id), false) = (snapshot.local_id, self.remembered) {
            self.remembered = true;
            if let Err(err) = store.remember_user_id(local_id) {
                warn!(error = %err, "could not cache user id");
            }
        }

        if self.phase.as_ref() != Some(&snapshot.phase) {
            match &snapshot.phase {
                SessionPhase::IdentityFailed(err) => {
                    println!("!! {err}; run `texter logout` and log in again");
                }
                SessionPhase::LoadingHistory => println!("-- loading history"),
                SessionPhase::HistoryFailed(err) => {
                    println!("!! could not load history ({err}); type /retry")
                }
                SessionPhase::Ready if snapshot.messages.is_empty() => {
                    println!("-- no messages yet, say hello")
                }
                _ => {}
            }
            self.phase = Some(snapshot.phase.clone());
        }

        if self.channel != Some(snapshot.channel) {
            match snapshot.channel {
                ChannelStatus::ReconnectPending => println!("-- reconnecting..."),
                ChannelStatus::Open if self.ever_open => println!("-- reconnected"),
                ChannelStatus::Open => self.ever_open = true,
                _ => {}
            }
            self.channel = Some(snapshot.channel);
        }

        if self.presence != Some(snapshot.presence) {
            if let (Some(peer), Some(previous)) = (&snapshot.peer, self.presence) {
                if previous.online != snapshot.presence.online {
                    let state = if snapshot.presence.online { "online" } else { "offline" };
                    println!("-- {} is {state}", peer.username);
                }
                if snapshot.presence.typing && !previous.typing {
                    println!("-- {} is typing...", peer.username);
                }
            }
            self.presence = Some(snapshot.presence);
        }

        for message in &snapshot.messages {
            if self.printed.insert(message.seq) {
                print_message(message);
            }
            if message.delivery == DeliveryStatus::Delivered && self.delivered.insert(message.seq) {
                println!("   (delivered)");
            }
        }
        if snapshot.scroll.has_new_message && !self.new_below {
            println!("-- new messages below (/bottom)");
        }
        self.new_below = snapshot.scroll.has_new_message;

        !matches!(
            snapshot.phase,
            SessionPhase::IdentityFailed(_) | SessionPhase::Terminated
        )
    }
}

fn print_message(message: &Message) {
    let who = match message.direction {
        Direction::Outgoing => "me".to_string(),
        Direction::Incoming => match &message.sender {
            client_core::Sender::Peer(name) => name.clone(),
            client_core::Sender::Me => "me".to_string(),
        },
    };
    println!("[{}] {who}: {}", message.display_time, message.text);
}

async fn render(mut snapshots: watch::Receiver<SessionSnapshot>, store: CredentialStore) {
    let mut renderer = Renderer::default();
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if !renderer.render(&snapshot, &store) {
            return;
        }
        if snapshots.changed().await.is_err() {
            return;
        }
    }
}
