//! Interactive console client entry point (§5 Concurrency & Resource
//! Model, §6 External Interfaces).
//!
//! A single-threaded event loop integrates a monotonic timer (the editor's
//! chat-state rearm), socket readability, keyboard readability, and an
//! optional FIFO command source, with no lock held across sources and
//! sends serialized onto the session one at a time. Terminal rendering,
//! command grammar beyond dispatch, and persistent history logging are out
//! of scope; this binary wires the already-built components together and
//! prints plain status lines.

mod commands;
mod env;
mod error;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use wisp_core::config::Config;
use wisp_core::event::{BroadcastEventBus, Channel, Event, EventBus, EventSource};
use wisp_core::EventPayload;
use wisp_editor::LineEditor;
use wisp_history::HistoryBuffer;
use wisp_jid::Jid;
use wisp_roster::Roster;
use wisp_xmpp::connect::{ConnectConfig, ProxyConfig as TransportProxyConfig};
use wisp_xmpp::pipeline::Pipeline;
use wisp_xmpp::processors::{ChatStateProcessor, DebugProcessor, MucProcessor, RosterProcessor};
use wisp_xmpp::session::Session;
use wisp_xmpp::stanza::Stanza;

use crate::commands::ParsedCommand;
use crate::error::CliError;

const DEFAULT_XMPP_PORT: u16 = 5222;
const DEFAULT_WRAP_WIDTH: usize = 72;

struct App {
    config: Config,
    bus: Arc<dyn EventBus>,
    roster: Roster,
    editor: LineEditor,
    histories: HashMap<String, HistoryBuffer>,
    session: Option<Session>,
    current_buffer: String,
    running: bool,
}

impl App {
    fn new(config: Config, bus: Arc<dyn EventBus>) -> Self {
        let roster = Roster::new(bus.clone());
        let editor = LineEditor::new("console").with_event_bus(bus.clone());
        Self {
            config,
            bus,
            roster,
            editor,
            histories: HashMap::new(),
            session: None,
            current_buffer: "console".to_string(),
            running: true,
        }
    }

    fn history_for(&mut self, jid: &str) -> &mut HistoryBuffer {
        self.histories.entry(jid.to_string()).or_insert_with(|| {
            HistoryBuffer::new(
                jid,
                self.config.history.max_blocks,
                DEFAULT_WRAP_WIDTH,
            )
            .with_event_bus(self.bus.clone())
        })
    }

    async fn connect(&mut self) {
        if self.session.is_some() {
            warn!("already connected, ignoring /connect");
            return;
        }

        let account_jid = match Jid::parse(&self.config.account.jid) {
            Ok(jid) => jid,
            Err(error) => {
                error!(%error, "account jid does not parse");
                return;
            }
        };
        let domain = account_jid.domain.clone();
        let host = self
            .config
            .account
            .server
            .clone()
            .unwrap_or_else(|| domain.clone());
        let port = self.config.account.port.unwrap_or(DEFAULT_XMPP_PORT);

        let proxy = match (&self.config.proxy.host, self.config.proxy.port) {
            (Some(host), Some(port)) => Some(TransportProxyConfig {
                host: host.clone(),
                port,
                user: self.config.proxy.user.clone(),
                password: self.config.proxy.password.clone(),
            }),
            _ => None,
        };

        let connect_config = ConnectConfig {
            host,
            port,
            bind_address: None,
            proxy,
            use_tls: true,
            verify_tls: self.config.tls.verify,
            connect_timeout: Duration::from_secs(10),
        };

        let pipeline = Pipeline::new(vec![
            Arc::new(RosterProcessor::new(self.bus.clone())),
            Arc::new(ChatStateProcessor::new(self.bus.clone())),
            Arc::new(MucProcessor::new(self.bus.clone())),
            Arc::new(DebugProcessor::new(self.bus.clone())),
        ]);

        info!(jid = %self.config.account.jid, "connecting");
        match Session::connect(self.config.account.jid.clone(), &domain, &connect_config, pipeline)
            .await
        {
            Ok(mut session) => {
                let node = account_jid.node.clone().unwrap_or_default();
                let resource = self
                    .config
                    .account
                    .resource
                    .clone()
                    .unwrap_or_else(|| "wisp".to_string());
                if let Err(error) = session
                    .auth_legacy(&node, &self.config.account.password, &resource)
                    .await
                {
                    error!(%error, "legacy authentication request failed");
                    return;
                }
                self.session = Some(session);
                let _ = self.bus.publish(Event::new(
                    channel("session.connected"),
                    EventSource::Xmpp,
                    EventPayload::ConnectionEstablished {
                        jid: self.config.account.jid.clone(),
                    },
                ));
                println!("connecting as {}...", self.config.account.jid);
            }
            Err(error) => {
                error!(%error, "connect failed");
                println!("connect failed: {error}");
            }
        }
    }

    fn disconnect(&mut self) {
        if self.session.take().is_some() {
            let _ = self.bus.publish(Event::new(
                channel("session.disconnected"),
                EventSource::Xmpp,
                EventPayload::ConnectionLost {
                    reason: "user requested disconnect".to_string(),
                },
            ));
            println!("disconnected");
        } else {
            println!("not connected");
        }
    }

    async fn say(&mut self, to: &str, body: &str) {
        let Some(session) = self.session.as_mut() else {
            println!("not connected");
            return;
        };
        let from = self.config.account.jid.clone();
        let xml = format!(
            "<message xmlns='jabber:client' type='chat' from='{}' to='{}'><body>{}</body></message>",
            xml_escape(&from),
            xml_escape(to),
            xml_escape(body),
        );
        match Stanza::parse(xml.as_bytes()) {
            Ok(stanza) => {
                if let Err(error) = session.send(stanza).await {
                    error!(%error, "failed to send message");
                    return;
                }
                let now = chrono::Utc::now();
                self.history_for(to).add_line(body, now, 0, 0, None);
                let _ = self.bus.publish(Event::new(
                    channel("message.sent"),
                    EventSource::Xmpp,
                    EventPayload::MessageSent {
                        to: to.to_string(),
                        body: body.to_string(),
                    },
                ));
            }
            Err(error) => error!(%error, "failed to build outgoing message stanza"),
        }
    }

    async fn dispatch_line(&mut self, line: &str) {
        let Some(parsed) = commands::parse(line) else {
            let target = self.current_buffer.clone();
            self.say(&target, line).await;
            return;
        };

        match parsed {
            ParsedCommand::Unrecognized { name } => {
                error!(command = %name, "unrecognised command");
            }
            ParsedCommand::Known { name, args } => self.run_known(&name, &args).await,
        }
    }

    async fn run_known(&mut self, name: &str, args: &str) {
        match name {
            "quit" => {
                self.running = false;
            }
            "connect" => self.connect().await,
            "disconnect" => self.disconnect(),
            "say" => {
                let target = self.current_buffer.clone();
                self.say(&target, args).await;
            }
            "say_to" => {
                if let Some((to, body)) = args.split_once(char::is_whitespace) {
                    self.say(to, body.trim_start()).await;
                } else {
                    println!("usage: /say_to <jid> <message>");
                }
            }
            "buffer" => {
                if !args.is_empty() {
                    self.current_buffer = args.to_string();
                }
                println!("current buffer: {}", self.current_buffer);
            }
            "roster" => {
                for jid in self.roster.buddylist_build() {
                    println!("{jid}");
                }
            }
            "echo" => println!("{args}"),
            "version" => println!("wisp {}", env!("CARGO_PKG_VERSION")),
            "help" => {
                println!("known commands: {}", commands::COMMANDS.join(", "));
            }
            other => {
                debug!(command = other, args, "command recognised, no handler wired beyond dispatch");
            }
        }
    }
}

fn channel(name: &str) -> Channel {
    Channel::new(name).expect("static channel names are always valid")
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads lines off the command FIFO, forwarding each to `tx`. The FIFO is
/// expected to already exist (created out-of-band, e.g. `mkfifo`); opening
/// for read blocks until a writer connects, which is the FIFO's normal
/// behaviour and not treated as an error here.
async fn run_fifo_reader(path: std::path::PathBuf, tx: mpsc::UnboundedSender<String>) {
    loop {
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(error) => {
                warn!(%error, path = %path.display(), "could not open command fifo");
                return;
            }
        };
        let mut lines = tokio::io::BufReader::new(file).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                return;
            }
        }
        // Writer closed its end; reopen so subsequent writers keep working.
    }
}

fn spawn_key_reader() -> mpsc::UnboundedReceiver<crossterm::event::KeyEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || loop {
        match crossterm::event::read() {
            Ok(crossterm::event::Event::Key(key)) => {
                if tx.send(key).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(_) => return,
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    let config = match wisp_core::config::load_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            if matches!(
                error,
                wisp_core::config::ConfigError::MissingRequiredFields { .. }
            ) {
                eprintln!("a default configuration file has been written; edit it and restart");
            }
            return Err(error.into());
        }
    };

    init_tracing(&config.logging.level);

    let tmp_dir = env::resolve_tmp_dir();
    let fifo_path = env::resolve_fifo_path(&tmp_dir);

    let bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::new(config.event_bus.channel_capacity));
    let mut bus_events = bus.subscribe("**")?;

    let mut app = App::new(config, bus);

    crossterm::terminal::enable_raw_mode()?;
    let mut keys = spawn_key_reader();

    let (fifo_tx, mut fifo_rx) = mpsc::unbounded_channel();
    if let Some(path) = fifo_path {
        tokio::spawn(run_fifo_reader(path, fifo_tx));
    }

    println!("wisp console ready. type /connect to begin, /quit to exit.");

    while app.running {
        tokio::select! {
            Some(key) = keys.recv() => {
                let action = app.editor.handle_key(key);
                if let wisp_editor::EditAction::AcceptLine { text, .. } = action {
                    app.dispatch_line(&text).await;
                }
            }
            Some(line) = fifo_rx.recv() => {
                app.dispatch_line(&line).await;
            }
            Ok(event) = bus_events.recv() => {
                log_bus_event(&event);
            }
            stanzas = recv_from_session(&mut app.session) => {
                match stanzas {
                    Some(stanzas) => {
                        for stanza in stanzas {
                            debug!(name = stanza.name(), "stanza received");
                        }
                    }
                    None => app.session = None,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                app.running = false;
            }
        }
    }

    crossterm::terminal::disable_raw_mode()?;
    println!("bye");
    std::process::exit(0);
}

async fn recv_from_session(session: &mut Option<Session>) -> Option<Vec<Stanza>> {
    match session {
        Some(session) => match session.recv().await {
            Ok(stanzas) => Some(stanzas),
            Err(error) => {
                error!(%error, "session closed");
                None
            }
        },
        None => std::future::pending().await,
    }
}

fn log_bus_event(event: &Event) {
    debug!(channel = ?event.channel, payload = ?event.payload, "event");
}
