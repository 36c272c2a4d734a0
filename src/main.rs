//! Terminal chat client
//!
//! Registers an id with a PeerJS server and chats from stdin. Lines starting
//! with `/` are commands, anything else goes to the current peer.

use clap::Parser;
use peerchat_lib::broker::BrokerEndpoint;
use peerchat_lib::store::{FileStore, KeyValueStore, MemoryStore, MessageLog};
use peerchat_lib::{logger, ChannelHost, ClientConfig, HostEvent, PeerJsBroker, PeerSession, RtcMediaDevices};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Peer-to-peer chat over a PeerJS broker", long_about = None)]
struct Args {
    /// Id to register with the broker
    #[arg(short, long)]
    id: String,

    /// Peer to talk to first
    #[arg(short, long)]
    to: Option<String>,

    /// JSON client config
    #[arg(short, long, env = "PEERCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Broker `host:port`, replacing the configured endpoint list
    #[arg(long)]
    broker: Option<String>,

    /// Use ws:// instead of wss:// for --broker
    #[arg(long)]
    insecure: bool,

    /// JSON file keeping message history
    #[arg(long, env = "PEERCHAT_STORE")]
    store: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    if let Some(broker) = &args.broker {
        let (host, port) = broker
            .rsplit_once(':')
            .ok_or_else(|| format!("--broker expects host:port, got {broker}"))?;
        let port: u16 = port.parse()?;
        config.endpoints = vec![BrokerEndpoint::new(host, port, "/", !args.insecure)];
    }
    config.validate()?;
    Ok(config)
}

fn print_help() {
    println!("/to <id>      switch peer");
    println!("/probe <id>   check whether a peer answers");
    println!("/call         call the current peer");
    println!("/hangup       end the call");
    println!("/history      show the conversation with the current peer");
    println!("/status       show registration state");
    println!("/quit         log out and exit");
}

async fn print_events(mut events: mpsc::UnboundedReceiver<HostEvent>, log: MessageLog) {
    while let Some(event) = events.recv().await {
        match event {
            HostEvent::Message(message) => {
                if let Err(e) = log.save(&message) {
                    warn!(error = %e, "inbound message not stored");
                }
                println!("<{}> {}", message.sender, message.text);
            }
            HostEvent::Status(state) => println!("* status: {state}"),
            HostEvent::CallState(state) => println!("* call: {state}"),
            HostEvent::Media { slot, stream_id } => match stream_id {
                Some(id) => println!("* {slot:?} media bound: {id}"),
                None => println!("* {slot:?} media cleared"),
            },
            HostEvent::CallFailed(reason) => println!("* call failed: {reason}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;

    let store: Arc<dyn KeyValueStore> = match &args.store {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };
    let log = MessageLog::new(store);

    let broker = PeerJsBroker::new(config.peerjs.clone())?;
    let devices = RtcMediaDevices::new(config.media);
    let (host, events) = ChannelHost::new();
    let session = PeerSession::new(config, Arc::new(broker), Arc::new(devices), host)?;
    tokio::spawn(print_events(events, log.clone()));

    session.register(&args.id).await?;
    info!(id = %args.id, "registered");
    println!("registered as {}; /help for commands", args.id);

    let mut peer = args.to.clone();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "/help" => print_help(),
            "/quit" => break,
            "/to" if !rest.is_empty() => {
                peer = Some(rest.to_string());
                println!("* talking to {rest}");
            }
            "/probe" if !rest.is_empty() => {
                let alive = session.probe(rest).await;
                println!("* {rest} is {}", if alive { "reachable" } else { "unreachable" });
            }
            "/status" => {
                let identity = session.identity();
                println!("* {} ({} retries)", identity.state(), identity.retries());
            }
            "/call" => match &peer {
                Some(remote) => {
                    if let Err(e) = session.start_call(remote).await {
                        println!("* call failed: {e}");
                    }
                }
                None => println!("* no peer selected, use /to <id>"),
            },
            "/hangup" => session.end_call().await,
            "/history" => match &peer {
                Some(remote) => {
                    for message in log.conversation(&args.id, remote)? {
                        println!("<{}> {}", message.sender, message.text);
                    }
                }
                None => println!("* no peer selected, use /to <id>"),
            },
            _ if command.starts_with('/') => println!("* unknown command, /help lists them"),
            _ => match &peer {
                Some(remote) => match session.send(remote, line).await {
                    Ok(message) => log.save(&message)?,
                    Err(e) => {
                        error!(error = %e, "send failed");
                        println!("* not delivered: {e}");
                    }
                },
                None => println!("* no peer selected, use /to <id>"),
            },
        }
    }

    session.logout().await;
    Ok(())
}
