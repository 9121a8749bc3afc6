/// RinkLink CLI - drive the social graph and messaging core over a local store
use colored::*;
use rinklink_core::{
    Config, ConversationStore, FriendshipGraph, Identity, Player, RinkError,
    Session, SledStore, SyncEvent, SyncScheduler, Transition, UnreadAggregator,
};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct App {
    store: Arc<SledStore>,
    graph: FriendshipGraph<SledStore>,
    conversations: ConversationStore<SledStore>,
    unread: UnreadAggregator<SledStore>,
}

fn id(args: &[String], i: usize) -> Result<Identity, String> {
    args.get(i)
        .map(|s| Identity::from(s.as_str()))
        .ok_or_else(|| format!("missing argument #{}", i))
}

fn print_transition(what: &str, t: Transition) {
    match t {
        Transition::Applied => println!("{} {}", "✓".green().bold(), what),
        Transition::AlreadyResolved => println!(
            "{} {} (already handled by the other side)",
            "•".yellow().bold(),
            what
        ),
    }
}

impl App {
    fn new(store: Arc<SledStore>) -> Self {
        Self {
            graph: FriendshipGraph::new(store.clone()),
            conversations: ConversationStore::new(store.clone()),
            unread: UnreadAggregator::new(store.clone()),
            store,
        }
    }

    /// Run one command; usage errors come back as `Err(String)`
    async fn run(&self, args: &[String]) -> Result<(), String> {
        let cmd = args.first().map(String::as_str).unwrap_or("");
        let result = match cmd {
            "player" => {
                let player = Player {
                    id: id(args, 1)?,
                    display_name: args.get(2).cloned().ok_or("missing display name")?,
                    position: args.get(3).cloned(),
                    team: args.get(4).cloned(),
                };
                self.store.upsert_player(&player).map(|_| {
                    println!(
                        "{} Player {} saved",
                        "✓".green().bold(),
                        player.id.to_string().cyan()
                    )
                })
            }
            "status" => self.graph.get_status(&id(args, 1)?, &id(args, 2)?).await.map(|s| {
                println!("{}", s.to_string().bright_white().bold());
            }),
            "request" => self.graph.send_request(&id(args, 1)?, &id(args, 2)?).await.map(|e| {
                println!("{} Request sent (edge {})", "✓".green().bold(), e.id)
            }),
            "cancel" => self
                .graph
                .cancel_request(&id(args, 1)?, &id(args, 2)?)
                .await
                .map(|t| print_transition("Request cancelled", t)),
            "accept" => self
                .graph
                .accept_request(&id(args, 1)?, &id(args, 2)?)
                .await
                .map(|t| print_transition("Request accepted", t)),
            "decline" => self
                .graph
                .decline_request(&id(args, 1)?, &id(args, 2)?)
                .await
                .map(|t| print_transition("Request declined", t)),
            "unfriend" => self
                .graph
                .remove_friend(&id(args, 1)?, &id(args, 2)?)
                .await
                .map(|t| print_transition("Friend removed", t)),
            "friends" => self.graph.list_friends(&id(args, 1)?).await.map(|friends| {
                for f in friends {
                    println!("  {}", f.to_string().cyan());
                }
            }),
            "requests" => self.graph.list_received_requests(&id(args, 1)?).await.map(|edges| {
                for e in edges {
                    println!(
                        "  {} {}",
                        e.from_id.to_string().cyan(),
                        e.created_at.to_rfc3339().dimmed()
                    );
                }
            }),
            "send" => {
                let text = args.get(3..).map(|t| t.join(" ")).unwrap_or_default();
                self.conversations
                    .send_message(&id(args, 1)?, &id(args, 2)?, &text)
                    .await
                    .map(|m| println!("{} Message sent! ID: {}", "✓".green().bold(), m.id))
            }
            "chat" => {
                let a = id(args, 1)?;
                self.conversations.get_conversation(&a, &id(args, 2)?).await.map(|msgs| {
                    for m in msgs {
                        let who = if m.sender_id == a {
                            m.sender_id.to_string().green()
                        } else {
                            m.sender_id.to_string().cyan()
                        };
                        let mark = if m.read { " " } else { "*" };
                        let at = m.timestamp.format("%H:%M:%S").to_string();
                        println!("{} {} {}: {}", mark, at.dimmed(), who, m.text);
                    }
                })
            }
            "read" => self
                .conversations
                .mark_as_read(&id(args, 1)?, &id(args, 2)?)
                .await
                .map(|n| println!("{} {} marked read", "✓".green().bold(), n)),
            "unread" => {
                let viewer = id(args, 1)?;
                match self.unread.unread_by_partner(&viewer).await {
                    Ok(counts) => {
                        let total: usize = counts.values().sum();
                        println!("{} {}", "Unread:".bright_white().bold(), total);
                        for (partner, n) in counts {
                            println!("  {} {}", partner.to_string().cyan(), n);
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            "inbox" => self
                .conversations
                .conversation_summaries(&id(args, 1)?)
                .await
                .map(|rows| {
                    for r in rows {
                        let badge = if r.unread > 0 {
                            format!("({})", r.unread).red().bold()
                        } else {
                            "".normal()
                        };
                        let partner = r.partner_id.to_string().cyan();
                        println!("  {} {} {}", partner, badge, r.last_preview);
                    }
                }),
            other => return Err(format!("Unknown command: {}", other)),
        };

        result.map_err(|e: RinkError| {
            if e.is_precondition() {
                e.to_string()
            } else {
                format!("store error: {}", e)
            }
        })
    }
}

fn print_usage() {
    println!("{}", "🏒 RinkLink CLI".bright_cyan().bold());
    println!();
    println!("{}", "Usage:".bright_white().bold());
    println!(
        "  {} [--data-dir <path>] [--poll-ms <ms>] [--timeout-ms <ms>] [--stale-ms <ms>] <command> [args]",
        "rinklink".cyan()
    );
    println!();
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <id> <name> [position] [team]   Save a player record", "player".cyan());
    println!("  {} <a> <b>                         Relationship of a towards b", "status".cyan());
    println!("  {} <from> <to>                    Send a friend request", "request".cyan());
    println!("  {} <from> <to>                     Cancel a sent request", "cancel".cyan());
    println!("  {} <me> <requester>                Accept a request", "accept".cyan());
    println!("  {} <me> <requester>               Decline a request", "decline".cyan());
    println!("  {} <a> <b>                       Remove a friend", "unfriend".cyan());
    println!(
        "  {} <id> / {} <id>            List friends / received requests",
        "friends".cyan(),
        "requests".cyan()
    );
    println!("  {} <from> <to> <text...>             Send a message", "send".cyan());
    println!("  {} <a> <b>                           Show a conversation", "chat".cyan());
    println!("  {} <me> <partner>                    Mark a conversation read", "read".cyan());
    println!(
        "  {} <me> / {} <me>                Unread counts / inbox",
        "unread".cyan(),
        "inbox".cyan()
    );
    println!(
        "  {} <me> [partner]                   Poll for changes; type commands on stdin",
        "watch".cyan()
    );
}

fn describe(event: &SyncEvent) -> Option<String> {
    Some(match event {
        SyncEvent::Initial(_) | SyncEvent::Unchanged => return None,
        SyncEvent::NewMessages(msgs) => msgs
            .iter()
            .map(|m| format!("💬 {}: {}", m.sender_id, m.text))
            .collect::<Vec<_>>()
            .join("\n"),
        SyncEvent::MessagesRead(ids) => format!("👀 {} message(s) read", ids.len()),
        SyncEvent::UnreadChanged { current, .. } => format!("🔔 unread: {}", current),
        SyncEvent::NewFriendRequests(edges) => edges
            .iter()
            .map(|e| format!("🤝 friend request from {}", e.from_id))
            .collect::<Vec<_>>()
            .join("\n"),
        SyncEvent::RequestsResolved(edges) => format!("{} request(s) resolved", edges.len()),
        SyncEvent::FriendsChanged { added, removed } => {
            format!("friends +{:?} -{:?}", added, removed)
        }
        SyncEvent::ProfileChanged(_) => "profile updated".to_string(),
        SyncEvent::Degraded { stale_for, error } => {
            format!("⚠ showing data {:?} old ({})", stale_for, error).yellow().to_string()
        }
        SyncEvent::Recovered => "✓ back in sync".green().to_string(),
    })
}

async fn watch(app: &App, config: &Config, args: &[String]) -> anyhow::Result<()> {
    let me = id(args, 1).map_err(|e| anyhow::anyhow!(e))?;
    let session = Session::new(me);
    let scheduler = SyncScheduler::new(app.store.clone(), session.clone(), config.sync());

    let mut topics = vec![
        session.unread_topic(),
        session.requests_topic(),
        session.friends_topic(),
    ];
    if let Ok(partner) = id(args, 2) {
        topics.push(session.conversation_topic(&partner));
    }

    // Fan subscriptions into one channel
    let (tx, mut rx) = mpsc::channel(64);
    for topic in topics {
        let mut sub = scheduler.subscribe(topic);
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(update) = sub.recv().await {
                if tx.send(update).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    info!("Watching as {}", session.user);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else { break };
                if let Some(text) = describe(&update.event) {
                    println!("{}", text);
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        let cmd: Vec<String> = line.split_whitespace().map(String::from).collect();
                        if cmd.is_empty() {
                            continue;
                        }
                        if let Err(e) = app.run(&cmd).await {
                            eprintln!("{} {}", "✗".red().bold(), e);
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                break;
            }
        }
    }

    scheduler.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let (config, rest) = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if rest.is_empty() {
        print_usage();
        return Ok(());
    }

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let store = Arc::new(
        SledStore::open(&data_dir).map_err(|e| anyhow::anyhow!("Store error: {}", e))?,
    );
    let app = App::new(store.clone());

    let outcome = if rest[0] == "watch" {
        watch(&app, &config, &rest).await
    } else {
        app.run(&rest).await.map_err(|e| anyhow::anyhow!(e))
    };

    store.flush().map_err(|e| anyhow::anyhow!("Store error: {}", e))?;
    if let Err(e) = outcome {
        eprintln!("{} {}", "✗".red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}
