//! `fleet-inbox`: terminal front end for the fleet support inbox.
//!
//! ```bash
//! fleet-inbox login --url https://fleet.example.com --email admin@example.com --password secret
//! fleet-inbox conversations
//! fleet-inbox watch 64f1c2
//! fleet-inbox send 64f1c2 "Un técnico va en camino"
//! fleet-inbox status 64f1c2 resolved
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;

use fleet_support_inbox::app::AppState;
use fleet_support_inbox::sync::dedup::DedupMatcher;
use fleet_support_inbox::sync::push::PushConnection;
use fleet_support_inbox::{
    ApiClient, Conversation, ConversationStatus, ConversationStore, InboxError, InboxResult,
    InboxSession, Message, Origin, SupportBackend,
};

#[derive(Parser)]
#[command(name = "fleet-inbox", about = "Fleet support inbox", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Log in as an admin and store the token
    Login {
        #[arg(long)]
        url: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// List support conversations
    Conversations,
    /// Print the full history of a conversation
    History { conversation_id: String },
    /// Follow a conversation live until Ctrl-C
    Watch { conversation_id: String },
    /// Reply to a conversation as support
    Send {
        conversation_id: String,
        text: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Mark a conversation as read
    Read { conversation_id: String },
    /// Change a conversation's status (open, in_progress, resolved, closed)
    Status {
        conversation_id: String,
        status: ConversationStatus,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> InboxResult<()> {
    let config_path = cli.config.as_deref();
    let state = AppState::load(config_path);

    match cli.command {
        Command::Login {
            url,
            email,
            password,
        } => {
            let mut client = ApiClient::new(&url, None)?;
            client.login(&email, &password).await?;
            let mut state = state;
            state.base_url = client.base_url().to_string();
            state.token = client.token().map(str::to_string);
            let saved = state.save(config_path)?;
            println!("Logged in. Settings saved to {}", saved.display());
        }
        Command::Conversations => {
            let client = client_for(&state)?;
            let mut conversations = client.conversations().await?;
            conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            for conv in &conversations {
                print_conversation(conv);
            }
            if conversations.is_empty() {
                println!("No conversations.");
            }
        }
        Command::History { conversation_id } => {
            let client = client_for(&state)?;
            let conversation = find_conversation(&client, &conversation_id).await?;
            let mut store = ConversationStore::new(DedupMatcher::new(state.dedup_window()));
            store.upsert_conversation(conversation);
            let payloads = client.conversation_messages(&conversation_id).await?;
            let report = store.merge_incoming(&conversation_id, &payloads, Origin::History);
            for message in store.messages(&conversation_id) {
                print_message(message);
            }
            if report.rejected > 0 {
                log::warn!("{} malformed message(s) skipped", report.rejected);
            }
        }
        Command::Watch { conversation_id } => {
            let client = Arc::new(client_for(&state)?);
            watch(client, &state, &conversation_id).await?;
        }
        Command::Send {
            conversation_id,
            text,
            subject,
        } => {
            let client = client_for(&state)?;
            let created = client
                .send_message(&conversation_id, &text, subject.as_deref())
                .await?;
            let conversation = find_conversation(&client, &conversation_id).await?;
            let mut store = ConversationStore::new(DedupMatcher::new(state.dedup_window()));
            store.upsert_conversation(conversation);
            let report = store.merge_incoming(&conversation_id, &[created], Origin::Sent);
            match report.appended.first() {
                Some(message) => print_message(message),
                None => println!("Sent."),
            }
        }
        Command::Read { conversation_id } => {
            client_for(&state)?.mark_read(&conversation_id).await?;
            println!("Conversation {} marked as read.", conversation_id);
        }
        Command::Status {
            conversation_id,
            status,
        } => {
            let client = client_for(&state)?;
            match client.update_status(&conversation_id, status).await? {
                Some(conv) => print_conversation(&conv),
                None => println!("Conversation {} is now {}.", conversation_id, status),
            }
        }
    }
    Ok(())
}

async fn watch(client: Arc<ApiClient>, state: &AppState, conversation_id: &str) -> InboxResult<()> {
    let conversation = find_conversation(&client, conversation_id).await?;
    let store = ConversationStore::new(DedupMatcher::new(state.dedup_window())).into_shared();
    let mut session =
        InboxSession::new(client.clone(), store).with_poll_interval(state.poll_interval());

    match state.push_url() {
        Ok(url) => {
            let push = PushConnection::new(url, client.token());
            if let Err(e) = session.attach_push(push).await {
                log::warn!("Push channel unavailable, polling only: {}", e);
            }
        }
        Err(e) => log::warn!("No push url, polling only: {}", e),
    }

    print_conversation(&conversation);
    let mut updates = session.follow(conversation).await?;
    let mut shown = HashSet::new();
    for message in session.messages(conversation_id) {
        print_message(&message);
        shown.insert(message.id);
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                // Already printed from the store above.
                Ok(update) if update.origin == Origin::History => {}
                Ok(mut update) => {
                    update.appended.sort_by_key(|m| m.timestamp);
                    for message in &update.appended {
                        if shown.insert(message.id.clone()) {
                            print_message(message);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => log::debug!("Display lagged by {} update(s)", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    session.close();
    session.detach_push();
    Ok(())
}

fn client_for(state: &AppState) -> InboxResult<ApiClient> {
    if !state.is_configured() {
        return Err(InboxError::Config(
            "no server configured; run `fleet-inbox login` first".into(),
        ));
    }
    ApiClient::new(&state.base_url, state.token.clone())
}

/// The summary feeds inheritance of status/priority into messages; fall back to a stub.
async fn find_conversation(client: &ApiClient, conversation_id: &str) -> InboxResult<Conversation> {
    let found = client
        .conversations()
        .await?
        .into_iter()
        .find(|c| c.id == conversation_id);
    Ok(found.unwrap_or_else(|| {
        log::warn!("Conversation {} not in the summary list", conversation_id);
        Conversation::placeholder(conversation_id)
    }))
}

fn print_conversation(conv: &Conversation) {
    let who = conv.customer().map(|c| c.name.as_str()).unwrap_or("-");
    println!(
        "{:<26} {:<11} {:<7} {:>3} unread  {} ({})  {}",
        conv.id,
        conv.status.as_str(),
        conv.priority.as_str(),
        conv.unread_count,
        if conv.title.is_empty() { "(sin asunto)" } else { conv.title.as_str() },
        who,
        conv.last_message.as_deref().unwrap_or(""),
    );
}

fn print_message(message: &Message) {
    println!(
        "[{}] {} ({}): {}",
        message.timestamp.format("%Y-%m-%d %H:%M:%S"),
        message.sender.name,
        message.sender.role.as_str(),
        message.text,
    );
    for attachment in &message.attachments {
        println!("    adjunto: {} <{}>", attachment.name, attachment.url);
    }
}
