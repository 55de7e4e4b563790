//! muxlink - remote terminal-multiplexer client
//!
//! Headless frontend for the client core: connects to the service, selects a
//! session and streams polled output to stdout. Richer frontends consume the
//! same `muxlink_client` crate and read the same model.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use url::Url;

use muxlink_client::cli::Args;
use muxlink_client::{Client, ConnectionConfig, Preferences, ReconcilerConfig};
use muxlink_protocol::MessageKind;
use muxlink_utils::{init_logging_with_config, LogConfig, MuxlinkError, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    init_logging_with_config(LogConfig::client())?;
    tracing::info!("muxlink client starting");

    match run(args).await {
        Ok(()) => {
            tracing::info!("muxlink client exiting normally");
            Ok(())
        }
        Err(e) => {
            tracing::error!("muxlink client error: {}", e);
            eprintln!("Error: {}", e);
            Err(e)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut prefs = Preferences::load();

    // An explicitly given endpoint becomes the saved default
    if args.server.is_some() && args.server != prefs.server.url {
        prefs.server.url = args.server.clone();
        if let Err(e) = prefs.save() {
            tracing::warn!(error = %e, "failed to persist server preference");
        }
    }

    let url = args.resolve_url(&prefs);
    Url::parse(&url)
        .map_err(|e| MuxlinkError::config(format!("invalid server URL '{url}': {e}")))?;

    let mut connection_config = ConnectionConfig::new(url);
    connection_config.token = args.resolve_token(&prefs);

    let mut client = Client::new(
        connection_config,
        ReconcilerConfig::default(),
        prefs.scrollback(),
    );

    // Flipped by a subscriber once this invocation has nothing left to do
    let done = Arc::new(AtomicBool::new(false));

    let wanted = if args.list { None } else { args.session.clone() };
    match wanted {
        Some(name) => {
            // Watch mode: select the session as soon as a list shows it
            let done = done.clone();
            client.on(
                MessageKind::ListSessionsResponse,
                Box::new(move |reconciler, _| {
                    if reconciler.model().selected_session.is_some() {
                        return;
                    }
                    if reconciler.model().sessions.iter().any(|s| s.name == name) {
                        reconciler.select_session(&name);
                    } else {
                        eprintln!("session '{name}' not found on server");
                        done.store(true, Ordering::Relaxed);
                    }
                }),
            );
        }
        None => {
            // List mode: print the first session list and exit
            let done = done.clone();
            client.on(
                MessageKind::ListSessionsResponse,
                Box::new(move |reconciler, _| {
                    let sessions = &reconciler.model().sessions;
                    if sessions.is_empty() {
                        println!("no sessions");
                    }
                    for session in sessions {
                        println!(
                            "{}\t{} window(s)\t{}",
                            session.name,
                            session.windows.len(),
                            if session.attached { "attached" } else { "detached" }
                        );
                    }
                    done.store(true, Ordering::Relaxed);
                }),
            );
        }
    }

    client.connect().await?;

    let mut printed_revision = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                client.disconnect();
                break;
            }
            alive = client.step() => {
                if !alive {
                    break;
                }
                if done.load(Ordering::Relaxed) {
                    client.disconnect();
                    break;
                }

                if let Some(error) = client.reconciler().last_error().map(str::to_string) {
                    eprintln!("error: {error}");
                    client.reconciler_mut().clear_error();
                }

                let model = client.model();
                if model.render_revision != printed_revision {
                    printed_revision = model.render_revision;
                    // Repaint with the latest capture
                    print!("\x1b[2J\x1b[H{}", model.rendered_output);
                    let _ = std::io::stdout().flush();
                }
            }
        }
    }

    Ok(())
}
