use anyhow::{Context, Result, bail};
use chrono::{Duration, Utc};
use clap::Parser;
use futures_util::StreamExt;
use lib_polls::{BroadcastHub, MemoryPollStore, Principal, Role, TokenTable, VoteEngine};
use serde::Deserialize;
use serde_json::json;
use servers::poll_logic::routes;
use servers::poll_logic::state::{AppState, ServerStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Concurrent HTTP votes against an in-process poll server", long_about = None)]
struct Args {
    /// Number of distinct voters
    #[clap(short, long, default_value_t = 1000)]
    voters: usize,

    /// Number of poll options
    #[clap(short, long, default_value_t = 4)]
    options: usize,

    /// Requests in flight at once
    #[clap(short, long, default_value_t = 64)]
    concurrency: usize,
}

#[derive(Debug, Deserialize)]
struct PushFrame {
    #[serde(rename = "type")]
    msg_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    total_votes: u64,
    top_option_name: String,
}

fn voter_token(i: usize) -> String {
    format!("voter-{i}")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.options == 0 {
        bail!("at least one option is required");
    }

    let mut tokens = TokenTable::new().with_token(
        "admin",
        Principal {
            identity: "u-admin".into(),
            username: "admin".into(),
            role: Role::Admin,
        },
    );
    for i in 0..args.voters {
        tokens.insert(
            voter_token(i),
            Principal {
                identity: format!("u-{i}"),
                username: format!("voter{i}"),
                role: Role::User,
            },
        );
    }

    let hub = BroadcastHub::new(args.voters.max(64));
    let engine = VoteEngine::new(ServerStore::Memory(MemoryPollStore::new()), hub);
    let state = AppState::new(engine, Arc::new(tokens));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = routes::router(state.clone());
    tokio::spawn(async move { axum::serve(listener, app).await });

    let base = format!("http://{addr}");
    let client = reqwest::Client::new();
    let option_names: Vec<String> = (0..args.options).map(|i| format!("option-{i}")).collect();
    let now = Utc::now();
    let created: serde_json::Value = client
        .post(format!("{base}/api/polls"))
        .bearer_auth("admin")
        .json(&json!({
            "question": "Throughput?",
            "options": option_names,
            "startAt": now - Duration::minutes(1),
            "endAt": now + Duration::hours(1),
        }))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let poll_id = created["id"].as_str().context("poll id missing")?.to_string();

    // Viewer counting pushed snapshots
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await?;
    let (_write, mut read) = ws.split();
    let pushed = Arc::new(AtomicUsize::new(0));
    let pushed_reader = Arc::clone(&pushed);
    tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let Message::Text(text) = msg {
                if let Ok(frame) = serde_json::from_str::<PushFrame>(&text) {
                    if frame.msg_type == "pollUpdated" {
                        pushed_reader.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    });

    println!("Casting {} votes over {} options, {} in flight...", args.voters, args.options, args.concurrency);
    let permits = Arc::new(Semaphore::new(args.concurrency.max(1)));
    let started = Instant::now();
    let mut tasks = Vec::with_capacity(args.voters);
    for i in 0..args.voters {
        let permit = Arc::clone(&permits).acquire_owned().await?;
        let client = client.clone();
        let url = format!("{base}/api/polls/vote/{poll_id}");
        let option = i % args.options;
        tasks.push(tokio::spawn(async move {
            let resp = client
                .post(url)
                .bearer_auth(voter_token(i))
                .json(&json!({ "optionIndex": option }))
                .send()
                .await;
            drop(permit);
            resp.map(|r| r.status().is_success()).unwrap_or(false)
        }));
    }

    let mut accepted = 0usize;
    for task in tasks {
        if task.await.unwrap_or(false) {
            accepted += 1;
        }
    }
    let elapsed = started.elapsed();

    let stats: Stats = client
        .get(format!("{base}/api/polls/{poll_id}/stats"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    println!("\n----- Vote Throughput -----");
    println!("Accepted: {}/{}", accepted, args.voters);
    println!("Elapsed: {:.2?} ({:.0} votes/s)", elapsed, accepted as f64 / elapsed.as_secs_f64());
    println!("Stored total: {}, top option: {}", stats.total_votes, stats.top_option_name);
    println!("Pushed to viewer: {}, dropped by hub: {}", pushed.load(Ordering::Relaxed), state.hub.dropped_total());
    println!("---------------------------\n");

    if stats.total_votes != accepted as u64 {
        bail!("stored total {} differs from accepted votes {}", stats.total_votes, accepted);
    }
    Ok(())
}
