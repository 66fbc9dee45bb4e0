use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Parser, Debug)]
#[command(name = "stardeck")]
#[command(about = "Stardeck sheet server and watch client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a sheet and print live edits as they arrive
    Watch {
        /// Sheet server URL (e.g., ws://localhost:3000)
        #[arg(short, long, default_value = "ws://localhost:3000")]
        url: String,

        /// Sheet UUID to watch
        #[arg(short, long)]
        sheet: String,
    },
}

/// Connect to a running server, join the sheet, and stream its traffic to
/// stdout until the connection closes.
pub async fn run_watch_client(url: String, sheet: String) -> Result<()> {
    let ws_url = format!("{}/ws", url.trim_end_matches('/'));

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            return Err(anyhow::anyhow!("connection to {} failed: {}", ws_url, e));
        }
        Err(_) => {
            return Err(anyhow::anyhow!(
                "connection timeout - is the sheet server running?"
            ));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let join = ClientMessage::Join {
        uuid: sheet.clone(),
    };
    write
        .send(Message::Text(serde_json::to_string(&join)?.into()))
        .await?;
    debug!("joined sheet {}", sheet);

    while let Some(msg) = read.next().await {
        match msg? {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text)? {
                ServerMessage::Init { data } => {
                    println!("-- sheet {} --", sheet);
                    for (field, value) in &data {
                        if let Some(value) = value.as_str() {
                            if !value.is_empty() {
                                println!("{}: {}", field, value);
                            }
                        }
                    }
                }
                ServerMessage::Update { field, value } => {
                    println!("{} = {:?}", field, value);
                }
                ServerMessage::Error { message } => {
                    eprintln!("server error: {}", message);
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    Ok(())
}
