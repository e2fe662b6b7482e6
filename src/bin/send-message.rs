//! Send one envelope to a running agent and print the reply
//!
//! ## Usage
//!
//! ```bash
//! # Invoke a capability
//! send-message --to hello-agent --url http://localhost:8080 \
//!   --action REQUEST --payload '{"capability": "greet", "params": {"name": "X"}}'
//!
//! # Ask the built-in status responder
//! send-message --to hello-agent --action QUERY --payload '{"queryType": "status"}'
//! ```

use a2a_agent::protocol::{Envelope, MessageAction, MessagePriority};
use a2a_agent::transport::MessageAck;
use clap::Parser;
use serde_json::Value;
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "send-message",
    about = "Send a protocol message to a running agent",
    version
)]
struct Args {
    /// Receiving agent id
    #[arg(long)]
    to: String,

    /// Agent base URL
    #[arg(long, default_value = "http://localhost:8080", env = "AGENT_URL")]
    url: String,

    /// Sender id stamped on the envelope
    #[arg(long, default_value = "cli")]
    from: String,

    /// Action kind (REQUEST, QUERY, NOTIFY, ...)
    #[arg(long, default_value = "REQUEST")]
    action: MessageAction,

    /// Payload as a JSON object
    #[arg(long, default_value = "{}")]
    payload: String,

    /// Message priority
    #[arg(long, default_value = "normal")]
    priority: MessagePriority,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = send(args).await {
        eprintln!("send-message: {e}");
        process::exit(1);
    }
}

async fn send(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let payload: Value = serde_json::from_str(&args.payload)?;
    if !payload.is_object() {
        return Err("payload must be a JSON object".into());
    }
    let envelope =
        Envelope::new(args.from, args.to, args.action, payload).with_priority(args.priority);
    let url = format!("{}/message", args.url.trim_end_matches('/'));

    println!("→ {} {} ({})", envelope.action, envelope.receiver_id, envelope.message_id);

    let response = reqwest::Client::new()
        .post(&url)
        .timeout(Duration::from_secs(args.timeout))
        .json(&envelope)
        .send()
        .await?;

    let status = response.status();
    let body: Value = response.json().await?;
    if !status.is_success() {
        return Err(format!("agent answered {status}: {body}").into());
    }

    let ack: MessageAck = serde_json::from_value(body)?;
    match ack.response {
        Some(reply) => println!("{}", serde_json::to_string_pretty(&reply)?),
        None => println!("(no reply)"),
    }
    Ok(())
}
