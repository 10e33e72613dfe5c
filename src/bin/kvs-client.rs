//! Command-line client for a running cluster.
//!
//! Talks the binary wire protocol against any node. When the addressed node
//! does not own the key it answers with a redirect carrying the responsible
//! endpoint; the client retries there, so any node can serve as the entry
//! point into the ring.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

use chord_kvs::net::{OpCode, PeerClient, Request, Response, Status};

/// How many redirect hops to chase before giving up. Topology changes can
/// bounce a request once or twice; more than that means the ring is sick.
const MAX_REDIRECTS: usize = 4;

#[derive(Parser, Debug)]
#[command(name = "kvs-client", about = "Key-value store client")]
struct Args {
    /// Server host.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// Server port.
    #[arg(short = 'p', long = "port", default_value_t = 8001)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a key-value pair.
    Put { key: String, value: String },
    /// Retrieve the value for a key.
    Get { key: String },
    /// Delete a key.
    Delete { key: String },
    /// Check server connectivity.
    Ping,
    /// Show the addressed node's identity and ring neighbors.
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let endpoint = format!("{}:{}", args.host, args.port);
    let client = PeerClient::default();

    match run(&client, &endpoint, &args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(client: &PeerClient, endpoint: &str, command: &Command) -> Result<(), String> {
    match command {
        Command::Put { key, value } => {
            let request = Request::new(
                OpCode::Put,
                key.as_bytes().to_vec(),
                value.as_bytes().to_vec(),
            );
            let response = call_following_redirects(client, endpoint, request).await?;
            match response.status {
                Status::Success => {
                    println!("OK");
                    Ok(())
                }
                status => Err(format!("put failed: {:?}", status)),
            }
        }

        Command::Get { key } => {
            let request = Request::new(OpCode::Get, key.as_bytes().to_vec(), Vec::new());
            let response = call_following_redirects(client, endpoint, request).await?;
            match response.status {
                Status::Success => {
                    println!("{}", String::from_utf8_lossy(&response.value));
                    Ok(())
                }
                Status::KeyNotFound => Err(format!("key '{}' not found", key)),
                status => Err(format!("get failed: {:?}", status)),
            }
        }

        Command::Delete { key } => {
            let request = Request::new(OpCode::Delete, key.as_bytes().to_vec(), Vec::new());
            let response = call_following_redirects(client, endpoint, request).await?;
            match response.status {
                Status::Success => {
                    println!("OK");
                    Ok(())
                }
                Status::KeyNotFound => Err(format!("key '{}' not found", key)),
                status => Err(format!("delete failed: {:?}", status)),
            }
        }

        Command::Ping => match client.ping(endpoint).await {
            Ok(()) => {
                println!("PONG");
                Ok(())
            }
            Err(e) => Err(format!("ping failed: {}", e)),
        },

        Command::Info => {
            let node = client
                .node_info(endpoint)
                .await
                .map_err(|e| format!("info failed: {}", e))?;
            println!("node: {}", node);

            let successor = client
                .get_successor(&node)
                .await
                .map_err(|e| format!("successor lookup failed: {}", e))?;
            println!("successor: {}", successor);

            match client.get_predecessor(&node).await {
                Ok(Some(predecessor)) => println!("predecessor: {}", predecessor),
                Ok(None) => println!("predecessor: (none)"),
                Err(e) => return Err(format!("predecessor lookup failed: {}", e)),
            }
            Ok(())
        }
    }
}

/// Issues `request`, chasing redirects to the responsible node.
async fn call_following_redirects(
    client: &PeerClient,
    endpoint: &str,
    request: Request,
) -> Result<Response, String> {
    let mut target = endpoint.to_string();

    for _ in 0..=MAX_REDIRECTS {
        let response = client
            .call(&target, request.clone())
            .await
            .map_err(|e| e.to_string())?;

        if response.status != Status::Redirect {
            return Ok(response);
        }

        target = String::from_utf8(response.value)
            .map_err(|_| "redirect carried a non-ascii endpoint".to_string())?;
        eprintln!("redirected to {}", target);
    }

    Err(format!("gave up after {} redirects", MAX_REDIRECTS))
}
