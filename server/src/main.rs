use clap::Parser;
use log::{error, info};
use server::coordinator::MatchTiming;
use server::network::{Server, ServerConfig, ServerEvent};
use server::origin::OriginPolicy;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time 2v2 arithmetic game server")]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5050")]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Delay between a board locking and its round being scored (ms)
    #[arg(long, default_value = "150")]
    finalize_delay_ms: u64,

    /// Delay between a scored round and the team's next question (ms)
    #[arg(long, default_value = "800")]
    next_round_delay_ms: u64,

    /// Correct answers a team needs to win
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..))]
    target_correct: u32,

    /// Comma-separated browser origins allowed to open a socket; `*` allows any
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_connections: args.max_connections,
        timing: MatchTiming {
            finalize_delay: Duration::from_millis(args.finalize_delay_ms),
            next_round_delay: Duration::from_millis(args.next_round_delay_ms),
            target_correct: args.target_correct,
        },
        allowed_origins: OriginPolicy::new(&args.allowed_origins),
    };
    info!(
        "Starting server: first to {}, finalize {:?}, next round {:?}",
        config.timing.target_correct, config.timing.finalize_delay, config.timing.next_round_delay
    );

    let server = Server::bind(config).await?;
    let events = server.event_sender();
    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = events.send(ServerEvent::Shutdown);
            let _ = server_handle.await;
        }
    }

    Ok(())
}
