use std::net::SocketAddr;
use std::time::Duration;

use jobload_testserver::{MockBehavior, MockPipeline, StreamScript};
use tokio::net::TcpListener;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut bind_addr: SocketAddr = "127.0.0.1:0".parse()?;
    let mut behavior = MockBehavior::default();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .ok_or_else(|| anyhow::anyhow!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--bind" => bind_addr = value("--bind")?.parse()?,
            "--script" => behavior.script = value("--script")?.parse::<StreamScript>()?,
            "--event-delay-ms" => {
                behavior.event_delay = Duration::from_millis(value("--event-delay-ms")?.parse()?);
            }
            "--pending-polls" => behavior.pending_polls = value("--pending-polls")?.parse()?,
            "--keepalive" => behavior.keepalive = true,
            "--unhealthy" => behavior.unhealthy = true,
            "-h" | "--help" => {
                eprintln!(
                    "jobload-testserver\n\nUSAGE:\n  jobload-testserver [--bind 127.0.0.1:0] [--script complete|partial|duplicates|no-reward|failed|hang|pending|wrong-content-type]\n                     [--event-delay-ms 5] [--pending-polls 1] [--keepalive] [--unhealthy]\n\nOUTPUT:\n  Prints HTTP_URL=<url> to stdout once ready."
                );
                return Ok(());
            }
            other => {
                return Err(anyhow::anyhow!("unknown argument: {other}"));
            }
        }
    }

    let listener = TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    let app = jobload_testserver::router(MockPipeline::new(behavior));

    println!("HTTP_URL=http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
