use aide::skills::SkillTable;
use aide::{EngineConfig, Runtime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = EngineConfig::from_env()?;
    let runtime = Runtime::builder(config).skills(SkillTable::bundled()).boot().await?;
    let dispatcher = runtime.dispatcher().clone();

    // Triggered packages (timer alarms) have no ticket; print them as they arrive
    dispatcher.on_response(|response| {
        if response.query.is_none() && !response.dialog().is_empty() {
            println!("{}", response.dialog());
        }
        Ok(())
    });

    tracing::info!("Type a query and press enter. Ctrl+C to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let query = line.trim();
                if query.is_empty() {
                    continue;
                }
                // One query at a time: wait for delivery before reading the next line
                match dispatcher.send_query(query).wait().await {
                    Ok(response) if response.dialog().is_empty() => println!("..."),
                    Ok(response) => println!("{}", response.dialog()),
                    Err(e) => tracing::warn!("Query failed: {}", e),
                }
            }
        }
    }

    runtime.shutdown().await;
    Ok(())
}
