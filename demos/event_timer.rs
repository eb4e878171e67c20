use cron_timer::event::EventTimer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let timer = EventTimer::new("my_timer", "*/5 * * * * *").await?;

    // Subscribe to receive timer events.
    let mut receiver = timer.subscribe();

    // Start the timer.
    timer.start().await?;
    println!("Timer started, waiting for events...");

    // Wait for the first event.
    match receiver.recv().await {
        Ok(tick) => {
            println!("Timer event received: {}", tick);
        }
        Err(e) => {
            eprintln!("Error receiving event: {}", e);
        }
    }

    // Stop the timer after receiving the first event.
    timer.stop().await?;
    println!("Timer stopped.");

    // Clean up the timer.
    // This removes it from the registry so it can no longer be looked up.
    timer.unregister().await;

    Ok(())
}
