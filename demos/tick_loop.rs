use cron_timer::timer::CronTimer;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tick on every whole second.
    let timer = CronTimer::new("* * * * * *")?;
    let cancel = CancellationToken::new();

    println!("Waiting for three ticks...");
    for _ in 0..3 {
        if timer.wait_next_tick(&cancel).await? {
            println!("tick at {}", chrono::Utc::now());
        }
    }

    // Stop the timer; every wait from here on resolves false immediately.
    timer.stop();
    assert!(!timer.wait_next_tick(&cancel).await?);
    println!("Timer stopped.");

    Ok(())
}
