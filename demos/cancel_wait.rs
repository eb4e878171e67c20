use std::time::Duration;

use cron_timer::error::TimerError;
use cron_timer::timer::CronTimer;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tick at the top of every hour.
    let timer = CronTimer::new("0 0 * * * *")?;
    let cancel = CancellationToken::new();

    // Give up on this particular wait after 300ms.
    let canceler = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceler.cancel();
    });

    match timer.wait_next_tick(&cancel).await {
        Err(TimerError::WaitCanceled) => println!("Wait canceled; the timer keeps running."),
        Ok(true) => println!("Tick."),
        Ok(false) => println!("Timer stopped."),
        Err(e) => eprintln!("Wait failed: {}", e),
    }

    // Cancellation is scoped to the one call; the schedule is untouched.
    println!("Next occurrence: {:?}", timer.next_occurrence());
    timer.stop();

    Ok(())
}
