#[derive(Debug, thiserror::Error)]
pub enum TimerError {
	#[error("Invalid cron expression: {0}")]
	InvalidExpression(#[from] cron::error::Error),
	#[error("A wait is already pending on this timer")]
	ConcurrentWait,
	#[error("Wait canceled before the next occurrence")]
	WaitCanceled,
	#[error("Timer with name '{0}' already exists")]
	TimerAlreadyExists(String),
	#[error("Timer with name '{0}' is not running")]
	TimerNotRunning(String),
}
