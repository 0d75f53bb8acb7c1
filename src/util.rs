use core::time::Duration;
use std::io::{self, BufRead, Write};

use tokio::time::{Instant, sleep};

/// Repeats a probe every `period` until it yields a value or `timeout` elapses.
#[derive(Debug, Clone, Copy)]
pub struct Poll {
    pub period: Duration,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct TimedOut(pub Duration);

impl core::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "not ready after {:?}", self.0)
    }
}

impl core::error::Error for TimedOut {}

impl Poll {
    pub const DEFAULT_PERIOD: Duration = Duration::from_millis(1832 / 4);

    #[inline]
    pub const fn new(timeout: Duration) -> Self {
        Self { period: Self::DEFAULT_PERIOD, timeout }
    }

    /// Runs `probe` until it returns `Ok(Some(_))`.
    ///
    /// A probe error stops polling and is returned as is; running out of time
    /// returns a [`TimedOut`] error.
    pub async fn until<T, F, Fut>(&self, mut probe: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(value) = probe().await? {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(TimedOut(self.timeout).into());
            }
            sleep(self.period).await;
        }
    }

    /// Like [`Poll::until`], but running out of time yields `None`.
    pub async fn until_or_none<T, F, Fut>(&self, probe: F) -> anyhow::Result<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        match self.until(probe).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is::<TimedOut>() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Runs `op` up to `attempts` times, sleeping `delay` between failures.
///
/// The error of the last attempt is returned once the budget is spent.
pub async fn retry<T, F, Fut>(attempts: u32, delay: Duration, what: &str, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => {
                return Err(e.context(format!("{what} failed after {attempts} attempts")));
            }
            Err(e) => {
                tracing::warn!(target: "retry", "{what} failed (attempt {attempt}/{attempts}): {e}");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Prints `prompt` and reads one trimmed line from the terminal.
pub fn prompt_line(prompt: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;

    let mut line = String::with_capacity(32);
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}
