use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

#[derive(Clone, Debug)]
pub struct WelcomeEmail {
    pub to: String,
    pub username: String,
}

#[async_trait]
pub trait EmailTransport: Send + Sync + 'static {
    async fn deliver(&self, from: &str, email: &WelcomeEmail) -> anyhow::Result<()>;
}

/// Default transport: records the delivery in the log. Real SMTP wiring
/// lives outside this service.
pub struct LogTransport;

#[async_trait]
impl EmailTransport for LogTransport {
    async fn deliver(&self, from: &str, email: &WelcomeEmail) -> anyhow::Result<()> {
        tracing::info!(from, to = %email.to, username = %email.username, "welcome email sent");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct MailerOptions {
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for MailerOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(8),
        }
    }
}

/// Fire-and-forget mail queue. `enqueue` never blocks and never reports
/// failure to the caller; the worker retries with backoff and eventually
/// gives up on its own.
#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::UnboundedSender<WelcomeEmail>,
}

impl Mailer {
    pub fn spawn(transport: Arc<dyn EmailTransport>, from: String, opts: MailerOptions) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WelcomeEmail>();

        tokio::spawn(async move {
            while let Some(email) = rx.recv().await {
                let mut delay = opts.retry_base_delay;
                let max_attempts = opts.max_attempts.max(1);

                for attempt in 1..=max_attempts {
                    match transport.deliver(&from, &email).await {
                        Ok(()) => {
                            debug!(to = %email.to, attempt, "welcome email delivered");
                            break;
                        },
                        Err(err) if attempt < max_attempts => {
                            warn!(to = %email.to, attempt, error = %err, "welcome email failed, retrying");
                            tokio::time::sleep(delay).await;
                            delay = (delay * 2).min(opts.retry_max_delay);
                        },
                        Err(err) => {
                            error!(to = %email.to, error = %err, "giving up on welcome email");
                        },
                    }
                }
            }
        });

        Self { tx }
    }

    pub fn enqueue(&self, email: WelcomeEmail) {
        if self.tx.send(email).is_err() {
            warn!("mail worker is gone, dropping welcome email");
        }
    }
}
