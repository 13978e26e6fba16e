use std::fmt::Display;

use async_trait::async_trait;

/// A user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Channel the originating request came from, if any.
    pub channel: Option<String>,
    pub title: String,
    pub message: Option<String>,
    pub user: Option<String>,
}

impl Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.title)?;
        if let Some(message) = &self.message {
            write!(f, "\n{message}")?;
        }
        Ok(())
    }
}

/// Messaging port used to report results back to users.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the notice could not be delivered.
    async fn post(&self, notice: &Notice) -> anyhow::Result<()>;
}

/// Prints notices to standard output.
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn post(&self, notice: &Notice) -> anyhow::Result<()> {
        println!("{notice}");
        Ok(())
    }
}
