// File: manager/src/restore/confirm.rs
use async_trait::async_trait;
use std::io::{BufRead, Write};

/// Operator confirmation before production is replaced
#[async_trait]
pub trait Confirmer: Send + Sync {
    async fn confirm(&self, database: &str, prompt: &str) -> bool;
}

/// Asks on the terminal; the operator must type the database name
pub struct TerminalConfirmer;

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, database: &str, prompt: &str) -> bool {
        let database = database.to_string();
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(
                stderr,
                "{}\nType the database name '{}' to continue: ",
                prompt, database
            );
            let _ = stderr.flush();

            let mut answer = String::new();
            match std::io::stdin().lock().read_line(&mut answer) {
                Ok(_) => answer.trim() == database,
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }
}

/// Fixed answer, for non-interactive callers and tests
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirmer for AutoConfirm {
    async fn confirm(&self, _database: &str, _prompt: &str) -> bool {
        self.0
    }
}
