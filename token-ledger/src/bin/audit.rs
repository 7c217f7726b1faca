//! Ledger audit binary
//!
//! Recomputes balances from ledger rows and reports any user whose stored
//! aggregate disagrees.
//!
//! ```text
//! ledger-audit [--config <path>] [user_id ...]
//! ```

use anyhow::Context;
use token_ledger::{Config, TokenLedger, UserId};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = std::env::args().skip(1).peekable();

    let config = if args.peek().map(String::as_str) == Some("--config") {
        args.next();
        let path = args.next().context("--config requires a path")?;
        Config::from_file(&path).with_context(|| format!("loading {}", path))?
    } else {
        Config::from_env()?
    };

    let users = args
        .map(|arg| {
            arg.parse::<u64>()
                .map(UserId::new)
                .with_context(|| format!("invalid user id: {}", arg))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        data_dir = ?config.data_dir,
        "Starting ledger audit"
    );

    let ledger = TokenLedger::open(&config)?;
    let users = if users.is_empty() {
        ledger.known_users()?
    } else {
        users
    };

    let mut violations = 0usize;
    for user_id in &users {
        let report = ledger.verify_conservation(*user_id)?;
        if report.holds() {
            tracing::debug!(
                user_id = %user_id,
                balance = report.balance.balance,
                rows = report.transaction_count,
                "Balance consistent"
            );
        } else {
            violations += 1;
            tracing::error!(
                user_id = %user_id,
                stored = report.balance.balance,
                recomputed = report.applied_sum,
                total_earned = report.balance.total_earned,
                expected_earned = report.expected_earned,
                total_spent = report.balance.total_spent,
                expected_spent = report.expected_spent,
                "Conservation violated"
            );
        }
    }

    tracing::info!(users = users.len(), violations, "Ledger audit finished");

    if violations > 0 {
        anyhow::bail!("{} of {} balances inconsistent", violations, users.len());
    }
    Ok(())
}
