//! Balance and status reports.

use super::{CliError, CliResult, Format, Workspace};
use chrono::NaiveDate;
use serde::Serialize;
use tally_core::{CategoryKind, DateRange};

/// One account line of the balance report.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountBalance {
    /// Account id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current balance.
    pub balance: f64,
}

/// Result of `tally balance`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReport {
    /// Per-account balances.
    pub accounts: Vec<AccountBalance>,
    /// Initial savings, if set.
    pub initial_savings: Option<f64>,
    /// Initial savings plus every account's balance.
    pub total: f64,
}

/// Runs the balance command.
pub fn balance(workspace: &Workspace, account: Option<String>, format: Format) -> CliResult<()> {
    let ledger = workspace.ledger();

    if let Some(id) = account {
        let balance = ledger
            .account_balance(&id)?
            .ok_or(CliError::NotFound { kind: "account", id })?;
        println!("{balance:.2}");
        return Ok(());
    }

    let mut accounts = Vec::new();
    for account in ledger.accounts()? {
        let balance = ledger.account_balance(&account.id)?.unwrap_or_default();
        accounts.push(AccountBalance {
            id: account.id,
            name: account.name,
            balance,
        });
    }
    let report = BalanceReport {
        accounts,
        initial_savings: ledger.initial_savings()?.map(|s| s.amount),
        total: ledger.total_balance()?,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            for line in &report.accounts {
                println!("{:<24} {:>12.2}", line.name, line.balance);
            }
            if let Some(savings) = report.initial_savings {
                println!("{:<24} {:>12.2}", "initial savings", savings);
            }
            println!("{:<24} {:>12.2}", "total", report.total);
        }
    }
    Ok(())
}

/// Runs the category totals report.
pub fn categories(
    workspace: &Workspace,
    since: Option<NaiveDate>,
    until: Option<NaiveDate>,
    format: Format,
) -> CliResult<()> {
    let totals = workspace.ledger().category_totals(DateRange {
        start: since,
        end: until,
    })?;

    match format {
        Format::Json => {
            let json: Vec<_> = totals
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "categoryId": t.category_id,
                        "name": t.name,
                        "kind": t.kind,
                        "total": t.total,
                        "count": t.count,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        Format::Text => {
            for t in totals {
                let sign = match t.kind {
                    CategoryKind::Expense => '-',
                    CategoryKind::Income => '+',
                };
                println!("{:<24} {sign}{:>11.2} ({})", t.name, t.total, t.count);
            }
        }
    }
    Ok(())
}

/// Result of `tally status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Data directory.
    pub data_dir: String,
    /// File name of the active ledger.
    pub ledger: String,
    /// Actions applied to the ledger.
    pub actions_applied: u64,
    /// Local actions not yet pushed.
    pub pending: u64,
    /// Rows held by the mirror.
    pub mirrored: u64,
}

/// Runs the status command.
pub fn status(workspace: &Workspace, format: Format) -> CliResult<()> {
    let ledger = workspace.ledger();
    let mirror = workspace.open_mirror()?;
    let report = StatusReport {
        data_dir: workspace.path().display().to_string(),
        ledger: workspace.active_name().to_string(),
        actions_applied: ledger.actions_count()?,
        pending: ledger.local_actions_count(),
        mirrored: mirror.actions_count()?,
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        Format::Text => {
            println!("data dir:        {}", report.data_dir);
            println!("ledger:          {}", report.ledger);
            println!("actions applied: {}", report.actions_applied);
            println!("pending push:    {}", report.pending);
            println!("mirrored rows:   {}", report.mirrored);
        }
    }
    Ok(())
}
