//! Account, transfer, category and savings commands.
//!
//! Every mutation becomes one local action stamped with the current time.
//! Updates start from the stored record, so only the flags given change.

use super::{apply, CliError, CliResult, Format, Workspace};
use chrono::{NaiveDate, Utc};
use clap::{Subcommand, ValueEnum};
use tally_core::{
    Account, Action, Category, CategoryKind, DateRange, Deletion, InitialSavings, Transfer,
    TransferFilter,
};

/// `tally account ...`
#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Create an account
    Create {
        /// Display name
        #[arg(long)]
        name: String,

        /// Balance before any transfer
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        initial_balance: f64,

        /// Id to use instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },

    /// Change an account
    Update {
        /// Account id
        id: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New initial balance
        #[arg(long, allow_negative_numbers = true)]
        initial_balance: Option<f64>,
    },

    /// List accounts with their balances
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

/// `tally transfer ...`
#[derive(Subcommand, Debug)]
pub enum TransferCommand {
    /// Record an expense, income or transfer between accounts
    Create {
        /// Account the money leaves
        #[arg(long)]
        from: Option<String>,

        /// Account the money arrives in
        #[arg(long)]
        to: Option<String>,

        /// Amount, greater than zero
        #[arg(long)]
        amount: f64,

        /// Booking date (YYYY-MM-DD), today if omitted
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Free-text description
        #[arg(long, default_value = "")]
        description: String,

        /// Category id
        #[arg(long)]
        category: Option<String>,

        /// Id to use instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },

    /// Change a transfer
    Update {
        /// Transfer id
        id: String,

        /// New source account
        #[arg(long)]
        from: Option<String>,

        /// New destination account
        #[arg(long)]
        to: Option<String>,

        /// New amount
        #[arg(long)]
        amount: Option<f64>,

        /// New booking date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// New category id
        #[arg(long, conflicts_with = "no_category")]
        category: Option<String>,

        /// Remove the category
        #[arg(long)]
        no_category: bool,
    },

    /// Delete a transfer
    Delete {
        /// Transfer id
        id: String,
    },

    /// List transfers, newest first
    List {
        /// Only transfers touching this account
        #[arg(long)]
        account: Option<String>,

        /// Only transfers in this category
        #[arg(long)]
        category: Option<String>,

        /// First date included
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Last date included
        #[arg(long)]
        until: Option<NaiveDate>,

        /// Include deleted transfers
        #[arg(long)]
        deleted: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

/// Category kind as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Spending category
    Expense,
    /// Earnings category
    Income,
}

impl From<KindArg> for CategoryKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Expense => CategoryKind::Expense,
            KindArg::Income => CategoryKind::Income,
        }
    }
}

/// `tally category ...`
#[derive(Subcommand, Debug)]
pub enum CategoryCommand {
    /// Create a category
    Create {
        /// Display name
        #[arg(long)]
        name: String,

        /// Expense or income
        #[arg(long, value_enum, default_value_t = KindArg::Expense)]
        kind: KindArg,

        /// Id to use instead of a generated one
        #[arg(long)]
        id: Option<String>,
    },

    /// Change a category
    Update {
        /// Category id
        id: String,

        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New kind
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
    },

    /// Delete a category
    Delete {
        /// Category id
        id: String,
    },

    /// List live categories
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

/// `tally savings ...`
#[derive(Subcommand, Debug)]
pub enum SavingsCommand {
    /// Set the savings held before tracking started
    Set {
        /// Amount
        #[arg(allow_negative_numbers = true)]
        amount: f64,
    },
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Runs an account command.
pub fn account(workspace: &Workspace, command: AccountCommand) -> CliResult<()> {
    let ledger = workspace.ledger();
    match command {
        AccountCommand::Create {
            name,
            initial_balance,
            id,
        } => {
            let account = Account {
                id: id.unwrap_or_else(new_id),
                name,
                initial_balance,
                modified_at: Utc::now(),
            };
            apply(workspace, Action::create_account(&account)?)?;
            println!("{}", account.id);
        }
        AccountCommand::Update {
            id,
            name,
            initial_balance,
        } => {
            let mut account = ledger.account(&id)?.ok_or(CliError::NotFound {
                kind: "account",
                id,
            })?;
            if let Some(name) = name {
                account.name = name;
            }
            if let Some(balance) = initial_balance {
                account.initial_balance = balance;
            }
            account.modified_at = Utc::now();
            apply(workspace, Action::update_account(&account)?)?;
        }
        AccountCommand::List { format } => {
            let mut rows = Vec::new();
            for account in ledger.accounts()? {
                let balance = ledger.account_balance(&account.id)?.unwrap_or_default();
                rows.push((account, balance));
            }
            match format {
                Format::Json => {
                    let json: Vec<_> = rows
                        .iter()
                        .map(|(account, balance)| {
                            serde_json::json!({
                                "id": account.id,
                                "name": account.name,
                                "initialBalance": account.initial_balance,
                                "balance": balance,
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                Format::Text => {
                    for (account, balance) in rows {
                        println!("{}\t{}\t{balance:.2}", account.id, account.name);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Runs a transfer command.
pub fn transfer(workspace: &Workspace, command: TransferCommand) -> CliResult<()> {
    let ledger = workspace.ledger();
    match command {
        TransferCommand::Create {
            from,
            to,
            amount,
            date,
            description,
            category,
            id,
        } => {
            let transfer = Transfer {
                id: id.unwrap_or_else(new_id),
                from,
                to,
                amount,
                date: date.unwrap_or_else(|| Utc::now().date_naive()),
                description,
                category_id: category,
                modified_at: Utc::now(),
                deleted: false,
            };
            apply(workspace, Action::create_transfer(&transfer)?)?;
            println!("{}", transfer.id);
        }
        TransferCommand::Update {
            id,
            from,
            to,
            amount,
            date,
            description,
            category,
            no_category,
        } => {
            let mut transfer = ledger.transfer(&id)?.ok_or(CliError::NotFound {
                kind: "transfer",
                id,
            })?;
            if from.is_some() {
                transfer.from = from;
            }
            if to.is_some() {
                transfer.to = to;
            }
            if let Some(amount) = amount {
                transfer.amount = amount;
            }
            if let Some(date) = date {
                transfer.date = date;
            }
            if let Some(description) = description {
                transfer.description = description;
            }
            if no_category {
                transfer.category_id = None;
            } else if category.is_some() {
                transfer.category_id = category;
            }
            transfer.modified_at = Utc::now();
            apply(workspace, Action::update_transfer(&transfer)?)?;
        }
        TransferCommand::Delete { id } => {
            if ledger.transfer(&id)?.is_none() {
                return Err(CliError::NotFound {
                    kind: "transfer",
                    id,
                });
            }
            let deletion = Deletion {
                id,
                modified_at: Utc::now(),
            };
            apply(workspace, Action::delete_transfer(&deletion)?)?;
        }
        TransferCommand::List {
            account,
            category,
            since,
            until,
            deleted,
            format,
        } => {
            let mut filter = TransferFilter::new()
                .range(DateRange {
                    start: since,
                    end: until,
                })
                .include_deleted(deleted);
            if let Some(account) = account {
                filter = filter.account(account);
            }
            if let Some(category) = category {
                filter = filter.category(category);
            }

            let transfers = ledger.transfers(&filter)?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&transfers)?),
                Format::Text => {
                    for t in transfers {
                        println!(
                            "{}\t{}\t{}\t{}\t{:.2}\t{}\t{}{}",
                            t.id,
                            t.date,
                            t.from.as_deref().unwrap_or("-"),
                            t.to.as_deref().unwrap_or("-"),
                            t.amount,
                            t.category_id.as_deref().unwrap_or("-"),
                            t.description,
                            if t.deleted { "\t(deleted)" } else { "" }
                        );
                    }
                }
            }
        }
    }
    Ok(())
}

/// Runs a category command.
pub fn category(workspace: &Workspace, command: CategoryCommand) -> CliResult<()> {
    let ledger = workspace.ledger();
    match command {
        CategoryCommand::Create { name, kind, id } => {
            let category = Category {
                id: id.unwrap_or_else(new_id),
                name,
                kind: kind.into(),
                modified_at: Utc::now(),
                deleted: false,
            };
            apply(workspace, Action::create_category(&category)?)?;
            println!("{}", category.id);
        }
        CategoryCommand::Update { id, name, kind } => {
            let mut category = ledger.category(&id)?.ok_or(CliError::NotFound {
                kind: "category",
                id,
            })?;
            if let Some(name) = name {
                category.name = name;
            }
            if let Some(kind) = kind {
                category.kind = kind.into();
            }
            category.modified_at = Utc::now();
            apply(workspace, Action::update_category(&category)?)?;
        }
        CategoryCommand::Delete { id } => {
            if ledger.category(&id)?.is_none() {
                return Err(CliError::NotFound {
                    kind: "category",
                    id,
                });
            }
            let deletion = Deletion {
                id,
                modified_at: Utc::now(),
            };
            apply(workspace, Action::delete_category(&deletion)?)?;
        }
        CategoryCommand::List { format } => {
            let categories = ledger.categories()?;
            match format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&categories)?),
                Format::Text => {
                    for c in categories {
                        let kind = match c.kind {
                            CategoryKind::Expense => "expense",
                            CategoryKind::Income => "income",
                        };
                        println!("{}\t{}\t{kind}", c.id, c.name);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Runs a savings command.
pub fn savings(workspace: &Workspace, command: SavingsCommand) -> CliResult<()> {
    match command {
        SavingsCommand::Set { amount } => {
            let savings = InitialSavings {
                amount,
                modified_at: Utc::now(),
            };
            apply(workspace, Action::update_initial_savings(&savings)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        (dir, workspace)
    }

    #[test]
    fn update_keeps_fields_not_given() {
        let (_dir, ws) = workspace();
        account(
            &ws,
            AccountCommand::Create {
                name: "Checking".into(),
                initial_balance: 250.0,
                id: Some("checking".into()),
            },
        )
        .unwrap();
        account(
            &ws,
            AccountCommand::Update {
                id: "checking".into(),
                name: Some("Main".into()),
                initial_balance: None,
            },
        )
        .unwrap();

        let stored = ws.ledger().account("checking").unwrap().unwrap();
        assert_eq!(stored.name, "Main");
        assert_eq!(stored.initial_balance, 250.0);
        assert_eq!(ws.ledger().local_actions_count(), 2);
    }

    #[test]
    fn rejected_transfer_is_an_error() {
        let (_dir, ws) = workspace();
        let err = transfer(
            &ws,
            TransferCommand::Create {
                from: Some("nowhere".into()),
                to: None,
                amount: 5.0,
                date: None,
                description: String::new(),
                category: None,
                id: None,
            },
        )
        .unwrap_err();

        assert!(matches!(err, CliError::Rejected(_)));
        assert_eq!(ws.ledger().actions_count().unwrap(), 0);
    }

    #[test]
    fn delete_unknown_category_is_not_found() {
        let (_dir, ws) = workspace();
        let err = category(&ws, CategoryCommand::Delete { id: "x".into() }).unwrap_err();
        assert_eq!(err.to_string(), "category not found: x");
    }

    #[test]
    fn transfer_lifecycle() {
        let (_dir, ws) = workspace();
        account(
            &ws,
            AccountCommand::Create {
                name: "Cash".into(),
                initial_balance: 40.0,
                id: Some("cash".into()),
            },
        )
        .unwrap();
        transfer(
            &ws,
            TransferCommand::Create {
                from: Some("cash".into()),
                to: None,
                amount: 15.0,
                date: NaiveDate::from_ymd_opt(2024, 3, 1),
                description: "books".into(),
                category: None,
                id: Some("books".into()),
            },
        )
        .unwrap();
        assert_eq!(ws.ledger().account_balance("cash").unwrap(), Some(25.0));

        transfer(&ws, TransferCommand::Delete { id: "books".into() }).unwrap();
        assert_eq!(ws.ledger().account_balance("cash").unwrap(), Some(40.0));
        assert!(ws.ledger().transfer("books").unwrap().unwrap().deleted);
    }
}
