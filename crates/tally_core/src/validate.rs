//! Business-rule checks for decoded payloads.
//!
//! Shape (required fields, enum membership, date formats) is enforced by
//! serde while decoding a [`crate::Command`]. The functions here cover what
//! serde cannot: ranges, lengths and cross-field rules. Checks that need the
//! stored state (referenced accounts and categories) live with the handlers.

use crate::entity::{Account, Category, Deletion, InitialSavings, Transfer};
use crate::error::ValidationError;

/// Longest id accepted.
pub const MAX_ID_LEN: usize = 64;
/// Longest account or category name accepted.
pub const MAX_NAME_LEN: usize = 100;
/// Longest transfer description accepted.
pub const MAX_DESCRIPTION_LEN: usize = 500;

type Check = Result<(), ValidationError>;

/// Ids must be non-empty, untrimmed-equal and bounded.
pub fn id(field: &'static str, value: &str) -> Check {
    if value.is_empty() {
        return Err(ValidationError::field(field, "must not be empty"));
    }
    if value.trim() != value {
        return Err(ValidationError::field(
            field,
            "must not have surrounding whitespace",
        ));
    }
    if value.chars().count() > MAX_ID_LEN {
        return Err(ValidationError::field(
            field,
            format!("longer than {MAX_ID_LEN} characters"),
        ));
    }
    Ok(())
}

fn name(value: &str) -> Check {
    if value.trim().is_empty() {
        return Err(ValidationError::field("name", "must not be blank"));
    }
    if value.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::field(
            "name",
            format!("longer than {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(())
}

fn finite(field: &'static str, value: f64) -> Check {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::field(field, "must be a finite number"))
    }
}

/// Validates an account payload.
pub fn account(account: &Account) -> Check {
    id("id", &account.id)?;
    name(&account.name)?;
    finite("initialBalance", account.initial_balance)
}

/// Validates a transfer payload without looking at stored state.
pub fn transfer(transfer: &Transfer) -> Check {
    id("id", &transfer.id)?;
    finite("amount", transfer.amount)?;
    if transfer.amount <= 0.0 {
        return Err(ValidationError::field("amount", "must be greater than zero"));
    }

    match (&transfer.from, &transfer.to) {
        (None, None) => {
            return Err(ValidationError::field(
                "from",
                "either from or to must be set",
            ))
        }
        (Some(from), Some(to)) if from == to => {
            return Err(ValidationError::field("to", "must differ from from"));
        }
        _ => {}
    }
    if let Some(from) = &transfer.from {
        id("from", from)?;
    }
    if let Some(to) = &transfer.to {
        id("to", to)?;
    }
    if let Some(category_id) = &transfer.category_id {
        id("categoryId", category_id)?;
    }

    if transfer.description.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::field(
            "description",
            format!("longer than {MAX_DESCRIPTION_LEN} characters"),
        ));
    }
    Ok(())
}

/// Validates a category payload.
pub fn category(category: &Category) -> Check {
    id("id", &category.id)?;
    name(&category.name)
}

/// Validates a delete payload.
pub fn deletion(deletion: &Deletion) -> Check {
    id("id", &deletion.id)
}

/// Validates the initial-savings payload.
pub fn initial_savings(savings: &InitialSavings) -> Check {
    finite("amount", savings.amount)
}
