//! Per-command handlers.
//!
//! Every handler runs its checks before it writes, so a rejected action
//! leaves nothing behind in the transaction.

use super::{load, to_cbor};
use crate::action::{Action, Command, DecodeError};
use crate::entity::{Account, Category, Deletion, Record, Transfer};
use crate::error::{CoreError, EntityConflict, Rejection, ValidationError};
use crate::kv::Txn;
use crate::types::Timestamp;
use crate::validate;

/// Why an action did not apply.
#[derive(Debug)]
pub(super) enum ApplyError {
    /// Soft: skip this action, keep going.
    Rejected(Rejection),
    /// Hard: abort the batch.
    Fatal(CoreError),
}

impl From<CoreError> for ApplyError {
    fn from(err: CoreError) -> Self {
        Self::Fatal(err)
    }
}

impl From<ValidationError> for ApplyError {
    fn from(err: ValidationError) -> Self {
        Self::Rejected(err.into())
    }
}

impl From<EntityConflict> for ApplyError {
    fn from(err: EntityConflict) -> Self {
        Self::Rejected(err.into())
    }
}

impl From<DecodeError> for ApplyError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnsupportedVersion { .. } => Self::Fatal(err.into()),
            DecodeError::Payload(message) => ValidationError::Payload(message).into(),
        }
    }
}

type ApplyResult = Result<(), ApplyError>;

/// Applies one action to the transaction.
pub(super) fn apply(txn: &mut Txn<'_>, action: &Action) -> ApplyResult {
    match action.command()? {
        Command::CreateAccount(account) => {
            validate::account(&account)?;
            create_once(txn, &account)
        }
        Command::UpdateAccount(account) => {
            validate::account(&account)?;
            replace_if_newer(txn, &account)
        }
        Command::CreateTransfer(transfer) => {
            validate::transfer(&transfer)?;
            check_references(txn, &transfer)?;
            create_once(txn, &Transfer { deleted: false, ..transfer })
        }
        Command::UpdateTransfer(transfer) => {
            validate::transfer(&transfer)?;
            check_references(txn, &transfer)?;
            replace_if_newer(txn, &Transfer { deleted: false, ..transfer })
        }
        Command::DeleteTransfer(deletion) => {
            validate::deletion(&deletion)?;
            soft_delete::<Transfer>(txn, &deletion)
        }
        Command::CreateCategory(category) => {
            validate::category(&category)?;
            create_once(txn, &Category { deleted: false, ..category })
        }
        Command::UpdateCategory(category) => {
            validate::category(&category)?;
            replace_if_newer(txn, &Category { deleted: false, ..category })
        }
        Command::DeleteCategory(deletion) => {
            validate::deletion(&deletion)?;
            soft_delete::<Category>(txn, &deletion)
        }
        Command::UpdateInitialSavings(savings) => {
            validate::initial_savings(&savings)?;
            upsert_if_newer(txn, &savings)
        }
    }
}

/// Records that can be flagged deleted.
trait SoftDelete: Record {
    fn mark_deleted(&mut self, at: Timestamp);
}

impl SoftDelete for Transfer {
    fn mark_deleted(&mut self, at: Timestamp) {
        self.deleted = true;
        self.modified_at = at;
    }
}

impl SoftDelete for Category {
    fn mark_deleted(&mut self, at: Timestamp) {
        self.deleted = true;
        self.modified_at = at;
    }
}

fn put<E: Record>(txn: &mut Txn<'_>, record: &E) -> ApplyResult {
    txn.put(E::TABLE, record.id(), to_cbor(record)?);
    Ok(())
}

fn create_once<E: Record>(txn: &mut Txn<'_>, record: &E) -> ApplyResult {
    if txn.get(E::TABLE, record.id()).is_some() {
        return Err(EntityConflict::AlreadyExists {
            kind: E::KIND,
            id: record.id().to_string(),
        }
        .into());
    }
    put(txn, record)
}

fn ensure_newer<E: Record>(stored: &E, incoming: Timestamp) -> ApplyResult {
    if incoming <= stored.modified_at() {
        return Err(EntityConflict::Stale {
            kind: E::KIND,
            id: stored.id().to_string(),
            stored: stored.modified_at(),
            incoming,
        }
        .into());
    }
    Ok(())
}

fn existing<E: Record>(txn: &Txn<'_>, id: &str) -> Result<E, ApplyError> {
    load::<E>(txn, id)?.ok_or_else(|| {
        ValidationError::NotFound {
            kind: E::KIND,
            id: id.to_string(),
        }
        .into()
    })
}

fn replace_if_newer<E: Record>(txn: &mut Txn<'_>, record: &E) -> ApplyResult {
    let stored = existing::<E>(txn, record.id())?;
    ensure_newer(&stored, record.modified_at())?;
    put(txn, record)
}

fn upsert_if_newer<E: Record>(txn: &mut Txn<'_>, record: &E) -> ApplyResult {
    if let Some(stored) = load::<E>(txn, record.id())? {
        ensure_newer(&stored, record.modified_at())?;
    }
    put(txn, record)
}

fn soft_delete<E: SoftDelete>(txn: &mut Txn<'_>, deletion: &Deletion) -> ApplyResult {
    let mut stored = existing::<E>(txn, &deletion.id)?;
    ensure_newer(&stored, deletion.modified_at)?;
    stored.mark_deleted(deletion.modified_at);
    put(txn, &stored)
}

/// Referenced accounts and category must exist. Nothing is ever physically
/// removed, so a reference that resolves once resolves on every replay.
fn check_references(txn: &Txn<'_>, transfer: &Transfer) -> ApplyResult {
    for account_id in [&transfer.from, &transfer.to].into_iter().flatten() {
        existing::<Account>(txn, account_id)?;
    }
    if let Some(category_id) = &transfer.category_id {
        existing::<Category>(txn, category_id)?;
    }
    Ok(())
}
