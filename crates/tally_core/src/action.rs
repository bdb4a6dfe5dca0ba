//! Actions: versioned, typed, immutable facts describing one ledger mutation.
//!
//! An [`Action`] is the wire envelope `{version, type, payload}` exactly as it
//! is queued locally, mirrored, and stored in the shared log. Handlers never
//! look at the raw payload; they decode it into a [`Command`] first.

use crate::entity::{Account, Category, Deletion, InitialSavings, Transfer};
use crate::error::{CoreError, CoreResult};
use crate::types::EntityKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Schema version written by this build.
pub const ACTION_VERSION: u32 = 1;

/// The closed set of action types.
///
/// Serde names are the on-the-wire `type` strings; anything else fails to
/// decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    /// `accounts/create`
    #[serde(rename = "accounts/create")]
    AccountsCreate,
    /// `accounts/update`
    #[serde(rename = "accounts/update")]
    AccountsUpdate,
    /// `transfers/create`
    #[serde(rename = "transfers/create")]
    TransfersCreate,
    /// `transfers/update`
    #[serde(rename = "transfers/update")]
    TransfersUpdate,
    /// `transfers/delete`
    #[serde(rename = "transfers/delete")]
    TransfersDelete,
    /// `categories/create`
    #[serde(rename = "categories/create")]
    CategoriesCreate,
    /// `categories/update`
    #[serde(rename = "categories/update")]
    CategoriesUpdate,
    /// `categories/delete`
    #[serde(rename = "categories/delete")]
    CategoriesDelete,
    /// `initialSavings/update`
    #[serde(rename = "initialSavings/update")]
    InitialSavingsUpdate,
}

impl ActionType {
    /// Every action type, in declaration order.
    pub const ALL: [ActionType; 9] = [
        Self::AccountsCreate,
        Self::AccountsUpdate,
        Self::TransfersCreate,
        Self::TransfersUpdate,
        Self::TransfersDelete,
        Self::CategoriesCreate,
        Self::CategoriesUpdate,
        Self::CategoriesDelete,
        Self::InitialSavingsUpdate,
    ];

    /// Returns the wire `type` string.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountsCreate => "accounts/create",
            Self::AccountsUpdate => "accounts/update",
            Self::TransfersCreate => "transfers/create",
            Self::TransfersUpdate => "transfers/update",
            Self::TransfersDelete => "transfers/delete",
            Self::CategoriesCreate => "categories/create",
            Self::CategoriesUpdate => "categories/update",
            Self::CategoriesDelete => "categories/delete",
            Self::InitialSavingsUpdate => "initialSavings/update",
        }
    }

    /// Returns the kind of record this action mutates.
    pub const fn entity(self) -> EntityKind {
        match self {
            Self::AccountsCreate | Self::AccountsUpdate => EntityKind::Account,
            Self::TransfersCreate | Self::TransfersUpdate | Self::TransfersDelete => {
                EntityKind::Transfer
            }
            Self::CategoriesCreate | Self::CategoriesUpdate | Self::CategoriesDelete => {
                EntityKind::Category
            }
            Self::InitialSavingsUpdate => EntityKind::InitialSavings,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned, typed, immutable ledger fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    version: u32,
    #[serde(rename = "type")]
    action_type: ActionType,
    payload: Value,
}

impl Action {
    /// Builds an action at the current schema version.
    pub fn new(action_type: ActionType, payload: Value) -> Self {
        Self::from_parts(ACTION_VERSION, action_type, payload)
    }

    /// Builds an action with an explicit version.
    ///
    /// Used when re-materializing stored envelopes and by tests that need
    /// foreign versions.
    pub fn from_parts(version: u32, action_type: ActionType, payload: Value) -> Self {
        Self {
            version,
            action_type,
            payload,
        }
    }

    /// Schema version of the payload.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Action type.
    pub fn action_type(&self) -> ActionType {
        self.action_type
    }

    /// Raw payload as carried on the wire.
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Decodes the payload into the typed command it describes.
    ///
    /// # Errors
    ///
    /// [`DecodeError::UnsupportedVersion`] for any version other than
    /// [`ACTION_VERSION`]; [`DecodeError::Payload`] when the payload does not
    /// have the shape its type requires.
    pub fn command(&self) -> Result<Command, DecodeError> {
        if self.version != ACTION_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                action_type: self.action_type,
                version: self.version,
            });
        }

        let command = match self.action_type {
            ActionType::AccountsCreate => Command::CreateAccount(self.decode()?),
            ActionType::AccountsUpdate => Command::UpdateAccount(self.decode()?),
            ActionType::TransfersCreate => Command::CreateTransfer(self.decode()?),
            ActionType::TransfersUpdate => Command::UpdateTransfer(self.decode()?),
            ActionType::TransfersDelete => Command::DeleteTransfer(self.decode()?),
            ActionType::CategoriesCreate => Command::CreateCategory(self.decode()?),
            ActionType::CategoriesUpdate => Command::UpdateCategory(self.decode()?),
            ActionType::CategoriesDelete => Command::DeleteCategory(self.decode()?),
            ActionType::InitialSavingsUpdate => Command::UpdateInitialSavings(self.decode()?),
        };
        Ok(command)
    }

    fn decode<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        T::deserialize(&self.payload).map_err(|e| DecodeError::Payload(e.to_string()))
    }

    /// Serializes to the JSON wire form.
    pub fn to_json(&self) -> CoreResult<String> {
        serde_json::to_string(self).map_err(CoreError::codec)
    }

    /// Parses the JSON wire form.
    ///
    /// # Errors
    ///
    /// [`CoreError::MalformedAction`] for invalid JSON, a missing field, or a
    /// `type` outside the closed set.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::MalformedAction(e.to_string()))
    }

    /// `accounts/create`
    pub fn create_account(account: &Account) -> CoreResult<Self> {
        Command::CreateAccount(account.clone()).to_action()
    }

    /// `accounts/update`
    pub fn update_account(account: &Account) -> CoreResult<Self> {
        Command::UpdateAccount(account.clone()).to_action()
    }

    /// `transfers/create`
    pub fn create_transfer(transfer: &Transfer) -> CoreResult<Self> {
        Command::CreateTransfer(transfer.clone()).to_action()
    }

    /// `transfers/update`
    pub fn update_transfer(transfer: &Transfer) -> CoreResult<Self> {
        Command::UpdateTransfer(transfer.clone()).to_action()
    }

    /// `transfers/delete`
    pub fn delete_transfer(deletion: &Deletion) -> CoreResult<Self> {
        Command::DeleteTransfer(deletion.clone()).to_action()
    }

    /// `categories/create`
    pub fn create_category(category: &Category) -> CoreResult<Self> {
        Command::CreateCategory(category.clone()).to_action()
    }

    /// `categories/update`
    pub fn update_category(category: &Category) -> CoreResult<Self> {
        Command::UpdateCategory(category.clone()).to_action()
    }

    /// `categories/delete`
    pub fn delete_category(deletion: &Deletion) -> CoreResult<Self> {
        Command::DeleteCategory(deletion.clone()).to_action()
    }

    /// `initialSavings/update`
    pub fn update_initial_savings(savings: &InitialSavings) -> CoreResult<Self> {
        Command::UpdateInitialSavings(savings.clone()).to_action()
    }
}

/// Decoding an action into a [`Command`] failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The version is not one this build can read. Hard failure.
    #[error("unsupported version {version} for action type {action_type}")]
    UnsupportedVersion {
        /// Action type.
        action_type: ActionType,
        /// Offending version.
        version: u32,
    },
    /// The payload has the wrong shape. Soft failure.
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl From<DecodeError> for CoreError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::UnsupportedVersion {
                action_type,
                version,
            } => CoreError::UnsupportedVersion {
                action_type: action_type.to_string(),
                version,
            },
            DecodeError::Payload(message) => CoreError::MalformedAction(message),
        }
    }
}

/// A decoded action: one variant per action type, each with its payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create an account.
    CreateAccount(Account),
    /// Replace an account.
    UpdateAccount(Account),
    /// Create a transfer.
    CreateTransfer(Transfer),
    /// Replace a transfer (clears `deleted`).
    UpdateTransfer(Transfer),
    /// Soft-delete a transfer.
    DeleteTransfer(Deletion),
    /// Create a category.
    CreateCategory(Category),
    /// Replace a category (clears `deleted`).
    UpdateCategory(Category),
    /// Soft-delete a category.
    DeleteCategory(Deletion),
    /// Replace the initial-savings setting.
    UpdateInitialSavings(InitialSavings),
}

impl Command {
    /// Returns the action type this command is carried by.
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::CreateAccount(_) => ActionType::AccountsCreate,
            Self::UpdateAccount(_) => ActionType::AccountsUpdate,
            Self::CreateTransfer(_) => ActionType::TransfersCreate,
            Self::UpdateTransfer(_) => ActionType::TransfersUpdate,
            Self::DeleteTransfer(_) => ActionType::TransfersDelete,
            Self::CreateCategory(_) => ActionType::CategoriesCreate,
            Self::UpdateCategory(_) => ActionType::CategoriesUpdate,
            Self::DeleteCategory(_) => ActionType::CategoriesDelete,
            Self::UpdateInitialSavings(_) => ActionType::InitialSavingsUpdate,
        }
    }

    /// Wraps this command in an envelope at the current version.
    pub fn to_action(&self) -> CoreResult<Action> {
        let payload = match self {
            Self::CreateAccount(a) | Self::UpdateAccount(a) => serde_json::to_value(a),
            Self::CreateTransfer(t) | Self::UpdateTransfer(t) => serde_json::to_value(t),
            Self::DeleteTransfer(d) | Self::DeleteCategory(d) => serde_json::to_value(d),
            Self::CreateCategory(c) | Self::UpdateCategory(c) => serde_json::to_value(c),
            Self::UpdateInitialSavings(s) => serde_json::to_value(s),
        }
        .map_err(CoreError::codec)?;

        Ok(Action::new(self.action_type(), payload))
    }
}
