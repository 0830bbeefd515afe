//! The synced records and their boundary validation.
//!
//! Money is carried in minor currency units: amounts are `u64`, balances are
//! `i64` because an account may owe money in either direction.

use crate::error::ValidationError;
use crate::ids::{ClientId, EntityClass};
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest accepted single amount, in minor units.
///
/// Keeps every sum of amounts well inside `i64`.
pub const MAX_AMOUNT: u64 = 1_000_000_000_000_000;

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn require(id: &ClientId, field: &'static str) -> Result<(), ValidationError> {
    if id.is_blank() {
        Err(ValidationError::MissingField { field })
    } else {
        Ok(())
    }
}

fn require_text(text: &str, field: &'static str) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        Err(ValidationError::MissingField { field })
    } else {
        Ok(())
    }
}

fn require_amount(amount: u64, field: &'static str) -> Result<(), ValidationError> {
    if amount == 0 {
        return Err(ValidationError::NotPositive { field });
    }
    if amount > MAX_AMOUNT {
        return Err(ValidationError::OutOfRange {
            field,
            value: amount,
        });
    }
    Ok(())
}

/// Common surface of every synced record.
pub trait Entity:
    Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Class of the record.
    const CLASS: EntityClass;

    /// Device-assigned identity.
    fn client_id(&self) -> &ClientId;

    /// Whether the record has been acknowledged by the remote.
    fn is_synced(&self) -> bool;

    /// Sets the synced flag.
    fn set_synced(&mut self, synced: bool);

    /// Checks the record's own fields.
    fn validate(&self) -> Result<(), ValidationError>;

    /// The account this record belongs to, if any.
    fn account_ref(&self) -> Option<&ClientId> {
        None
    }

    /// The transaction this record refers to, if any.
    fn transaction_ref(&self) -> Option<&ClientId> {
        None
    }

    /// Compares two records ignoring the synced flag.
    fn same_content(&self, other: &Self) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.set_synced(false);
        b.set_synced(false);
        a == b
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Whether an account is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    /// In use.
    #[default]
    Active,
    /// Retired; kept for history.
    Inactive,
}

/// A customer or supplier with a cached running balance.
///
/// A positive balance means the counterparty owes the business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Device-assigned identity.
    pub client_id: ClientId,
    /// Display name; required.
    pub name: String,
    /// Contact phone.
    #[serde(default)]
    pub phone: String,
    /// Postal address.
    #[serde(default)]
    pub address: String,
    /// Cached balance, derived from the ledger.
    #[serde(default)]
    pub balance: i64,
    /// Lifecycle status.
    #[serde(default)]
    pub status: AccountStatus,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Time of the last local change.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Acknowledged by the remote.
    #[serde(default)]
    pub synced: bool,
}

impl Account {
    /// Creates an active account with zero balance.
    pub fn new(client_id: ClientId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            client_id,
            name: name.into(),
            phone: String::new(),
            address: String::new(),
            balance: 0,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
            synced: false,
        }
    }
}

impl Entity for Account {
    const CLASS: EntityClass = EntityClass::Account;

    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn is_synced(&self) -> bool {
        self.synced
    }

    fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require(&self.client_id, "clientId")?;
        require_text(&self.name, "name")
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Sale or purchase. A label only; it does not decide ledger direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Goods or services sold.
    #[default]
    #[serde(alias = "selling")]
    Sale,
    /// Goods or services bought.
    #[serde(alias = "buying")]
    Purchase,
}

impl TransactionKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Sale => "sale",
            TransactionKind::Purchase => "purchase",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment status of a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Not yet final; has no ledger effect.
    Draft,
    /// Final, nothing paid.
    #[default]
    Pending,
    /// Final, partly paid.
    Partial,
    /// Final, fully paid.
    Paid,
    /// Final, unpaid past its due date.
    Overdue,
}

impl TransactionStatus {
    /// Returns true for statuses that still expect payment.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(
            self,
            TransactionStatus::Pending | TransactionStatus::Partial | TransactionStatus::Overdue
        )
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Draft => "draft",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Partial => "partial",
            TransactionStatus::Paid => "paid",
            TransactionStatus::Overdue => "overdue",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    /// Item description.
    pub name: String,
    /// Quantity, at least one.
    #[serde(alias = "qty")]
    pub quantity: u32,
    /// Price per unit in minor units.
    #[serde(alias = "price")]
    pub unit_price: u64,
}

impl LineItem {
    /// Creates a line item.
    pub fn new(name: impl Into<String>, quantity: u32, unit_price: u64) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit_price,
        }
    }

    /// Line amount, `quantity * unit_price`.
    #[must_use]
    pub fn amount(&self) -> u64 {
        self.unit_price.saturating_mul(u64::from(self.quantity))
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require_text(&self.name, "items.name")?;
        if self.quantity == 0 {
            return Err(ValidationError::NotPositive {
                field: "items.quantity",
            });
        }
        require_amount(self.unit_price, "items.unitPrice")
    }
}

/// An invoice-like record for a sale or purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Device-assigned identity.
    pub client_id: ClientId,
    /// Owning account.
    #[serde(alias = "customerId")]
    pub account_id: ClientId,
    /// Sale or purchase.
    #[serde(default, alias = "invoiceType")]
    pub kind: TransactionKind,
    /// Line items; at least one.
    pub items: Vec<LineItem>,
    /// Grand total including tax.
    pub total: u64,
    /// Tax rate in whole percent.
    #[serde(default)]
    pub tax_percent: u32,
    /// Amount paid so far.
    #[serde(default)]
    pub amount_paid: u64,
    /// `total - amountPaid`, floored at zero.
    #[serde(default)]
    pub balance_due: u64,
    /// Payment status.
    #[serde(default)]
    pub status: TransactionStatus,
    /// Free text.
    #[serde(default)]
    pub notes: String,
    /// Optional due date for overdue tracking.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Whether the post-sync notification went out.
    #[serde(default, alias = "whatsappSent")]
    pub notified: bool,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Time of the last local change.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    /// Acknowledged by the remote.
    #[serde(default)]
    pub synced: bool,
}

impl Transaction {
    /// Sum of line amounts before tax.
    #[must_use]
    pub fn subtotal(&self) -> u64 {
        self.items
            .iter()
            .fold(0u64, |acc, item| acc.saturating_add(item.amount()))
    }

    /// Tax on the subtotal, rounded down to whole minor units.
    #[must_use]
    pub fn tax_amount(&self) -> u64 {
        let tax = u128::from(self.subtotal()) * u128::from(self.tax_percent) / 100;
        u64::try_from(tax).unwrap_or(u64::MAX)
    }

    /// Returns true when the record is still a draft.
    #[must_use]
    pub fn is_draft(&self) -> bool {
        self.status == TransactionStatus::Draft
    }
}

impl Entity for Transaction {
    const CLASS: EntityClass = EntityClass::Transaction;

    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn is_synced(&self) -> bool {
        self.synced
    }

    fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require(&self.client_id, "clientId")?;
        require(&self.account_id, "accountId")?;
        if self.items.is_empty() {
            return Err(ValidationError::MissingField { field: "items" });
        }
        for item in &self.items {
            item.validate()?;
        }
        require_amount(self.total, "total")?;
        if self.amount_paid > MAX_AMOUNT {
            return Err(ValidationError::OutOfRange {
                field: "amountPaid",
                value: self.amount_paid,
            });
        }
        if self.balance_due != self.total.saturating_sub(self.amount_paid) {
            return Err(ValidationError::Inconsistent(format!(
                "balanceDue {} does not match total {} minus amountPaid {}",
                self.balance_due, self.total, self.amount_paid
            )));
        }
        match self.status {
            TransactionStatus::Draft if self.amount_paid > 0 => Err(
                ValidationError::Inconsistent("a draft cannot carry a payment".into()),
            ),
            TransactionStatus::Paid if self.balance_due > 0 => Err(
                ValidationError::Inconsistent("status paid with a balance due".into()),
            ),
            TransactionStatus::Pending | TransactionStatus::Partial | TransactionStatus::Overdue
                if self.balance_due == 0 =>
            {
                Err(ValidationError::Inconsistent(format!(
                    "status {} with nothing due",
                    self.status
                )))
            }
            _ => Ok(()),
        }
    }

    fn account_ref(&self) -> Option<&ClientId> {
        Some(&self.account_id)
    }
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

/// How a payment was made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Cash.
    #[default]
    #[serde(alias = "Cash")]
    Cash,
    /// Instant bank transfer.
    #[serde(alias = "UPI")]
    Upi,
    /// Conventional bank transfer.
    #[serde(alias = "Bank Transfer")]
    BankTransfer,
}

impl PaymentMethod {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Upi => "upi",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "upi" => Ok(PaymentMethod::Upi),
            "bank" | "bank_transfer" | "bank transfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// Money received from (or paid to) an account. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    /// Device-assigned identity.
    pub client_id: ClientId,
    /// Account the payment settles.
    #[serde(alias = "customerId")]
    pub account_id: ClientId,
    /// Transaction the payment settles, if any.
    #[serde(default, alias = "invoiceId")]
    pub transaction_id: Option<ClientId>,
    /// Amount in minor units.
    pub amount: u64,
    /// Payment method.
    #[serde(default)]
    pub method: PaymentMethod,
    /// Value date.
    #[serde(default = "today")]
    pub date: NaiveDate,
    /// Free text.
    #[serde(default)]
    pub note: String,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Acknowledged by the remote.
    #[serde(default)]
    pub synced: bool,
}

impl Entity for Payment {
    const CLASS: EntityClass = EntityClass::Payment;

    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn is_synced(&self) -> bool {
        self.synced
    }

    fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require(&self.client_id, "clientId")?;
        require(&self.account_id, "accountId")?;
        if let Some(txn) = &self.transaction_id {
            require(txn, "transactionId")?;
        }
        require_amount(self.amount, "amount")
    }

    fn account_ref(&self) -> Option<&ClientId> {
        Some(&self.account_id)
    }

    fn transaction_ref(&self) -> Option<&ClientId> {
        self.transaction_id.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Ledger entry
// ---------------------------------------------------------------------------

/// Direction of a ledger entry relative to the account balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Increases the balance (the account owes more).
    Credit,
    /// Decreases the balance.
    Debit,
}

impl Direction {
    /// `+1` for credit, `-1` for debit.
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Direction::Credit => 1,
            Direction::Debit => -1,
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What produced a ledger entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySource {
    /// A finalized transaction.
    #[default]
    #[serde(alias = "invoice")]
    Transaction,
    /// A recorded payment.
    Payment,
    /// A manual adjustment.
    Manual,
}

impl EntrySource {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EntrySource::Transaction => "transaction",
            EntrySource::Payment => "payment",
            EntrySource::Manual => "manual",
        }
    }
}

impl fmt::Display for EntrySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable credit or debit against an account.
///
/// The account balance is, by definition, the signed sum of its entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    /// Device-assigned identity.
    pub client_id: ClientId,
    /// Account the entry moves.
    #[serde(alias = "customerId")]
    pub account_id: ClientId,
    /// Credit or debit.
    #[serde(rename = "type")]
    pub direction: Direction,
    /// Amount in minor units, strictly positive.
    pub amount: u64,
    /// What produced the entry.
    #[serde(default)]
    pub source: EntrySource,
    /// Originating transaction, if any.
    #[serde(default, alias = "invoiceId")]
    pub transaction_id: Option<ClientId>,
    /// Human readable description.
    #[serde(default)]
    pub description: String,
    /// Creation time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Acknowledged by the remote.
    #[serde(default)]
    pub synced: bool,
}

impl LedgerEntry {
    /// Creates an entry, rejecting zero or oversized amounts.
    ///
    /// The description defaults to `"Credit <amount>"` or `"Debit <amount>"`.
    pub fn new(
        client_id: ClientId,
        account_id: ClientId,
        direction: Direction,
        amount: u64,
        source: EntrySource,
    ) -> Result<Self, ValidationError> {
        require_amount(amount, "amount")?;
        let label = match direction {
            Direction::Credit => "Credit",
            Direction::Debit => "Debit",
        };
        Ok(Self {
            client_id,
            account_id,
            direction,
            amount,
            source,
            transaction_id: None,
            description: format!("{label} {amount}"),
            created_at: Utc::now(),
            synced: false,
        })
    }

    /// Links the entry to a transaction.
    #[must_use]
    pub fn with_transaction(mut self, transaction_id: ClientId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Replaces the description; blank text keeps the default.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.trim().is_empty() {
            self.description = description;
        }
        self
    }

    /// Signed effect on the balance.
    #[must_use]
    pub fn signed_amount(&self) -> i64 {
        // amount <= MAX_AMOUNT after validation
        i64::try_from(self.amount).unwrap_or(i64::MAX) * self.direction.sign()
    }
}

impl Entity for LedgerEntry {
    const CLASS: EntityClass = EntityClass::LedgerEntry;

    fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    fn is_synced(&self) -> bool {
        self.synced
    }

    fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    fn validate(&self) -> Result<(), ValidationError> {
        require(&self.client_id, "clientId")?;
        require(&self.account_id, "accountId")?;
        require_amount(self.amount, "amount")
    }

    fn account_ref(&self) -> Option<&ClientId> {
        Some(&self.account_id)
    }

    fn transaction_ref(&self) -> Option<&ClientId> {
        self.transaction_id.as_ref()
    }
}
