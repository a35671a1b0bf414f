//! Core requisition record, money and timestamp types
use crate::audit::{TransitionKind, TransitionRecord};
use crate::machine::StatusChange;
use crate::validation::ValidatedDraft;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::str::FromStr;

/// Money held as signed minor units (cents). Zero and negative values are
/// representable so validation can report them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount {0:?} is not a decimal number")]
    Malformed(String),
    #[error("amount {0:?} has more than two fractional digits")]
    TooPrecise(String),
    #[error("amount is out of range")]
    OutOfRange,
}

impl Amount {
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }
    pub fn from_major(major: i64) -> Option<Self> {
        major.checked_mul(100).map(Self)
    }
    pub const fn minor_units(self) -> i64 {
        self.0
    }
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
    /// Accepts floats only when they carry at most two decimal places.
    pub fn from_f64(value: f64) -> Result<Self, AmountError> {
        if !value.is_finite() {
            return Err(AmountError::Malformed(value.to_string()));
        }
        let scaled = value * 100.0;
        let rounded = scaled.round();
        if (scaled - rounded).abs() > 1e-6 {
            return Err(AmountError::TooPrecise(value.to_string()));
        }
        if rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
            return Err(AmountError::OutOfRange);
        }
        Ok(Self(rounded as i64))
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (negative, digits) = match text.as_bytes().first() {
            None => return Err(AmountError::Empty),
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            Some(_) => (false, text),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));

        let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
            return Err(AmountError::Malformed(text.to_string()));
        }
        if fraction.len() > 2 {
            return Err(AmountError::TooPrecise(text.to_string()));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| AmountError::OutOfRange)?
        };
        let cents: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| AmountError::OutOfRange)? * 10,
            _ => fraction.parse().map_err(|_| AmountError::OutOfRange)?,
        };
        let minor = whole
            .checked_mul(100)
            .and_then(|w| w.checked_add(cents))
            .ok_or(AmountError::OutOfRange)?;

        Ok(Self(if negative { -minor } else { minor }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Whole(i64),
            Fractional(f64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(text) => text.parse().map_err(de::Error::custom),
            Repr::Whole(major) => {
                Amount::from_major(major).ok_or_else(|| de::Error::custom(AmountError::OutOfRange))
            }
            Repr::Fractional(value) => Amount::from_f64(value).map_err(de::Error::custom),
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

/// Opaque bech32m identifier, assigned once at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequisitionId(String);

impl RequisitionId {
    pub fn generate() -> anyhow::Result<Self> {
        crate::utils::new_uuid_to_bech32(crate::utils::REQUISITION_HRP).map(Self)
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RequisitionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RequisitionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for RequisitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    minicbor::Encode,
    minicbor::Decode,
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    ReviewRequired,
    #[n(2)]
    Approved,
    #[n(3)]
    Rejected,
}

#[derive(thiserror::Error, Debug)]
#[error("unknown approval status {0:?}")]
pub struct UnknownStatus(String);

impl ApprovalStatus {
    pub const ALL: [ApprovalStatus; 4] = [
        ApprovalStatus::Pending,
        ApprovalStatus::ReviewRequired,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, ApprovalStatus::Approved | ApprovalStatus::Rejected)
    }
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::ReviewRequired => "REVIEW_REQUIRED",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        ApprovalStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Requisition {
    #[n(0)]
    pub id: RequisitionId,
    #[n(1)]
    pub description: String,
    #[n(2)]
    pub amount: Amount,
    #[n(3)]
    pub currency: String,
    #[n(4)]
    pub vendor_id: String,
    #[n(5)]
    pub approval_status: ApprovalStatus,
    #[n(6)]
    pub high_value_flag: bool,
    #[n(7)]
    pub risk_score: u8, // advisory, only written by risk enrichment
    #[n(8)]
    pub rejection_reason: Option<String>,
    #[n(9)]
    pub created_at: TimeStamp,
    #[n(10)]
    pub updated_at: TimeStamp,
}

/// A validated, derived record that has not been persisted yet. Only the
/// creation pipeline can build one, so the initial status always comes from
/// derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRequisition {
    id: RequisitionId,
    details: ValidatedDraft,
    approval_status: ApprovalStatus,
    high_value_flag: bool,
}

impl NewRequisition {
    pub(crate) fn new(
        id: RequisitionId,
        details: ValidatedDraft,
        approval_status: ApprovalStatus,
        high_value_flag: bool,
    ) -> Self {
        Self {
            id,
            details,
            approval_status,
            high_value_flag,
        }
    }
    pub fn id(&self) -> &RequisitionId {
        &self.id
    }
    pub fn approval_status(&self) -> ApprovalStatus {
        self.approval_status
    }

    /// Stamp the record with its store timestamps. Returns the record together
    /// with its creation audit entry.
    pub fn into_requisition(self, at: TimeStamp) -> (Requisition, TransitionRecord) {
        let record = TransitionRecord::new(
            self.id.clone(),
            None,
            self.approval_status,
            TransitionKind::Created,
            at,
        );
        let requisition = Requisition {
            id: self.id,
            description: self.details.description().to_string(),
            amount: self.details.amount(),
            currency: self.details.currency().to_string(),
            vendor_id: self.details.vendor_id().to_string(),
            approval_status: self.approval_status,
            high_value_flag: self.high_value_flag,
            risk_score: 0,
            rejection_reason: None,
            created_at: at,
            updated_at: at,
        };
        (requisition, record)
    }
}

impl Requisition {
    /// Apply a state machine transition in place.
    pub fn apply(&mut self, change: &StatusChange, at: TimeStamp) -> TransitionRecord {
        let from = self.approval_status;
        self.approval_status = change.to();
        if let TransitionKind::RiskRejected { reason } = change.kind() {
            self.rejection_reason = Some(reason.clone());
        }
        self.updated_at = at;

        TransitionRecord::new(self.id.clone(), Some(from), change.to(), change.kind().clone(), at)
    }

    /// Overwrite the user editable fields. Status and the high value flag are
    /// left exactly as they were.
    pub fn apply_details(&mut self, details: &ValidatedDraft, at: TimeStamp) -> TransitionRecord {
        self.description = details.description().to_string();
        self.amount = details.amount();
        self.currency = details.currency().to_string();
        self.vendor_id = details.vendor_id().to_string();
        self.updated_at = at;

        TransitionRecord::new(
            self.id.clone(),
            Some(self.approval_status),
            self.approval_status,
            TransitionKind::DetailsUpdated,
            at,
        )
    }

    pub fn apply_risk_score(&mut self, score: u8, at: TimeStamp) -> TransitionRecord {
        self.risk_score = score;
        self.updated_at = at;

        TransitionRecord::new(
            self.id.clone(),
            Some(self.approval_status),
            self.approval_status,
            TransitionKind::RiskScored { score },
            at,
        )
    }
}

// Used for constructing create and update requests
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequisitionDraft {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub vendor_id: Option<String>,
}

impl RequisitionDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
    pub fn set_amount(mut self, amount: Amount) -> Self {
        self.amount = Some(amount);
        self
    }
    pub fn set_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }
    pub fn set_vendor(mut self, vendor_id: impl Into<String>) -> Self {
        self.vendor_id = Some(vendor_id.into());
        self
    }
    /// Fill every field left unset from an existing record.
    pub fn merged_onto(self, base: &Requisition) -> Self {
        Self {
            description: self.description.or_else(|| Some(base.description.clone())),
            amount: self.amount.or(Some(base.amount)),
            currency: self.currency.or_else(|| Some(base.currency.clone())),
            vendor_id: self.vendor_id.or_else(|| Some(base.vendor_id.clone())),
        }
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

impl<C> minicbor::Encode<C> for Amount {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for Amount {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(Amount(d.i64()?))
    }
}

impl<C> minicbor::Encode<C> for RequisitionId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.str(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for RequisitionId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        Ok(RequisitionId(d.str()?.to_string()))
    }
}
