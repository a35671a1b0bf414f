//! Field checks applied before a requisition is created or edited.
//!
//! Validation is pure: it never touches the store and never runs for status
//! only transitions.
use crate::error::{ValidationError, ValidationErrors};
use crate::requisition::{Amount, RequisitionDraft};

/// A draft that passed every rule. Fields are normalised (trimmed text,
/// upper case currency) and can only be produced by [`ValidationEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedDraft {
    description: String,
    amount: Amount,
    currency: String,
    vendor_id: String,
}

impl ValidatedDraft {
    pub fn description(&self) -> &str {
        &self.description
    }
    pub fn amount(&self) -> Amount {
        self.amount
    }
    pub fn currency(&self) -> &str {
        &self.currency
    }
    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationEngine {
    // require currency to be exactly three ascii letters, not just present
    strict_currency: bool,
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self {
            strict_currency: true,
        }
    }
}

impl ValidationEngine {
    pub fn new(strict_currency: bool) -> Self {
        Self { strict_currency }
    }

    /// Check every rule and collect all failures, not just the first.
    pub fn validate(&self, draft: &RequisitionDraft) -> Result<ValidatedDraft, ValidationErrors> {
        let mut failures = Vec::new();

        match draft.amount {
            None => failures.push(ValidationError::MissingAmount),
            Some(amount) if !amount.is_positive() => {
                failures.push(ValidationError::NonPositiveAmount(amount))
            }
            Some(_) => {}
        }

        let description = draft.description.as_deref().map(str::trim).unwrap_or_default();
        if description.is_empty() {
            failures.push(ValidationError::EmptyDescription);
        }

        let currency = draft.currency.as_deref().map(str::trim).unwrap_or_default();
        if currency.is_empty() {
            failures.push(ValidationError::MissingCurrency);
        } else if self.strict_currency
            && !(currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_alphabetic()))
        {
            failures.push(ValidationError::InvalidCurrency(currency.to_string()));
        }

        match (draft.amount, failures.is_empty()) {
            (Some(amount), true) => Ok(ValidatedDraft {
                description: description.to_string(),
                amount,
                currency: currency.to_ascii_uppercase(),
                vendor_id: draft.vendor_id.as_deref().map(str::trim).unwrap_or_default().to_string(),
            }),
            _ => Err(ValidationErrors(failures)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> RequisitionDraft {
        RequisitionDraft::new()
            .set_description("  Standing desks ")
            .set_amount(Amount::from_minor(1_200_00))
            .set_currency("usd")
            .set_vendor("vendor-7")
    }

    #[test]
    fn accepts_and_normalises_valid_draft() {
        let valid = ValidationEngine::default().validate(&draft()).unwrap();

        assert_eq!(valid.description(), "Standing desks");
        assert_eq!(valid.currency(), "USD");
        assert_eq!(valid.vendor_id(), "vendor-7");
    }

    #[test]
    fn rejects_zero_and_negative_amounts() {
        let engine = ValidationEngine::default();
        for minor in [0, -1, -5_000_00] {
            let err = engine
                .validate(&draft().set_amount(Amount::from_minor(minor)))
                .unwrap_err();
            assert_eq!(err.fields(), vec!["amount"]);
        }
    }

    #[test]
    fn collects_every_failure() {
        let err = ValidationEngine::default()
            .validate(&RequisitionDraft::new().set_description("   "))
            .unwrap_err();

        assert_eq!(
            err.0,
            vec![
                ValidationError::MissingAmount,
                ValidationError::EmptyDescription,
                ValidationError::MissingCurrency,
            ]
        );
    }

    #[test]
    fn currency_strictness_is_configurable() {
        let loose = draft().set_currency("dollars");

        assert!(matches!(
            ValidationEngine::new(true).validate(&loose).unwrap_err().0[..],
            [ValidationError::InvalidCurrency(_)]
        ));
        assert!(ValidationEngine::new(false).validate(&loose).is_ok());
    }
}
