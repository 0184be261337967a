use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::DocumentKind;

/// Submitter input rejected before it reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: &'static str },
    #[error("{field} is malformed: {expected}")]
    Malformed {
        field: &'static str,
        expected: &'static str,
    },
    #[error("account number confirmation does not match")]
    AccountNumberMismatch,
    #[error("date of birth {0} lies in the future")]
    FutureDateOfBirth(NaiveDate),
    #[error("fields for {found} submitted to the {expected} slot")]
    KindMismatch {
        expected: DocumentKind,
        found: DocumentKind,
    },
    #[error("payload does not match the {kind} schema: {detail}")]
    Schema { kind: DocumentKind, detail: String },
    #[error("a rejection needs a reason")]
    MissingRejectionReason,
    #[error("uploaded file is empty")]
    EmptyFile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxIdFields {
    pub pan_number: String,
    pub name_on_card: String,
    pub date_of_birth: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NationalIdFields {
    pub id_number: String,
    pub name_on_card: String,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Savings,
    Current,
}

impl AccountType {
    pub const fn label(self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Current => "current",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankProofFields {
    pub account_holder_name: String,
    pub account_number: String,
    pub confirm_account_number: String,
    pub bank_name: String,
    pub ifsc_code: String,
    pub branch_name: String,
    pub account_type: AccountType,
}

/// Kind-specific structured data attached to a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SlotFields {
    TaxId(TaxIdFields),
    NationalId(NationalIdFields),
    BankProof(BankProofFields),
}

impl SlotFields {
    pub fn kind(&self) -> DocumentKind {
        match self {
            SlotFields::TaxId(_) => DocumentKind::TaxId,
            SlotFields::NationalId(_) => DocumentKind::NationalId,
            SlotFields::BankProof(_) => DocumentKind::BankProof,
        }
    }

    /// Decode an untagged request body using the slot kind from the route.
    pub fn from_json(kind: DocumentKind, body: Value) -> Result<Self, ValidationError> {
        let schema = |err: serde_json::Error| ValidationError::Schema {
            kind,
            detail: err.to_string(),
        };
        let fields = match kind {
            DocumentKind::TaxId => SlotFields::TaxId(serde_json::from_value(body).map_err(schema)?),
            DocumentKind::NationalId => {
                SlotFields::NationalId(serde_json::from_value(body).map_err(schema)?)
            }
            DocumentKind::BankProof => {
                SlotFields::BankProof(serde_json::from_value(body).map_err(schema)?)
            }
        };
        Ok(fields)
    }

    /// Check the schema for `kind` and return the normalized fields.
    pub fn validated(self, kind: DocumentKind) -> Result<Self, ValidationError> {
        if self.kind() != kind {
            return Err(ValidationError::KindMismatch {
                expected: kind,
                found: self.kind(),
            });
        }

        match self {
            SlotFields::TaxId(fields) => validate_tax_id(fields).map(SlotFields::TaxId),
            SlotFields::NationalId(fields) => {
                validate_national_id(fields).map(SlotFields::NationalId)
            }
            SlotFields::BankProof(fields) => validate_bank_proof(fields).map(SlotFields::BankProof),
        }
    }

    /// Profile field names and values written when this slot is approved.
    pub fn profile_projection(&self) -> BTreeMap<String, Value> {
        let mut projected = BTreeMap::new();
        let mut put = |key: &str, value: Value| {
            projected.insert(key.to_string(), value);
        };

        match self {
            SlotFields::TaxId(fields) => {
                put("panNumber", Value::from(fields.pan_number.clone()));
                put("panName", Value::from(fields.name_on_card.clone()));
                put("dateOfBirth", Value::from(fields.date_of_birth.to_string()));
            }
            SlotFields::NationalId(fields) => {
                put("nationalIdNumber", Value::from(fields.id_number.clone()));
                put("nationalIdName", Value::from(fields.name_on_card.clone()));
                put("address", Value::from(fields.address.clone()));
            }
            SlotFields::BankProof(fields) => {
                put(
                    "accountHolderName",
                    Value::from(fields.account_holder_name.clone()),
                );
                put("accountNumber", Value::from(fields.account_number.clone()));
                put("bankName", Value::from(fields.bank_name.clone()));
                put("ifscCode", Value::from(fields.ifsc_code.clone()));
                put("branchName", Value::from(fields.branch_name.clone()));
                put("accountType", Value::from(fields.account_type.label()));
            }
        }

        projected
    }
}

/// Profile key recording when a kind's projection was written.
pub fn extraction_timestamp_key(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::TaxId => "taxIdExtractedAt",
        DocumentKind::NationalId => "nationalIdExtractedAt",
        DocumentKind::BankProof => "bankProofExtractedAt",
    }
}

fn required(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Missing { field });
    }
    Ok(trimmed.to_string())
}

fn validate_tax_id(fields: TaxIdFields) -> Result<TaxIdFields, ValidationError> {
    let pan_number = required("pan_number", fields.pan_number)?.to_ascii_uppercase();
    let bytes = pan_number.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes[..5].iter().all(u8::is_ascii_uppercase)
        && bytes[5..9].iter().all(u8::is_ascii_digit)
        && bytes[9].is_ascii_uppercase();
    if !well_formed {
        return Err(ValidationError::Malformed {
            field: "pan_number",
            expected: "five letters, four digits, one letter",
        });
    }

    let name_on_card = required("name_on_card", fields.name_on_card)?;

    if fields.date_of_birth > Utc::now().date_naive() {
        return Err(ValidationError::FutureDateOfBirth(fields.date_of_birth));
    }

    Ok(TaxIdFields {
        pan_number,
        name_on_card,
        date_of_birth: fields.date_of_birth,
    })
}

fn validate_national_id(fields: NationalIdFields) -> Result<NationalIdFields, ValidationError> {
    let raw = required("id_number", fields.id_number)?;
    let id_number: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let well_formed = id_number.len() == 12
        && id_number.chars().all(|c| c.is_ascii_digit())
        && !id_number.starts_with(['0', '1']);
    if !well_formed {
        return Err(ValidationError::Malformed {
            field: "id_number",
            expected: "twelve digits not starting with 0 or 1",
        });
    }

    Ok(NationalIdFields {
        id_number,
        name_on_card: required("name_on_card", fields.name_on_card)?,
        address: required("address", fields.address)?,
    })
}

fn validate_bank_proof(fields: BankProofFields) -> Result<BankProofFields, ValidationError> {
    let account_holder_name = required("account_holder_name", fields.account_holder_name)?;
    let account_number = required("account_number", fields.account_number)?;
    if !(9..=18).contains(&account_number.len())
        || !account_number.chars().all(|c| c.is_ascii_digit())
    {
        return Err(ValidationError::Malformed {
            field: "account_number",
            expected: "9 to 18 digits",
        });
    }
    if fields.confirm_account_number.trim() != account_number {
        return Err(ValidationError::AccountNumberMismatch);
    }

    let ifsc_code = required("ifsc_code", fields.ifsc_code)?.to_ascii_uppercase();
    let bytes = ifsc_code.as_bytes();
    let well_formed = bytes.len() == 11
        && bytes[..4].iter().all(u8::is_ascii_uppercase)
        && bytes[4] == b'0'
        && bytes[5..].iter().all(u8::is_ascii_alphanumeric);
    if !well_formed {
        return Err(ValidationError::Malformed {
            field: "ifsc_code",
            expected: "four letters, a zero, six alphanumerics",
        });
    }

    Ok(BankProofFields {
        account_holder_name,
        confirm_account_number: account_number.clone(),
        account_number,
        bank_name: required("bank_name", fields.bank_name)?,
        ifsc_code,
        branch_name: required("branch_name", fields.branch_name)?,
        account_type: fields.account_type,
    })
}
