//! Canonical identifier handling.
//!
//! CSV has no types; common tooling coerces digits-only ids to numbers and
//! drops leading zeros ("0000000001" becomes "1"). Joins and lookups use
//! [`canonicalize_for_match`] (digits-only, no leading zeros); persisted rows
//! use [`canonicalize_for_storage`] (digits-only re-padded to the repo
//! width). Non-digit ids ("wo-2025-12-31-001", "E001") pass through trimmed.

use crate::error::{Result, ValidationError};

pub const TENANT_ID_WIDTH: usize = 10;
pub const MODULE_ID_WIDTH: usize = 6;

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Normalize an identifier for matching and lookups.
///
/// Digits-only values lose leading zeros ("000" stays "0"); everything else
/// is preserved after trimming. Empty input is rejected.
pub fn canonicalize_for_match(value: &str) -> Result<String> {
    let s = value.trim();
    if s.is_empty() {
        return Err(ValidationError::InvalidIdentifier("empty identifier".into()).into());
    }
    if is_digits(s) {
        let stripped = s.trim_start_matches('0');
        return Ok(if stripped.is_empty() {
            "0".into()
        } else {
            stripped.into()
        });
    }
    Ok(s.into())
}

/// Canonicalize a digits-only identifier to a fixed-width, zero-padded
/// string for persistence. Accepts inputs that may have lost leading zeros.
pub fn canonicalize_for_storage(value: &str, width: usize) -> Result<String> {
    let s = canonicalize_for_match(value)?;
    if is_digits(&s) {
        return Ok(format!("{s:0>width$}"));
    }
    Ok(s)
}

pub fn canon_tenant_id(value: &str) -> Result<String> {
    canonicalize_for_match(value)
}

pub fn canon_module_id(value: &str) -> Result<String> {
    canonicalize_for_match(value)
}

pub fn canon_work_order_id(value: &str) -> Result<String> {
    canonicalize_for_match(value)
}

pub fn storage_tenant_id(value: &str) -> Result<String> {
    canonicalize_for_storage(value, TENANT_ID_WIDTH)
}

pub fn storage_module_id(value: &str) -> Result<String> {
    canonicalize_for_storage(value, MODULE_ID_WIDTH)
}

/// Classification scope of a reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonScope {
    Global,
    Module,
}

impl ReasonScope {
    pub const fn digit(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Module => 1,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GLOBAL" => Ok(Self::Global),
            "MODULE" => Ok(Self::Module),
            other => {
                Err(ValidationError::InvalidIdentifier(format!("unknown scope: {other}")).into())
            }
        }
    }
}

impl std::fmt::Display for ReasonScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Global => f.write_str("GLOBAL"),
            Self::Module => f.write_str("MODULE"),
        }
    }
}

/// A decomposed 9-digit reason code `GCCMMMRRR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReasonCode {
    pub reason_code: String,
    pub scope: ReasonScope,
    pub category_id: String,
    pub module_id: String,
    pub reason_id: String,
}

fn validate_category_id(category_id: &str) -> Result<()> {
    if category_id.len() != 2 || !is_digits(category_id) || category_id == "00" {
        return Err(ValidationError::InvalidReasonCode(format!(
            "invalid category_id {category_id:?} (expected 01-99)"
        ))
        .into());
    }
    Ok(())
}

fn validate_module_part(module_id: &str) -> Result<()> {
    if module_id.len() != 3 || !is_digits(module_id) {
        return Err(ValidationError::InvalidReasonCode(format!(
            "invalid module part {module_id:?} (expected 000-999)"
        ))
        .into());
    }
    Ok(())
}

fn validate_reason_id(reason_id: &str) -> Result<()> {
    if reason_id.len() != 3 || !is_digits(reason_id) || reason_id == "000" {
        return Err(ValidationError::InvalidReasonCode(format!(
            "invalid reason_id {reason_id:?} (expected 001-999)"
        ))
        .into());
    }
    Ok(())
}

/// Compose a reason code `G CC MMM RRR`. GLOBAL scope forces module "000";
/// MODULE scope requires a non-zero 3-digit module part.
pub fn compose_reason_code(
    scope: ReasonScope,
    category_id: &str,
    module_id: &str,
    reason_id: &str,
) -> Result<String> {
    validate_category_id(category_id)?;
    validate_reason_id(reason_id)?;
    let module_part = match scope {
        ReasonScope::Global => "000".to_owned(),
        ReasonScope::Module => {
            validate_module_part(module_id)?;
            if module_id == "000" {
                return Err(ValidationError::InvalidReasonCode(
                    "MODULE scope requires module part 001-999".into(),
                )
                .into());
            }
            module_id.to_owned()
        }
    };
    Ok(format!(
        "{}{category_id}{module_part}{reason_id}",
        scope.digit()
    ))
}

pub fn parse_reason_code(code: &str) -> Result<ParsedReasonCode> {
    if code.len() != 9 || !is_digits(code) {
        return Err(ValidationError::InvalidReasonCode(format!(
            "invalid reason_code {code:?} (expected 9 digits)"
        ))
        .into());
    }
    let scope = match &code[..1] {
        "0" => ReasonScope::Global,
        "1" => ReasonScope::Module,
        g => {
            return Err(ValidationError::InvalidReasonCode(format!(
                "invalid scope digit {g:?} (expected 0|1)"
            ))
            .into());
        }
    };
    let category_id = &code[1..3];
    let module_id = &code[3..6];
    let reason_id = &code[6..9];
    validate_category_id(category_id)?;
    if module_id != "000" {
        validate_module_part(module_id)?;
    }
    if scope == ReasonScope::Global && module_id != "000" {
        return Err(ValidationError::InvalidReasonCode(format!(
            "GLOBAL reason_code must carry module part 000: {code}"
        ))
        .into());
    }
    validate_reason_id(reason_id)?;
    Ok(ParsedReasonCode {
        reason_code: code.to_owned(),
        scope,
        category_id: category_id.to_owned(),
        module_id: module_id.to_owned(),
        reason_id: reason_id.to_owned(),
    })
}
