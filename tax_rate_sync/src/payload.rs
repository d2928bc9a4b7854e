//! Login and update request bodies.
//!
//! Payloads are rendered by literal placeholder substitution into a template
//! string. Every placeholder must appear exactly once in its template. Text
//! values are JSON-escaped before insertion and the tax rate is inserted as a
//! bare JSON number, so the rendered document is always valid JSON.

use std::fmt::Write as _;

use chrono::{NaiveDate, NaiveTime};

pub const DEFAULT_LOGIN_TEMPLATE: &str =
    r#"{"name":"{uname}","password":"{pword}","locale":"en-US","tenant":"{tenant}"}"#;

pub const DEFAULT_UPDATE_TEMPLATE: &str = r#"{"TaxID":{"value":"{taxID}"},"TaxSchedule":[{"StartDate":{"value":"{startDate}"},"TaxRate":{"value":{taxRate}},"MinTaxableAmount":{"value":0},"MaxTaxableAmount":{"value":0},"ReportingGroup":{"value":"{reportinggroup}"}}]}"#;

pub const DEFAULT_START_DATE_FORMAT: &str = "%Y-%m-%d";

const USERNAME: &str = "{uname}";
const PASSWORD: &str = "{pword}";
const TENANT: &str = "{tenant}";
const TAX_ID: &str = "{taxID}";
const START_DATE: &str = "{startDate}";
const TAX_RATE: &str = "{taxRate}";
const REPORTING_GROUP: &str = "{reportinggroup}";

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("placeholder {token} occurs {count} times in template, expected exactly once")]
    Placeholder { token: &'static str, count: usize },

    #[error("tax rate {0:?} is not a finite decimal number")]
    InvalidRate(String),

    #[error("start date format {0:?} cannot be rendered")]
    DateFormat(String),

    #[error("rendered payload is not valid JSON")]
    InvalidJson(#[from] serde_json::Error),
}

pub fn build_login_payload(
    template: &str,
    username: &str,
    password: &str,
    tenant: &str,
) -> Result<String, PayloadError> {
    render(
        template,
        &[
            (USERNAME, json_text(username)),
            (PASSWORD, json_text(password)),
            (TENANT, json_text(tenant)),
        ],
    )
}

/// Renders the update body for one tax schedule entry.
///
/// `effective_date` is rendered at midnight with `date_format` (chrono
/// strftime syntax), so time specifiers such as `%H:%M:%S` are accepted.
pub fn build_update_payload(
    template: &str,
    tax_id: &str,
    tax_rate: &str,
    reporting_group: &str,
    effective_date: NaiveDate,
    date_format: &str,
) -> Result<String, PayloadError> {
    render(
        template,
        &[
            (TAX_ID, json_text(tax_id)),
            (START_DATE, json_text(&format_date(effective_date, date_format)?)),
            (TAX_RATE, json_number(tax_rate)?),
            (REPORTING_GROUP, json_text(reporting_group)),
        ],
    )
}

pub fn format_date(date: NaiveDate, date_format: &str) -> Result<String, PayloadError> {
    let mut rendered = String::new();
    write!(rendered, "{}", date.and_time(NaiveTime::MIN).format(date_format))
        .map_err(|_| PayloadError::DateFormat(date_format.to_string()))?;
    Ok(rendered)
}

/// Substitutes in a single pass so a value that happens to contain another
/// placeholder is left untouched.
fn render(template: &str, substitutions: &[(&'static str, String)]) -> Result<String, PayloadError> {
    let mut positions = Vec::with_capacity(substitutions.len());
    for (token, value) in substitutions {
        let token = *token;
        let count = template.matches(token).count();
        if count != 1 {
            return Err(PayloadError::Placeholder { token, count });
        }
        if let Some(start) = template.find(token) {
            positions.push((start, token, value.as_str()));
        }
    }
    positions.sort_by_key(|(start, _, _)| *start);

    let mut rendered = String::with_capacity(template.len());
    let mut cursor = 0;
    for (start, token, value) in positions {
        rendered.push_str(&template[cursor..start]);
        rendered.push_str(value);
        cursor = start + token.len();
    }
    rendered.push_str(&template[cursor..]);

    serde_json::from_str::<serde_json::Value>(&rendered)?;
    Ok(rendered)
}

/// JSON string contents without the surrounding quotes.
fn json_text(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

fn json_number(value: &str) -> Result<String, PayloadError> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(|n| n.to_string())
        .ok_or_else(|| PayloadError::InvalidRate(value.to_string()))
}
