//! Expense records and the spreadsheet append service.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::SheetsConfig;
use crate::credentials::CredentialResolver;
use crate::error::RelayError;
use crate::google::sheets::AppendUpdates;

/// Incoming expense payload. Fields stay loosely typed so a number where a
/// string is expected (or vice versa) is accepted like the web client sends it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExpenseRecord {
    #[serde(default)]
    pub date: Option<Value>,
    #[serde(default)]
    pub vendor: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default)]
    pub notes: Option<Value>,
}

impl ExpenseRecord {
    /// Anything that is not a JSON object is treated as an empty record.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(_) => serde_json::from_value(value).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Validate and flatten into `[date, vendor, amount, category, notes]`.
    ///
    /// Cells keep their JSON type except `amount`, which is sent as its
    /// `String(amount)` rendering, and falsy `notes`, which become `""`.
    pub fn into_row(self) -> Result<Vec<Value>, RelayError> {
        let missing = || RelayError::Validation("Missing required fields".to_string());

        let (Some(date), Some(vendor), Some(amount), Some(category)) =
            (self.date, self.vendor, self.amount, self.category)
        else {
            return Err(missing());
        };
        if ![&date, &vendor, &amount, &category].into_iter().all(is_truthy) {
            return Err(missing());
        }

        let notes = match self.notes {
            Some(v) if is_truthy(&v) => v,
            _ => Value::String(String::new()),
        };

        Ok(vec![
            date,
            vendor,
            Value::String(js_string(&amount)),
            category,
            notes,
        ])
    }
}

/// JavaScript-style truthiness, which is what the web client relies on.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `String(value)` for a parsed JSON value.
fn js_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => js_number(n.as_f64().unwrap_or(f64::NAN)),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// `Number.prototype.toString()` for base 10: shortest round-trip digits,
/// positional between 1e-7 and 1e21, exponent form outside.
fn js_number(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f == 0.0 {
        return "0".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f < 0.0 {
        return format!("-{}", js_number(-f));
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "1.25e1"
    let sci = format!("{:e}", f);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return f.to_string();
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return f.to_string();
    };

    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let k = digits.len() as i32;
    let n = exp + 1;

    if k <= n && n <= 21 {
        format!("{}{}", digits, "0".repeat((n - k) as usize))
    } else if 0 < n && n <= 21 {
        let (int, frac) = digits.split_at(n as usize);
        format!("{}.{}", int, frac)
    } else if -6 < n && n <= 0 {
        format!("0.{}{}", "0".repeat((-n) as usize), digits)
    } else {
        let e = n - 1;
        let sign = if e < 0 { '-' } else { '+' };
        let (lead, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{}e{}{}", lead, sign, e.abs())
        } else {
            format!("{}.{}e{}{}", lead, rest, sign, e.abs())
        }
    }
}

/// Appends validated expense rows through the resolved Sheets client.
pub struct SheetAppender {
    resolver: Arc<CredentialResolver>,
    spreadsheet_id: Option<String>,
    range: String,
}

impl SheetAppender {
    pub fn new(resolver: Arc<CredentialResolver>, config: &SheetsConfig) -> Self {
        Self {
            resolver,
            spreadsheet_id: config.spreadsheet_id.clone(),
            range: config.range.clone(),
        }
    }

    pub async fn append(&self, record: ExpenseRecord) -> Result<AppendUpdates, RelayError> {
        let row = record.into_row()?;

        let spreadsheet_id = self
            .spreadsheet_id
            .as_deref()
            .ok_or_else(|| RelayError::Configuration("SPREADSHEET_ID not set".to_string()))?;

        let sheets = self.resolver.authorized_client().await?;

        let updates = sheets
            .append_row(spreadsheet_id, &self.range, row)
            .await
            .map_err(|e| {
                error!("Append row error: {:#}", e);
                RelayError::UpstreamProvider(format!("{:#}", e))
            })?;

        info!(
            "Expense appended: {} row(s) at {}",
            updates.updated_rows.unwrap_or_default(),
            updates.updated_range.as_deref().unwrap_or("?")
        );
        Ok(updates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row_for(value: Value) -> Result<Vec<Value>, RelayError> {
        ExpenseRecord::from_value(value).into_row()
    }

    #[test]
    fn test_row_order_and_amount_formatting() {
        let row = row_for(json!({
            "date": "2024-01-01",
            "vendor": "Acme",
            "amount": 12.5,
            "category": "Office",
            "notes": "pens"
        }))
        .unwrap();
        assert_eq!(row, vec![json!("2024-01-01"), json!("Acme"), json!("12.5"), json!("Office"), json!("pens")]);
    }

    #[test]
    fn test_only_amount_is_stringified() {
        let row = row_for(json!({
            "date": 20240101,
            "vendor": true,
            "amount": 1e21,
            "category": "Office",
            "notes": 7
        }))
        .unwrap();
        assert_eq!(row, vec![json!(20240101), json!(true), json!("1e+21"), json!("Office"), json!(7)]);

        let row = row_for(json!({
            "date": "2024-01-01",
            "vendor": ["a", "b"],
            "amount": 1e-7,
            "category": { "name": "Office" }
        }))
        .unwrap();
        assert_eq!(row[1], json!(["a", "b"]));
        assert_eq!(row[2], json!("1e-7"));
        assert_eq!(row[3], json!({ "name": "Office" }));
    }

    #[test]
    fn test_notes_default_to_empty() {
        let row = row_for(json!({
            "date": "2024-01-01",
            "vendor": "Acme",
            "amount": "7.00",
            "category": "Travel"
        }))
        .unwrap();
        assert_eq!(row, vec![json!("2024-01-01"), json!("Acme"), json!("7.00"), json!("Travel"), json!("")]);

        for notes in [json!(null), json!(0), json!(false), json!("")] {
            let row = row_for(json!({
                "date": "2024-01-01",
                "vendor": "Acme",
                "amount": 3,
                "category": "Travel",
                "notes": notes
            }))
            .unwrap();
            assert_eq!(row[2], json!("3"));
            assert_eq!(row[4], json!(""));
        }
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(js_number(12.0), "12");
        assert_eq!(js_number(-4.0), "-4");
        assert_eq!(js_number(0.1), "0.1");
        assert_eq!(js_number(123.456), "123.456");
        assert_eq!(js_number(1e20), "100000000000000000000");
        assert_eq!(js_number(1e21), "1e+21");
        assert_eq!(js_number(1.5e22), "1.5e+22");
        assert_eq!(js_number(0.000001), "0.000001");
        assert_eq!(js_number(1e-7), "1e-7");
        assert_eq!(js_number(-2.5e-8), "-2.5e-8");
    }

    #[test]
    fn test_string_rendering_of_non_numbers() {
        assert_eq!(js_string(&json!("12.50")), "12.50");
        assert_eq!(js_string(&json!(true)), "true");
        assert_eq!(js_string(&json!([1, null, "x"])), "1,,x");
        assert_eq!(js_string(&json!({ "a": 1 })), "[object Object]");
    }

    #[test]
    fn test_missing_or_falsy_required_fields() {
        let base = json!({
            "date": "2024-01-01",
            "vendor": "Acme",
            "amount": 12.5,
            "category": "Office"
        });

        for field in ["date", "vendor", "amount", "category"] {
            let mut missing = base.clone();
            missing.as_object_mut().unwrap().remove(field);
            assert!(
                matches!(row_for(missing), Err(RelayError::Validation(_))),
                "missing {} should be rejected",
                field
            );

            let mut empty = base.clone();
            empty[field] = json!("");
            assert!(matches!(row_for(empty), Err(RelayError::Validation(_))));
        }

        let mut zero = base.clone();
        zero["amount"] = json!(0);
        assert!(matches!(row_for(zero), Err(RelayError::Validation(_))));
    }

    #[test]
    fn test_non_object_body_is_empty_record() {
        let err = row_for(json!(["2024-01-01"])).unwrap_err();
        assert_eq!(err.to_string(), "Missing required fields");
    }
}
