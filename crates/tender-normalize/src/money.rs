//! Currency-string parsing.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use tender_core::MAX_FINANCIAL_MAGNITUDE;

use crate::error::FieldWarning;

/// Symbol -> ISO code, longest symbols first so `US$` wins over `$`.
const SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("R$", "BRL"),
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("KSh", "KES"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("₹", "INR"),
    ("₦", "NGN"),
    ("₱", "PHP"),
    ("₩", "KRW"),
    ("$", "USD"),
];

const ISO_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CNY", "INR", "NGN", "KES", "ZAR", "GHS", "UGX", "TZS", "ETB",
    "XOF", "XAF", "CHF", "CAD", "AUD", "NZD", "BRL", "MXN", "PHP", "IDR", "PKR", "BDT", "EGP",
    "MAD", "SEK", "NOK", "DKK", "PLN", "CZK", "HUF", "RON", "TRY", "AED", "SAR", "KRW", "SGD",
    "MYR", "THB", "VND", "RWF", "ZMW", "MWK", "MZN", "AOA", "COP", "PEN", "CLP", "ARS",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Money {
    pub amount: Option<f64>,
    pub currency: Option<String>,
}

fn iso_code_re() -> &'static Regex {
    static ISO_RE: OnceLock<Regex> = OnceLock::new();
    ISO_RE.get_or_init(|| {
        Regex::new(&format!(r"(?i)\b({})\b", ISO_CODES.join("|"))).expect("valid iso code regex")
    })
}

fn magnitude_re() -> &'static Regex {
    static MAGNITUDE_RE: OnceLock<Regex> = OnceLock::new();
    MAGNITUDE_RE.get_or_init(|| {
        Regex::new(r"(?i)\b(thousand|million|mn|billion|bn)\b").expect("valid magnitude regex")
    })
}

fn number_re() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| Regex::new(r"^-?\d+(?:\.\d+)?$").expect("valid number regex"))
}

/// ISO code found in `text`, either spelled out or via a known symbol.
pub fn extract_currency(text: &str) -> Option<String> {
    if let Some(m) = iso_code_re().find(text) {
        return Some(m.as_str().to_ascii_uppercase());
    }
    SYMBOLS
        .iter()
        .find(|(symbol, _)| text.contains(symbol))
        .map(|(_, code)| code.to_string())
}

/// Parses an amount and its currency from free text such as `"USD 1,250,000.50"`,
/// `"€2.500.000,00"` or `"1.5 million EUR"`. Failure means both parts are null.
pub fn parse_money(input: &str) -> Result<Money, FieldWarning> {
    let text = input.trim();
    if text.is_empty() {
        return Ok(Money::default());
    }
    let currency = extract_currency(text);

    let mut rest = iso_code_re().replace_all(text, " ").into_owned();
    for (symbol, _) in SYMBOLS {
        rest = rest.replace(symbol, " ");
    }
    let multiplier = match magnitude_re().find(&rest).map(|m| m.as_str().to_ascii_lowercase()) {
        Some(word) if word == "thousand" => 1e3,
        Some(word) if word == "million" || word == "mn" => 1e6,
        Some(word) if word == "billion" || word == "bn" => 1e9,
        _ => 1.0,
    };
    let rest = magnitude_re().replace_all(&rest, " ");
    let digits = normalize_separators(
        &rest.replace([' ', '\u{a0}', '_', '\''], ""),
        multiplier != 1.0,
    );

    if !number_re().is_match(&digits) {
        return Err(FieldWarning::new("estimated_value", input, "not a monetary amount"));
    }
    let amount = digits
        .parse::<f64>()
        .map_err(|_| FieldWarning::new("estimated_value", input, "not a monetary amount"))?
        * multiplier;
    check_range(amount, input)?;
    Ok(Money {
        amount: Some(amount),
        currency,
    })
}

/// Money from a raw JSON value: numbers pass through the range check, strings are parsed.
pub fn parse_money_value(value: &JsonValue) -> Result<Money, FieldWarning> {
    match value {
        JsonValue::Number(n) => {
            let amount = n
                .as_f64()
                .ok_or_else(|| FieldWarning::new("estimated_value", n.to_string(), "not finite"))?;
            check_range(amount, &n.to_string())?;
            Ok(Money {
                amount: Some(amount),
                currency: None,
            })
        }
        JsonValue::String(s) => parse_money(s),
        JsonValue::Null => Ok(Money::default()),
        other => Err(FieldWarning::new(
            "estimated_value",
            other.to_string(),
            "unsupported value shape",
        )),
    }
}

fn check_range(amount: f64, original: &str) -> Result<(), FieldWarning> {
    if !amount.is_finite() || amount.abs() > MAX_FINANCIAL_MAGNITUDE {
        return Err(FieldWarning::new("estimated_value", original, "outside storable range"));
    }
    Ok(())
}

/// Resolves thousands/decimal separators into a plain `1234.5` form.
///
/// A lone separator followed by exactly three digits groups thousands
/// (`90.000`, `2,500`) unless the integer part is zero or a magnitude word
/// scales the amount (`1.500 million`).
fn normalize_separators(digits: &str, scaled: bool) -> String {
    let groups_thousands = |sep: usize| {
        let integer = digits[..sep].trim_start_matches('-');
        !scaled && digits.len() - sep - 1 == 3 && !integer.is_empty() && integer != "0"
    };
    let last_comma = digits.rfind(',');
    let last_dot = digits.rfind('.');
    match (last_comma, last_dot) {
        // 1.250.000,50
        (Some(c), Some(d)) if c > d => digits.replace('.', "").replace(',', "."),
        // 1,250,000.50
        (Some(_), Some(_)) => digits.replace(',', ""),
        (Some(c), None) => {
            if digits.matches(',').count() == 1 && !groups_thousands(c) {
                digits.replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (None, Some(d)) => {
            if digits.matches('.').count() > 1 || groups_thousands(d) {
                digits.replace('.', "")
            } else {
                digits.to_string()
            }
        }
        (None, None) => digits.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok(input: &str) -> Money {
        parse_money(input).expect(input)
    }

    #[test]
    fn iso_prefixed_amounts() {
        let money = ok("USD 1,250,000.50");
        assert_eq!(money.amount, Some(1_250_000.5));
        assert_eq!(money.currency.as_deref(), Some("USD"));
        assert_eq!(ok("1 500 000 kes").currency.as_deref(), Some("KES"));
        assert_eq!(ok("1 500 000 kes").amount, Some(1_500_000.0));
    }

    #[test]
    fn symbol_prefixed_amounts() {
        let money = ok("$5000");
        assert_eq!(money.amount, Some(5000.0));
        assert_eq!(money.currency.as_deref(), Some("USD"));
        assert_eq!(ok("US$ 12.75").currency.as_deref(), Some("USD"));
        assert_eq!(ok("KSh 300,000").currency.as_deref(), Some("KES"));
        assert_eq!(ok("₦45,000,000").amount, Some(45_000_000.0));
    }

    #[test]
    fn european_separators() {
        let money = ok("€ 2.500.000,00");
        assert_eq!(money.amount, Some(2_500_000.0));
        assert_eq!(money.currency.as_deref(), Some("EUR"));
        assert_eq!(ok("12,5").amount, Some(12.5));
    }

    #[test]
    fn lone_dot_before_three_digits_groups_thousands() {
        let money = ok("EUR 90.000");
        assert_eq!(money.amount, Some(90_000.0));
        assert_eq!(money.currency.as_deref(), Some("EUR"));
        assert_eq!(ok("€ 2.500").amount, Some(2_500.0));
        assert_eq!(ok("2,500").amount, Some(2_500.0));
        assert_eq!(ok("0.500").amount, Some(0.5));
        assert_eq!(ok("1.500 million").amount, Some(1_500_000.0));
        assert_eq!(ok("US$ 12.75").amount, Some(12.75));
    }

    #[test]
    fn magnitude_words_scale() {
        let money = ok("1.5 million EUR");
        assert_eq!(money.amount, Some(1_500_000.0));
        assert_eq!(money.currency.as_deref(), Some("EUR"));
        assert_eq!(ok("GBP 3 bn").amount, Some(3e9));
        assert_eq!(ok("250 thousand").amount, Some(250_000.0));
    }

    #[test]
    fn unparsable_strings_yield_nothing() {
        assert!(parse_money("To be determined").is_err());
        assert!(parse_money("USD approx. 10k-20k").is_err());
        assert_eq!(ok("   "), Money::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        assert!(parse_money("9000000000000000000").is_err());
        assert!(parse_money_value(&json!(2e15)).is_err());
        assert_eq!(parse_money_value(&json!(1250)).unwrap().amount, Some(1250.0));
        assert!(parse_money_value(&json!({"amount": 1})).is_err());
    }
}
