//! Compare what a patient was billed against the Medicare allowed amount.

use serde::Serialize;

use crate::pfs::PricingRow;
use crate::types::LocalityMatch;

pub const NO_PRICING_MESSAGE: &str = "Medicare pricing data is not available for this code.";

/// Amounts the user supplied alongside the lookup
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClaimAmounts {
    pub current_bill: Option<f64>,
    pub allowed_amount: Option<f64>,
}

/// One row of the comparison table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonLine {
    pub label: String,
    pub amount: String,
    pub percent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceComparison {
    pub locality_name: String,
    pub medicare_allowed: f64,
    pub lines: Vec<ComparisonLine>,
    pub recommendation: String,
}

/// Parse a user or API amount such as "$1,204.50"; None when blank or not finite.
pub fn parse_amount(value: &str) -> Option<f64> {
    if value.is_empty() {
        return None;
    }
    let cleaned: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        // Text with no digits at all counts as zero
        return Some(0.0);
    }
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// US dollars with thousands separators; "--" when missing.
pub fn format_currency(amount: Option<f64>) -> String {
    let Some(amount) = amount.filter(|a| a.is_finite()) else {
        return "--".to_string();
    };
    let cents = (amount.abs() * 100.0).round() as u64;
    let dollars = (cents / 100).to_string();
    let mut grouped = String::with_capacity(dollars.len() + dollars.len() / 3);
    for (i, digit) in dollars.chars().enumerate() {
        if i > 0 && (dollars.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// Percent rounded to one decimal, whole numbers shown without decimals.
pub fn format_percent(value: Option<f64>) -> String {
    let Some(value) = value.filter(|v| !v.is_nan()) else {
        return String::new();
    };
    let rounded = (value * 10.0).round() / 10.0;
    if rounded.is_nan() {
        return String::new();
    }
    // Tiny negatives round to -0.0
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    if rounded.fract() == 0.0 {
        format!("{:.0}%", rounded)
    } else {
        format!("{:.1}%", rounded)
    }
}

/// The row to price against: exact locality, else the first row returned.
pub fn select_row<'a>(
    rows: &'a [PricingRow],
    matching_row: Option<&'a PricingRow>,
    locality_code: Option<&str>,
) -> Option<&'a PricingRow> {
    matching_row
        .or_else(|| locality_code.and_then(|code| rows.iter().find(|r| r.locality == code)))
        .or_else(|| rows.first())
}

/// Non-facility price, or the facility price when that is missing or zero
pub fn allowed_amount(row: &PricingRow) -> Option<f64> {
    let usable = |value: &str| parse_amount(value).filter(|a| *a != 0.0);
    usable(&row.non_facility_price).or_else(|| usable(&row.facility_price))
}

/// Build the comparison table and recommendation for one priced row.
///
/// Fails with [`NO_PRICING_MESSAGE`] when the row carries no usable price.
pub fn compare(
    row: &PricingRow,
    locality: &LocalityMatch,
    amounts: ClaimAmounts,
) -> Result<PriceComparison, &'static str> {
    let allowed = allowed_amount(row).ok_or(NO_PRICING_MESSAGE)?;

    let locality_name = if !row.locality_description.is_empty() {
        row.locality_description.clone()
    } else if !locality.locality.locality_label.is_empty() {
        locality.locality.locality_label.clone()
    } else {
        "your locality".to_string()
    };

    let percent_of = |value: f64| format_percent(Some(value / allowed * 100.0));

    let mut lines = vec![ComparisonLine {
        label: format!("Medicare allowed amount ({})", locality_name),
        amount: format_currency(Some(allowed)),
        percent: "100%".to_string(),
    }];
    if let Some(bill) = amounts.current_bill {
        lines.push(ComparisonLine {
            label: "Your bill".to_string(),
            amount: format_currency(Some(bill)),
            percent: percent_of(bill),
        });
    }
    if let Some(claim) = amounts.allowed_amount {
        lines.push(ComparisonLine {
            label: "Allowed amount on claim".to_string(),
            amount: format_currency(Some(claim)),
            percent: percent_of(claim),
        });
    }

    let recommendation = match (amounts.current_bill, amounts.allowed_amount) {
        (Some(bill), _) => match percent_of(bill) {
            pct if pct.is_empty() => format!(
                "Your bill for this code in {} could not be compared to Medicare.",
                locality_name
            ),
            pct => format!(
                "Your bill is {} of Medicare for this code in {}.",
                pct, locality_name
            ),
        },
        (None, Some(claim)) => match percent_of(claim) {
            pct if pct.is_empty() => format!(
                "The plan allowed amount for this code in {} could not be compared to Medicare.",
                locality_name
            ),
            pct => format!(
                "The plan allowed amount is {} of Medicare for this code in {}.",
                pct, locality_name
            ),
        },
        (None, None) => format!(
            "The Medicare allowed amount for this code in {} is {}.",
            locality_name,
            format_currency(Some(allowed))
        ),
    };

    Ok(PriceComparison {
        locality_name,
        medicare_allowed: allowed,
        lines,
        recommendation,
    })
}
