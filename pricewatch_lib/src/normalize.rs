//! Canonicalizes extracted fields into an immutable [`ProductSnapshot`].

use chrono::{DateTime, Utc};

use crate::currency;
use crate::extract::RawFields;
use crate::identity::ProductIdentity;
use crate::model::ProductSnapshot;

/// Separators that only ever group thousands.
const GROUPING_CHARS: &[char] = &[' ', '\u{a0}', '\u{202f}', '\''];

/// Availability phrases meaning the product cannot be bought. Checked
/// before the in-stock phrases since "unavailable" contains "available".
const OUT_OF_STOCK_PHRASES: &[&str] = &[
    "currently unavailable",
    "out of stock",
    "unavailable",
    "sold out",
    "nicht verfügbar",
    "nicht auf lager",
    "non disponible",
    "rupture de stock",
    "no disponible",
    "agotado",
    "non disponibile",
    "在庫切れ",
];

const IN_STOCK_PHRASES: &[&str] = &[
    "in stock",
    "left in stock",
    "available",
    "usually ships",
    "ships within",
    "auf lager",
    "en stock",
    "disponible",
    "disponibile",
    "在庫あり",
];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unparseable price '{0}'")]
    UnparseablePrice(String),
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Normalizes `raw` into a snapshot stamped with the current time.
pub fn normalize_now(
    identity: &ProductIdentity,
    raw: &RawFields,
) -> Result<ProductSnapshot, ValidationError> {
    normalize(identity, raw, Utc::now())
}

/// Normalizes `raw` into a snapshot stamped with `fetched_at`.
pub fn normalize(
    identity: &ProductIdentity,
    raw: &RawFields,
    fetched_at: DateTime<Utc>,
) -> Result<ProductSnapshot, ValidationError> {
    let title = collapse_whitespace(&raw.title);
    if title.is_empty() {
        return Err(ValidationError::InvalidField {
            field: "title",
            reason: "empty after trimming".to_string(),
        });
    }

    let amount = PriceAmount::parse(&raw.price_text)?;
    let currency = resolve_currency(identity, raw)?;
    let exponent = currency::exponent(currency).unwrap_or(2);
    let price_minor = amount
        .to_minor(exponent)
        .ok_or_else(|| ValidationError::UnparseablePrice(raw.price_text.clone()))?;

    let rating = raw.rating_text.as_deref().and_then(parse_rating);
    let review_count = match raw.review_count_text.as_deref() {
        Some(text) => parse_review_count(text)?,
        None => None,
    };

    Ok(ProductSnapshot {
        identity: identity.clone(),
        fetched_at,
        title,
        price_minor,
        currency: currency.to_string(),
        rating,
        review_count,
        image_url: raw.image_url.as_deref().and_then(normalize_image_url),
        in_stock: raw
            .availability_text
            .as_deref()
            .map(is_in_stock)
            .unwrap_or(false),
    })
}

fn resolve_currency(
    identity: &ProductIdentity,
    raw: &RawFields,
) -> Result<&'static str, ValidationError> {
    let marketplace = currency::for_marketplace(&identity.marketplace);
    let from_symbol = raw.currency_text.as_deref().and_then(|text| {
        let trimmed = text.trim();
        currency::CURRENCIES
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(trimmed))
            .map(|(code, _)| *code)
            .or_else(|| currency::detect_with_default(trimmed, marketplace))
    });
    currency::detect_with_default(&raw.price_text, marketplace)
        .or(from_symbol)
        .or(marketplace)
        .ok_or_else(|| ValidationError::InvalidField {
            field: "currency",
            reason: format!("no recognised currency in '{}'", raw.price_text),
        })
}

/// Parses a price such as `$1,299.99`, `1.299,99 €` or `¥1,234` into
/// minor units for a currency with `exponent` decimal places.
///
/// A lone `,` or `.` followed by exactly three digits is read as a
/// thousands separator; when both appear, the last one is the decimal
/// separator.
pub fn parse_price_minor(text: &str, exponent: u32) -> Result<i64, ValidationError> {
    PriceAmount::parse(text)?
        .to_minor(exponent)
        .ok_or_else(|| ValidationError::UnparseablePrice(text.to_string()))
}

/// Integer and fraction digits of a price, before scaling to a currency.
struct PriceAmount {
    int_digits: String,
    frac_digits: String,
}

impl PriceAmount {
    fn parse(text: &str) -> Result<Self, ValidationError> {
        let unparseable = || ValidationError::UnparseablePrice(text.to_string());
        let number = first_number(text).ok_or_else(unparseable)?;

        let cleaned: String = number.chars().filter(|c| !GROUPING_CHARS.contains(c)).collect();
        let last_comma = cleaned.rfind(',');
        let last_dot = cleaned.rfind('.');
        let decimal_sep = match (last_comma, last_dot) {
            (Some(c), Some(d)) => Some(if c > d { ',' } else { '.' }),
            (Some(_), None) => decimal_candidate(&cleaned, ','),
            (None, Some(_)) => decimal_candidate(&cleaned, '.'),
            (None, None) => None,
        };

        let (int_part, frac_part) = match decimal_sep {
            Some(sep) => {
                let idx = cleaned.rfind(sep).ok_or_else(unparseable)?;
                (&cleaned[..idx], &cleaned[idx + 1..])
            }
            None => (cleaned.as_str(), ""),
        };
        Ok(Self {
            int_digits: int_part.chars().filter(|c| c.is_ascii_digit()).collect(),
            frac_digits: frac_part.to_string(),
        })
    }

    /// `None` when the amount does not fit in an `i64` of minor units.
    fn to_minor(&self, exponent: u32) -> Option<i64> {
        let int_value: i64 = if self.int_digits.is_empty() {
            0
        } else {
            self.int_digits.parse().ok()?
        };
        int_value
            .checked_mul(10i64.checked_pow(exponent)?)?
            .checked_add(scale_fraction(&self.frac_digits, exponent))
    }
}

fn decimal_candidate(number: &str, sep: char) -> Option<char> {
    let occurrences = number.matches(sep).count();
    let digits_after = number.rsplit(sep).next().map(str::len).unwrap_or(0);
    if occurrences == 1 && digits_after != 3 {
        Some(sep)
    } else {
        None
    }
}

/// Rounds fractional digits to `exponent` places, half up.
fn scale_fraction(frac: &str, exponent: u32) -> i64 {
    let digits: Vec<u32> = frac.chars().filter_map(|c| c.to_digit(10)).collect();
    let mut value: i64 = 0;
    for i in 0..exponent as usize {
        value = value * 10 + digits.get(i).copied().unwrap_or(0) as i64;
    }
    if digits.get(exponent as usize).is_some_and(|d| *d >= 5) {
        value += 1;
    }
    value
}

/// The first run of digits and in-number separators, e.g. `1,299.99`
/// from `$1,299.99 - $1,499.99`.
fn first_number(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|c| c.is_ascii_digit())?;
    let mut out = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        let is_sep = c == ',' || c == '.' || GROUPING_CHARS.contains(&c);
        if c.is_ascii_digit() {
            out.push(c);
        } else if is_sep && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
            out.push(c);
        } else {
            break;
        }
        i += 1;
    }
    Some(out)
}

/// Reads a star rating such as `4.6 out of 5 stars` or `4,6 von 5`,
/// clamped to 0..=5 and rounded to one decimal.
pub fn parse_rating(text: &str) -> Option<f64> {
    let number = first_number(text)?;
    let value: f64 = number.replace(',', ".").split_whitespace().next()?.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some((value.clamp(0.0, 5.0) * 10.0).round() / 10.0)
}

/// Reads a review count such as `1,204 ratings`. A negative count is
/// invalid; text without digits yields `None`.
pub fn parse_review_count(text: &str) -> Result<Option<i64>, ValidationError> {
    let Some(start) = text.find(|c: char| c.is_ascii_digit()) else {
        return Ok(None);
    };
    if text[..start].trim_end().ends_with('-') {
        return Err(ValidationError::InvalidField {
            field: "review_count",
            reason: format!("negative count in '{}'", text),
        });
    }
    let number = first_number(text).unwrap_or_default();
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    digits
        .parse()
        .map(Some)
        .map_err(|_| ValidationError::InvalidField {
            field: "review_count",
            reason: format!("'{}' is not a count", text),
        })
}

/// Classifies availability text; unknown phrasing counts as out of stock.
pub fn is_in_stock(text: &str) -> bool {
    let lower = text.to_lowercase();
    if OUT_OF_STOCK_PHRASES.iter().any(|p| lower.contains(p)) {
        return false;
    }
    IN_STOCK_PHRASES.iter().any(|p| lower.contains(p))
        || (lower.contains("only") && lower.contains("left"))
}

fn normalize_image_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
        Some(trimmed.to_string())
    } else if let Some(rest) = trimmed.strip_prefix("//") {
        Some(format!("https://{}", rest))
    } else {
        None
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
