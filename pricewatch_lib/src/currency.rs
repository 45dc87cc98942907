//! ISO-4217 currency table: symbols, minor-unit exponents and marketplace defaults.

/// Currencies the normalizer recognises, with their minor-unit exponent.
pub const CURRENCIES: &[(&str, u32)] = &[
    ("USD", 2),
    ("EUR", 2),
    ("GBP", 2),
    ("JPY", 0),
    ("CAD", 2),
    ("AUD", 2),
    ("INR", 2),
    ("MXN", 2),
    ("BRL", 2),
    ("SEK", 2),
    ("PLN", 2),
    ("TRY", 2),
    ("AED", 2),
    ("SAR", 2),
    ("SGD", 2),
    ("CHF", 2),
    ("CNY", 2),
    ("KRW", 0),
    ("EGP", 2),
    ("ZAR", 2),
];

/// Symbols mapped to a currency, longest first so `C$` wins over `$`.
const SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("R$", "BRL"),
    ("C$", "CAD"),
    ("CA$", "CAD"),
    ("A$", "AUD"),
    ("AU$", "AUD"),
    ("S$", "SGD"),
    ("MX$", "MXN"),
    ("zł", "PLN"),
    ("kr", "SEK"),
    ("Rs.", "INR"),
    ("₹", "INR"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("¥", "JPY"),
    ("￥", "JPY"),
    ("₩", "KRW"),
    ("₺", "TRY"),
    ("$", "USD"),
];

/// Symbols shared by several currencies. The listed code is only a
/// fallback; a marketplace whose default is in the family wins.
const SHARED_SYMBOLS: &[(&str, &[&str])] = &[
    ("$", &["USD", "CAD", "AUD", "MXN", "SGD"]),
    ("kr", &["SEK"]),
    ("¥", &["JPY", "CNY"]),
    ("￥", &["JPY", "CNY"]),
];

/// Default currency of a marketplace, keyed by host suffix.
const MARKETPLACE_CURRENCIES: &[(&str, &str)] = &[
    ("amazon.com", "USD"),
    ("amazon.co.uk", "GBP"),
    ("amazon.de", "EUR"),
    ("amazon.fr", "EUR"),
    ("amazon.it", "EUR"),
    ("amazon.es", "EUR"),
    ("amazon.nl", "EUR"),
    ("amazon.com.be", "EUR"),
    ("amazon.ie", "EUR"),
    ("amazon.co.jp", "JPY"),
    ("amazon.ca", "CAD"),
    ("amazon.com.au", "AUD"),
    ("amazon.in", "INR"),
    ("amazon.com.mx", "MXN"),
    ("amazon.com.br", "BRL"),
    ("amazon.se", "SEK"),
    ("amazon.pl", "PLN"),
    ("amazon.com.tr", "TRY"),
    ("amazon.ae", "AED"),
    ("amazon.sa", "SAR"),
    ("amazon.sg", "SGD"),
    ("amazon.eg", "EGP"),
];

/// Minor-unit exponent of a recognised currency.
pub fn exponent(code: &str) -> Option<u32> {
    CURRENCIES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, e)| *e)
}

pub fn is_known(code: &str) -> bool {
    exponent(code).is_some()
}

/// Finds a currency in free text: an ISO code first, then a symbol.
pub fn detect(text: &str) -> Option<&'static str> {
    detect_with_default(text, None)
}

/// Like [`detect`], but a shared symbol such as `$` resolves to
/// `default` when `default` is one of the currencies using it.
pub fn detect_with_default(text: &str, default: Option<&'static str>) -> Option<&'static str> {
    let upper = text.to_uppercase();
    for (code, _) in CURRENCIES {
        if contains_word(&upper, code) {
            return Some(code);
        }
    }
    let (symbol, code) = SYMBOLS.iter().find(|(symbol, _)| text.contains(symbol))?;
    let shared_with_default = default.filter(|d| {
        SHARED_SYMBOLS
            .iter()
            .any(|(s, family)| s == symbol && family.contains(d))
    });
    Some(shared_with_default.unwrap_or(*code))
}

/// Default currency for a marketplace host such as `amazon.co.uk`.
pub fn for_marketplace(marketplace: &str) -> Option<&'static str> {
    let host = marketplace.split(':').next().unwrap_or(marketplace);
    MARKETPLACE_CURRENCIES
        .iter()
        .filter(|(suffix, _)| host == *suffix || host.ends_with(&format!(".{}", suffix)))
        .max_by_key(|(suffix, _)| suffix.len())
        .map(|(_, code)| *code)
}

/// Renders minor units as a decimal amount, e.g. `2999, "USD"` -> `29.99 USD`.
pub fn format_minor(amount: i64, code: &str) -> String {
    let exp = exponent(code).unwrap_or(2);
    if exp == 0 {
        return format!("{} {}", amount, code);
    }
    let scale = 10i64.pow(exp);
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!(
        "{}{}.{:0width$} {}",
        sign,
        abs / scale as u64,
        abs % scale as u64,
        code,
        width = exp as usize
    )
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + word.len()..].chars().next();
        !before.is_some_and(|c| c.is_ascii_alphabetic())
            && !after.is_some_and(|c| c.is_ascii_alphabetic())
    })
}
