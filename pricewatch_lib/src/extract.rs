//! Product field extraction from retailer HTML.
//!
//! Every field is located by an ordered list of strategies. Each strategy
//! is a pure function from the parsed document to an optional string; the
//! first one that yields a non-empty value wins. Retail markup drifts and
//! runs A/B layouts, so fields carry a primary selector followed by
//! fallbacks. Selector sets can be loaded from TOML to patch drift without
//! a rebuild.

use std::fmt;

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("required field '{0}' not found in page")]
    MissingRequiredField(Field),
    #[error("invalid selector '{selector}' for field '{field}': {message}")]
    InvalidSelector {
        field: Field,
        selector: String,
        message: String,
    },
    #[error("selector file error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Fields the extractor locates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Price,
    Currency,
    Rating,
    ReviewCount,
    Image,
    Availability,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Price => "price",
            Self::Currency => "currency",
            Self::Rating => "rating",
            Self::ReviewCount => "review_count",
            Self::Image => "image",
            Self::Availability => "availability",
        }
    }

    /// Title and price are required; the rest default to `None`.
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Title | Self::Price)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Uncompiled strategy, as written in a selector file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    /// Whitespace-collapsed text of the first matching element.
    Text { selector: String },
    /// An attribute of the first matching element.
    Attr { selector: String, attr: String },
    /// A fixed value when any element matches.
    Exists { selector: String, value: String },
}

impl StrategySpec {
    fn text(selector: &str) -> Self {
        Self::Text {
            selector: selector.to_string(),
        }
    }

    fn attr(selector: &str, attr: &str) -> Self {
        Self::Attr {
            selector: selector.to_string(),
            attr: attr.to_string(),
        }
    }

    fn exists(selector: &str, value: &str) -> Self {
        Self::Exists {
            selector: selector.to_string(),
            value: value.to_string(),
        }
    }

    fn selector(&self) -> &str {
        match self {
            Self::Text { selector } | Self::Attr { selector, .. } | Self::Exists { selector, .. } => {
                selector
            }
        }
    }
}

/// Ordered strategies for every field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub title: Vec<StrategySpec>,
    pub price: Vec<StrategySpec>,
    #[serde(default)]
    pub currency: Vec<StrategySpec>,
    #[serde(default)]
    pub rating: Vec<StrategySpec>,
    #[serde(default)]
    pub review_count: Vec<StrategySpec>,
    #[serde(default)]
    pub image: Vec<StrategySpec>,
    #[serde(default)]
    pub availability: Vec<StrategySpec>,
}

impl SelectorSet {
    /// Selectors for Amazon product detail pages, primary first.
    pub fn amazon() -> Self {
        use StrategySpec as S;
        Self {
            title: vec![
                S::text("#productTitle"),
                S::text("#title"),
                S::attr("meta[property=\"og:title\"]", "content"),
                S::attr("meta[name=\"title\"]", "content"),
                S::text("h1"),
            ],
            price: vec![
                S::text("#corePrice_feature_div .a-price .a-offscreen"),
                S::text("#corePriceDisplay_desktop_feature_div .priceToPay .a-offscreen"),
                S::text(".priceToPay .a-offscreen"),
                S::text("#priceblock_ourprice"),
                S::text("#priceblock_dealprice"),
                S::text("#price_inside_buybox"),
                S::attr("#twister-plus-price-data-price", "value"),
                S::attr("meta[itemprop=\"price\"]", "content"),
            ],
            currency: vec![
                S::text("#corePrice_feature_div .a-price-symbol"),
                S::text(".priceToPay .a-price-symbol"),
                S::attr("#twister-plus-price-data-price-unit", "value"),
                S::attr("meta[itemprop=\"priceCurrency\"]", "content"),
            ],
            rating: vec![
                S::attr("#acrPopover", "title"),
                S::text("span[data-hook=\"rating-out-of-text\"]"),
                S::text("#averageCustomerReviews .a-icon-alt"),
                S::text("i.a-icon-star .a-icon-alt"),
            ],
            review_count: vec![
                S::text("#acrCustomerReviewText"),
                S::text("span[data-hook=\"total-review-count\"]"),
            ],
            image: vec![
                S::attr("#landingImage", "data-old-hires"),
                S::attr("#landingImage", "src"),
                S::attr("#imgBlkFront", "src"),
                S::attr("meta[property=\"og:image\"]", "content"),
            ],
            availability: vec![
                S::text("#availability span"),
                S::text("#availability"),
                S::exists("#outOfStock", "Currently unavailable"),
                S::exists("#add-to-cart-button", "In Stock"),
            ],
        }
    }

    /// Parses a selector set from TOML, one array of tables per field.
    pub fn from_toml_str(input: &str) -> Result<Self, ExtractError> {
        Ok(toml::from_str(input)?)
    }

    fn fields(&self) -> [(Field, &[StrategySpec]); 7] {
        [
            (Field::Title, self.title.as_slice()),
            (Field::Price, self.price.as_slice()),
            (Field::Currency, self.currency.as_slice()),
            (Field::Rating, self.rating.as_slice()),
            (Field::ReviewCount, self.review_count.as_slice()),
            (Field::Image, self.image.as_slice()),
            (Field::Availability, self.availability.as_slice()),
        ]
    }
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self::amazon()
    }
}

/// Field values as found in the page, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawFields {
    pub title: String,
    pub price_text: String,
    pub currency_text: Option<String>,
    pub rating_text: Option<String>,
    pub review_count_text: Option<String>,
    pub image_url: Option<String>,
    pub availability_text: Option<String>,
}

enum Strategy {
    Text(Selector),
    Attr(Selector, String),
    Exists(Selector, String),
}

impl Strategy {
    fn compile(field: Field, spec: &StrategySpec) -> Result<Self, ExtractError> {
        let selector = Selector::parse(spec.selector()).map_err(|e| ExtractError::InvalidSelector {
            field,
            selector: spec.selector().to_string(),
            message: e.to_string(),
        })?;
        Ok(match spec {
            StrategySpec::Text { .. } => Self::Text(selector),
            StrategySpec::Attr { attr, .. } => Self::Attr(selector, attr.clone()),
            StrategySpec::Exists { value, .. } => Self::Exists(selector, value.clone()),
        })
    }

    fn apply(&self, doc: &Html) -> Option<String> {
        let value = match self {
            Self::Text(selector) => doc.select(selector).find_map(|el| non_empty(element_text(el))),
            Self::Attr(selector, attr) => doc
                .select(selector)
                .find_map(|el| el.value().attr(attr).and_then(|v| non_empty(collapse(v)))),
            Self::Exists(selector, value) => doc.select(selector).next().map(|_| value.clone()),
        };
        value.filter(|v| !v.is_empty())
    }
}

struct FieldRule {
    field: Field,
    strategies: Vec<Strategy>,
}

impl FieldRule {
    fn locate(&self, doc: &Html) -> Option<String> {
        self.strategies
            .iter()
            .enumerate()
            .find_map(|(idx, strategy)| {
                let value = strategy.apply(doc)?;
                if idx > 0 {
                    tracing::debug!("field '{}' matched fallback strategy #{}", self.field, idx);
                }
                Some(value)
            })
    }
}

/// Compiled extractor for one selector set.
pub struct Extractor {
    rules: Vec<FieldRule>,
}

impl Extractor {
    pub fn new(selectors: &SelectorSet) -> Result<Self, ExtractError> {
        let rules = selectors
            .fields()
            .into_iter()
            .map(|(field, specs)| {
                let strategies = specs
                    .iter()
                    .map(|spec| Strategy::compile(field, spec))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FieldRule { field, strategies })
            })
            .collect::<Result<Vec<_>, ExtractError>>()?;
        Ok(Self { rules })
    }

    pub fn amazon() -> Result<Self, ExtractError> {
        Self::new(&SelectorSet::amazon())
    }

    /// Locates every field in `html`.
    ///
    /// Fails only when a required field has no matching strategy; optional
    /// fields fall back to `None`.
    pub fn extract(&self, html: &str) -> Result<RawFields, ExtractError> {
        let doc = Html::parse_document(html);
        let mut raw = RawFields::default();
        for rule in &self.rules {
            let value = rule.locate(&doc);
            match (rule.field, value) {
                (field, None) if field.is_required() => {
                    return Err(ExtractError::MissingRequiredField(field));
                }
                (Field::Title, Some(v)) => raw.title = v,
                (Field::Price, Some(v)) => raw.price_text = v,
                (Field::Currency, v) => raw.currency_text = v,
                (Field::Rating, v) => raw.rating_text = v,
                (Field::ReviewCount, v) => raw.review_count_text = v,
                (Field::Image, v) => raw.image_url = v,
                (Field::Availability, v) => raw.availability_text = v,
                (Field::Title | Field::Price, None) => {}
            }
        }
        Ok(raw)
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse(&el.text().collect::<Vec<_>>().join(" "))
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
